//! Router configuration.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use bos_store::Store;

use crate::handlers::{components, meta, options, sessions, sessiontemplates};
use crate::state::AppState;

/// Largest accepted request body.
const MAX_BODY_BYTES: usize = 8 * 1024 * 1024;

/// Per-request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Create the v2 router.
///
/// # Routes
///
/// - `GET /` — available API versions
/// - `GET /v2/healthz`, `GET /v2/version`
/// - `GET|POST|PATCH /v2/components`, `GET|PUT|PATCH|DELETE
///   /v2/components/{id}`
/// - `POST /v2/applystage`
/// - `GET|POST|DELETE /v2/sessions`, `GET|PATCH|DELETE
///   /v2/sessions/{name}`, `GET /v2/sessions/{name}/status`
/// - `GET|POST /v2/sessiontemplates`, `GET|PATCH|DELETE
///   /v2/sessiontemplates/{name}`, `POST
///   /v2/sessiontemplates/{name}/validate`, `GET /v2/sessiontemplatetemplate`
/// - `GET|PATCH /v2/options`
pub fn create_router<S: Store + 'static>(state: AppState<S>) -> Router {
    let state = Arc::new(state);

    Router::new()
        .route("/", get(meta::root))
        .route("/v2/healthz", get(meta::healthz::<S>))
        .route("/v2/version", get(meta::version))
        // Components
        .route(
            "/v2/components",
            get(components::list_components::<S>)
                .post(components::post_components::<S>)
                .patch(components::patch_components::<S>),
        )
        .route(
            "/v2/components/{id}",
            get(components::get_component::<S>)
                .put(components::put_component::<S>)
                .patch(components::patch_component::<S>)
                .delete(components::delete_component::<S>),
        )
        .route("/v2/applystage", post(components::apply_staged::<S>))
        // Sessions
        .route(
            "/v2/sessions",
            get(sessions::list_sessions::<S>)
                .post(sessions::post_session::<S>)
                .delete(sessions::delete_sessions::<S>),
        )
        .route(
            "/v2/sessions/{name}",
            get(sessions::get_session::<S>)
                .patch(sessions::patch_session::<S>)
                .delete(sessions::delete_session::<S>),
        )
        .route(
            "/v2/sessions/{name}/status",
            get(sessions::get_session_status::<S>),
        )
        // Session templates
        .route(
            "/v2/sessiontemplates",
            get(sessiontemplates::list_templates::<S>)
                .post(sessiontemplates::post_template::<S>),
        )
        .route(
            "/v2/sessiontemplates/{name}",
            get(sessiontemplates::get_template::<S>)
                .patch(sessiontemplates::patch_template::<S>)
                .delete(sessiontemplates::delete_template::<S>),
        )
        .route(
            "/v2/sessiontemplates/{name}/validate",
            post(sessiontemplates::validate_template_endpoint::<S>),
        )
        .route(
            "/v2/sessiontemplatetemplate",
            get(sessiontemplates::template_template),
        )
        // Options
        .route(
            "/v2/options",
            get(options::get_options::<S>).patch(options::patch_options::<S>),
        )
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .with_state(state)
}
