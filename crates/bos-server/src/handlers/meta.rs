//! Service metadata endpoints: health, version, root.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use bos_store::{kind, Store};

use crate::state::AppState;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// API readiness.
    pub api_status: &'static str,
    /// Store reachability.
    pub db_status: &'static str,
}

/// `GET /v2/healthz`
///
/// Reports degraded (503) when the store cannot be reached.
pub async fn healthz<S: Store>(State(state): State<Arc<AppState<S>>>) -> impl IntoResponse {
    match state.store.contains(kind::META, kind::VERSION_KEY) {
        Ok(_) => (
            StatusCode::OK,
            Json(HealthResponse {
                api_status: "ok",
                db_status: "ok",
            }),
        ),
        Err(e) => {
            tracing::error!(error = %e, "health check failed to reach the store");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    api_status: "ok",
                    db_status: "unavailable",
                }),
            )
        }
    }
}

/// Version descriptor.
#[derive(Debug, Serialize)]
pub struct VersionResponse {
    /// API major version.
    pub major: &'static str,
    /// API minor version.
    pub minor: &'static str,
    /// Service build version.
    pub patch: &'static str,
}

fn version_response() -> VersionResponse {
    let mut parts = env!("CARGO_PKG_VERSION").splitn(3, '.');
    VersionResponse {
        major: parts.next().unwrap_or("0"),
        minor: parts.next().unwrap_or("0"),
        patch: parts.next().unwrap_or("0"),
    }
}

/// `GET /v2/version`
pub async fn version() -> impl IntoResponse {
    Json(version_response())
}

/// Root listing of available API versions.
#[derive(Debug, Serialize)]
pub struct RootResponse {
    /// Available versions.
    pub versions: Vec<&'static str>,
}

/// `GET /`
pub async fn root() -> impl IntoResponse {
    Json(RootResponse {
        versions: vec!["v2"],
    })
}
