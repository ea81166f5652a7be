//! Session endpoints.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::Value;

use bos_core::{current_timestamp, parse_age, Tenant};
use bos_operators::session_status::{session_status, SessionStatusReport};
use bos_store::types::{Operation, Session, SessionState, SessionStatus, SessionTemplate};
use bos_store::{kind, Store};

use super::merge_json;
use crate::error::ApiError;
use crate::state::AppState;
use crate::tenant::TenantHeader;
use crate::validation::{validate_name, validate_template_artifacts};

/// Body for session creation.
#[derive(Debug, Deserialize)]
pub struct SessionCreate {
    /// Template to instantiate.
    pub template_name: String,
    /// Operation to perform.
    pub operation: String,
    /// Optional explicit session name; a UUID is generated otherwise.
    #[serde(default)]
    pub name: Option<String>,
    /// Optional node selector.
    #[serde(default)]
    pub limit: Option<String>,
    /// Write staged state instead of desired state.
    #[serde(default)]
    pub stage: bool,
    /// Include disabled components.
    #[serde(default)]
    pub include_disabled: bool,
}

/// Filters for listing and bulk-deleting sessions.
#[derive(Debug, Default, Deserialize)]
pub struct SessionFilter {
    /// Lifecycle state to match.
    #[serde(default)]
    pub status: Option<String>,
    /// Only sessions started at least this long ago.
    #[serde(default)]
    pub min_age: Option<String>,
    /// Only sessions started at most this long ago.
    #[serde(default)]
    pub max_age: Option<String>,
}

struct ResolvedFilter {
    status: Option<SessionState>,
    started_before: Option<chrono::DateTime<chrono::Utc>>,
    started_after: Option<chrono::DateTime<chrono::Utc>>,
}

fn resolve_filter(filter: &SessionFilter) -> Result<ResolvedFilter, ApiError> {
    let status = match &filter.status {
        None => None,
        Some(raw) => Some(
            serde_json::from_value::<SessionState>(Value::String(raw.clone()))
                .map_err(|_| ApiError::BadRequest(format!("invalid session status: {raw}")))?,
        ),
    };
    let now = current_timestamp();
    let started_before = filter
        .min_age
        .as_deref()
        .map(|age| parse_age(age, now))
        .transpose()
        .map_err(|e| ApiError::BadRequest(format!("invalid min_age: {e}")))?;
    let started_after = filter
        .max_age
        .as_deref()
        .map(|age| parse_age(age, now))
        .transpose()
        .map_err(|e| ApiError::BadRequest(format!("invalid max_age: {e}")))?;
    Ok(ResolvedFilter {
        status,
        started_before,
        started_after,
    })
}

impl ResolvedFilter {
    fn matches(&self, session: &Session) -> bool {
        if let Some(status) = self.status {
            if session.status.status != status {
                return false;
            }
        }
        let started = session.status.start_time;
        if let Some(before) = self.started_before {
            if !started.is_some_and(|s| s <= before) {
                return false;
            }
        }
        if let Some(after) = self.started_after {
            if !started.is_some_and(|s| s >= after) {
                return false;
            }
        }
        true
    }
}

fn list_filtered<S: Store>(
    state: &AppState<S>,
    tenant: &Tenant,
    filter: &SessionFilter,
) -> Result<Vec<Session>, ApiError> {
    let resolved = resolve_filter(filter)?;
    let pages = state.store.scan(
        kind::SESSIONS,
        &tenant.key_prefix(),
        |s: &Session| resolved.matches(s),
        0,
    )?;
    Ok(pages.into_iter().flatten().collect())
}

/// `POST /v2/sessions`
pub async fn post_session<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    TenantHeader(tenant): TenantHeader,
    Json(body): Json<SessionCreate>,
) -> Result<impl IntoResponse, ApiError> {
    let opts = state.options()?;

    let operation = Operation::parse(&body.operation).ok_or_else(|| {
        ApiError::BadRequest(format!(
            "operation must be one of boot, reboot, shutdown (got '{}')",
            body.operation
        ))
    })?;

    if !state
        .tenants
        .tenant_exists(&tenant, std::time::Duration::from_secs(opts.hsm_read_timeout))
        .await
        .map_err(|e| ApiError::BadRequest(format!("unable to validate tenant: {e}")))?
    {
        return Err(ApiError::BadRequest(format!(
            "the provided tenant '{tenant}' does not exist"
        )));
    }

    let limit = body.limit.unwrap_or_default();
    if opts.session_limit_required && limit.is_empty() {
        return Err(ApiError::BadRequest(
            "sessions must specify a limit (session_limit_required is set)".into(),
        ));
    }

    validate_name("session template", &body.template_name)?;
    let template: SessionTemplate = state
        .store
        .get(kind::SESSION_TEMPLATES, &tenant.key_for(&body.template_name))?
        .ok_or_else(|| {
            ApiError::BadRequest(format!(
                "session template '{}' is invalid or does not exist",
                body.template_name
            ))
        })?;
    if matches!(operation, Operation::Boot | Operation::Reboot) {
        validate_template_artifacts(&state, &template, &opts).await?;
    }

    let name = body
        .name
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    validate_name("session", &name)?;
    let key = tenant.key_for(&name);
    if state.store.contains(kind::SESSIONS, &key)? {
        return Err(ApiError::Conflict(format!("session {name} already exists")));
    }

    let session = Session {
        name,
        tenant: tenant.clone(),
        template_name: body.template_name,
        operation,
        limit,
        stage: body.stage,
        include_disabled: body.include_disabled,
        components: String::new(),
        status: SessionStatus {
            status: SessionState::Pending,
            start_time: Some(current_timestamp()),
            end_time: None,
            error: None,
        },
    };
    state.store.put(kind::SESSIONS, &key, &session)?;
    tracing::info!(session = %session.name, tenant = %tenant, operation = ?session.operation,
        "created session");
    Ok((StatusCode::CREATED, Json(session)))
}

/// `GET /v2/sessions`
pub async fn list_sessions<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    TenantHeader(tenant): TenantHeader,
    Query(filter): Query<SessionFilter>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(list_filtered(&state, &tenant, &filter)?))
}

/// `GET /v2/sessions/{name}`
pub async fn get_session<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    TenantHeader(tenant): TenantHeader,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let session: Session = state
        .store
        .get(kind::SESSIONS, &tenant.key_for(&name))?
        .ok_or_else(|| ApiError::NotFound(format!("session {name} could not be found")))?;
    Ok(Json(session))
}

/// `PATCH /v2/sessions/{name}`
pub async fn patch_session<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    TenantHeader(tenant): TenantHeader,
    Path(name): Path<String>,
    Json(mut patch): Json<Value>,
) -> Result<impl IntoResponse, ApiError> {
    if let Some(map) = patch.as_object_mut() {
        map.remove("name");
        map.remove("tenant");
    }
    let key = tenant.key_for(&name);
    let current: Value = state
        .store
        .get(kind::SESSIONS, &key)?
        .ok_or_else(|| ApiError::NotFound(format!("session {name} could not be found")))?;
    let mut preview = current;
    merge_json(&mut preview, &patch);
    serde_json::from_value::<Session>(preview)
        .map_err(|e| ApiError::BadRequest(format!("invalid session patch: {e}")))?;

    let merged = state
        .store
        .patch(kind::SESSIONS, &key, move |value: &mut Value| {
            merge_json(value, &patch);
        })?;
    let session: Session = serde_json::from_value(merged)
        .map_err(|e| ApiError::Internal(format!("patched session failed to decode: {e}")))?;
    Ok(Json(session))
}

/// `DELETE /v2/sessions/{name}`
pub async fn delete_session<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    TenantHeader(tenant): TenantHeader,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let key = tenant.key_for(&name);
    if !state.store.contains(kind::SESSIONS, &key)? {
        return Err(ApiError::NotFound(format!(
            "session {name} could not be found"
        )));
    }
    state.store.delete(kind::SESSIONS, &key)?;
    if state.store.contains(kind::SESSION_STATUS, &key)? {
        state.store.delete(kind::SESSION_STATUS, &key)?;
    }
    Ok(StatusCode::NO_CONTENT)
}

/// `DELETE /v2/sessions` — bulk delete by filter.
pub async fn delete_sessions<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    TenantHeader(tenant): TenantHeader,
    Query(filter): Query<SessionFilter>,
) -> Result<impl IntoResponse, ApiError> {
    let sessions = list_filtered(&state, &tenant, &filter)?;
    for session in &sessions {
        state.store.delete(kind::SESSIONS, &session.key())?;
        if state.store.contains(kind::SESSION_STATUS, &session.key())? {
            state.store.delete(kind::SESSION_STATUS, &session.key())?;
        }
    }
    tracing::info!(count = sessions.len(), tenant = %tenant, "bulk-deleted sessions");
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /v2/sessions/{name}/status`
///
/// Complete sessions are served from the snapshot saved at completion
/// time; everything else aggregates live from the component records.
pub async fn get_session_status<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    TenantHeader(tenant): TenantHeader,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let key = tenant.key_for(&name);
    let session: Session = state
        .store
        .get(kind::SESSIONS, &key)?
        .ok_or_else(|| ApiError::NotFound(format!("session {name} could not be found")))?;

    if session.status.status == SessionState::Complete {
        if let Some(saved) = state
            .store
            .get::<SessionStatusReport>(kind::SESSION_STATUS, &key)?
        {
            return Ok(Json(saved));
        }
    }
    let report = session_status(state.store.as_ref(), &session, current_timestamp())
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(report))
}
