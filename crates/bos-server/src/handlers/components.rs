//! Component endpoints.
//!
//! Components serialize with their derived status injected into the
//! status block, so clients always see the status/phase pair without
//! computing the derivation themselves. Writes go through JSON merge
//! patches validated against the component schema before they land.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use bos_core::{current_timestamp, Action, Status, Tenant};
use bos_store::types::{Component, DesiredState, StagedState};
use bos_store::{kind, Store};

use super::merge_json;
use crate::error::ApiError;
use crate::state::AppState;
use crate::tenant::TenantHeader;
use crate::validation::validate_name;

/// A component as served on the wire: the stored record plus the
/// derived status.
pub(crate) fn component_to_json(component: &Component) -> Value {
    let mut json = serde_json::to_value(component).expect("component serializes");
    json["status"]["status"] =
        serde_json::to_value(component.status()).expect("status serializes");
    json
}

/// Query filters for the component list.
#[derive(Debug, Default, Deserialize)]
pub struct ComponentFilter {
    /// Comma-separated explicit ids.
    #[serde(default)]
    pub ids: Option<String>,
    /// Components owned by this session.
    #[serde(default)]
    pub session: Option<String>,
    /// Components holding this session staged.
    #[serde(default)]
    pub staged_session: Option<String>,
    /// Filter by enabled flag.
    #[serde(default)]
    pub enabled: Option<bool>,
    /// Filter by phase.
    #[serde(default)]
    pub phase: Option<String>,
    /// Comma-separated derived statuses.
    #[serde(default)]
    pub status: Option<String>,
}

impl ComponentFilter {
    fn matches(&self, component: &Component) -> bool {
        if let Some(session) = &self.session {
            if component.session != *session {
                return false;
            }
        }
        if let Some(staged) = &self.staged_session {
            if component.staged_state.session != *staged {
                return false;
            }
        }
        if let Some(enabled) = self.enabled {
            if component.enabled != enabled {
                return false;
            }
        }
        if let Some(phase) = &self.phase {
            let actual = serde_json::to_value(component.status.phase)
                .ok()
                .and_then(|v| v.as_str().map(ToString::to_string))
                .unwrap_or_default();
            if actual != *phase {
                return false;
            }
        }
        if let Some(statuses) = &self.status {
            let derived = component.status();
            let matched = statuses
                .split(',')
                .filter_map(Status::parse)
                .any(|s| s == derived);
            if !matched {
                return false;
            }
        }
        true
    }
}

fn load_components<S: Store>(
    state: &AppState<S>,
    tenant: &Tenant,
    filter: &ComponentFilter,
) -> Result<Vec<Component>, ApiError> {
    if let Some(ids) = &filter.ids {
        let keys: Vec<String> = ids
            .split(',')
            .filter(|id| !id.is_empty())
            .map(|id| tenant.key_for(id))
            .collect();
        let found = state.store.get_multi::<Component>(kind::COMPONENTS, &keys)?;
        let mut components: Vec<Component> =
            found.into_values().filter(|c| filter.matches(c)).collect();
        components.sort_by(|a, b| a.id.cmp(&b.id));
        return Ok(components);
    }
    let pages = state.store.scan(
        kind::COMPONENTS,
        &tenant.key_prefix(),
        |c: &Component| filter.matches(c),
        0,
    )?;
    Ok(pages.into_iter().flatten().collect())
}

/// `GET /v2/components`
pub async fn list_components<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    TenantHeader(tenant): TenantHeader,
    Query(filter): Query<ComponentFilter>,
) -> Result<impl IntoResponse, ApiError> {
    let components = load_components(&state, &tenant, &filter)?;
    let body: Vec<Value> = components.iter().map(component_to_json).collect();
    Ok(Json(body))
}

/// `GET /v2/components/{id}`
pub async fn get_component<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    TenantHeader(tenant): TenantHeader,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let component: Component = state
        .store
        .get(kind::COMPONENTS, &tenant.key_for(&id))?
        .ok_or_else(|| ApiError::NotFound(format!("component {id} could not be found")))?;
    Ok(Json(component_to_json(&component)))
}

/// `PUT /v2/components/{id}`
pub async fn put_component<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    TenantHeader(tenant): TenantHeader,
    Path(id): Path<String>,
    Json(mut body): Json<Value>,
) -> Result<impl IntoResponse, ApiError> {
    validate_name("component", &id)?;
    body["id"] = Value::String(id.clone());
    body["tenant"] = Value::String(tenant.as_str().to_string());
    let component: Component = serde_json::from_value(body)
        .map_err(|e| ApiError::BadRequest(format!("invalid component: {e}")))?;
    state
        .store
        .put(kind::COMPONENTS, &tenant.key_for(&id), &component)?;
    Ok(Json(component_to_json(&component)))
}

/// `POST /v2/components` — bulk upsert.
pub async fn post_components<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    TenantHeader(tenant): TenantHeader,
    Json(bodies): Json<Vec<Value>>,
) -> Result<impl IntoResponse, ApiError> {
    let mut created = Vec::with_capacity(bodies.len());
    for mut body in bodies {
        let id = body["id"]
            .as_str()
            .ok_or_else(|| ApiError::BadRequest("component entry is missing an id".into()))?
            .to_string();
        validate_name("component", &id)?;
        body["tenant"] = Value::String(tenant.as_str().to_string());
        let component: Component = serde_json::from_value(body)
            .map_err(|e| ApiError::BadRequest(format!("invalid component {id}: {e}")))?;
        state
            .store
            .put(kind::COMPONENTS, &tenant.key_for(&id), &component)?;
        created.push(component_to_json(&component));
    }
    Ok((StatusCode::OK, Json(created)))
}

fn apply_component_patch<S: Store>(
    state: &AppState<S>,
    tenant: &Tenant,
    id: &str,
    patch: &Value,
) -> Result<Value, ApiError> {
    let key = tenant.key_for(id);
    let current: Value = state
        .store
        .get(kind::COMPONENTS, &key)?
        .ok_or_else(|| ApiError::NotFound(format!("component {id} could not be found")))?;

    // Validate the merge result against the schema before committing.
    let mut preview = current;
    merge_json(&mut preview, patch);
    serde_json::from_value::<Component>(preview)
        .map_err(|e| ApiError::BadRequest(format!("invalid component patch: {e}")))?;

    let patch = patch.clone();
    let merged = state
        .store
        .patch(kind::COMPONENTS, &key, move |value: &mut Value| {
            merge_json(value, &patch);
        })?;
    let component: Component = serde_json::from_value(merged)
        .map_err(|e| ApiError::Internal(format!("patched component failed to decode: {e}")))?;
    Ok(component_to_json(&component))
}

/// Strip fields callers may not change through a patch.
fn sanitize_patch(patch: &mut Value) {
    if let Some(map) = patch.as_object_mut() {
        map.remove("id");
        map.remove("tenant");
    }
}

/// `PATCH /v2/components/{id}`
pub async fn patch_component<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    TenantHeader(tenant): TenantHeader,
    Path(id): Path<String>,
    Json(mut patch): Json<Value>,
) -> Result<impl IntoResponse, ApiError> {
    sanitize_patch(&mut patch);
    let body = apply_component_patch(&state, &tenant, &id, &patch)?;
    Ok(Json(body))
}

/// Bulk-patch query options.
#[derive(Debug, Default, Deserialize)]
pub struct BulkPatchQuery {
    /// Tolerate ids that do not resolve to components.
    #[serde(default)]
    pub skip_bad_ids: bool,
}

/// Body for filtered bulk patches.
#[derive(Debug, Deserialize)]
pub struct FilteredPatch {
    /// Which components to patch: exactly one of `ids` or `session`.
    pub filters: PatchFilters,
    /// The patch to apply to each.
    pub patch: Value,
}

/// Bulk-patch filters.
#[derive(Debug, Default, Deserialize)]
pub struct PatchFilters {
    /// Comma-separated component ids.
    #[serde(default)]
    pub ids: Option<String>,
    /// All components owned by this session.
    #[serde(default)]
    pub session: Option<String>,
}

/// `PATCH /v2/components` — either a list of per-component patches
/// (each carrying its id) or a `{filters, patch}` document.
pub async fn patch_components<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    TenantHeader(tenant): TenantHeader,
    Query(query): Query<BulkPatchQuery>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, ApiError> {
    match body {
        Value::Array(entries) => {
            patch_component_list(&state, &tenant, entries, query.skip_bad_ids).map(Json)
        }
        Value::Object(_) => {
            let request: FilteredPatch = serde_json::from_value(body)
                .map_err(|e| ApiError::BadRequest(format!("invalid bulk patch: {e}")))?;
            patch_filtered(&state, &tenant, &request).map(Json)
        }
        _ => Err(ApiError::BadRequest(
            "bulk patch must be a list or a {filters, patch} object".into(),
        )),
    }
}

fn patch_component_list<S: Store>(
    state: &AppState<S>,
    tenant: &Tenant,
    entries: Vec<Value>,
    skip_bad_ids: bool,
) -> Result<Vec<Value>, ApiError> {
    // Reject unknown ids up front so a partial batch is never written,
    // unless the caller asked to skip them.
    let mut patches = Vec::with_capacity(entries.len());
    for mut entry in entries {
        let id = entry["id"]
            .as_str()
            .ok_or_else(|| ApiError::BadRequest("patch entry is missing an id".into()))?
            .to_string();
        if !state.store.contains(kind::COMPONENTS, &tenant.key_for(&id))? {
            if skip_bad_ids {
                tracing::debug!(component = %id, "skipping unknown component id");
                continue;
            }
            return Err(ApiError::NotFound(format!(
                "component {id} could not be found"
            )));
        }
        sanitize_patch(&mut entry);
        patches.push((id, entry));
    }

    let mut results = Vec::with_capacity(patches.len());
    for (id, patch) in patches {
        results.push(apply_component_patch(state, tenant, &id, &patch)?);
    }
    Ok(results)
}

fn patch_filtered<S: Store>(
    state: &AppState<S>,
    tenant: &Tenant,
    request: &FilteredPatch,
) -> Result<Vec<Value>, ApiError> {
    let ids: Vec<String> = match (&request.filters.ids, &request.filters.session) {
        (Some(_), Some(_)) | (None, None) => {
            return Err(ApiError::BadRequest(
                "exactly one of the 'ids' and 'session' filters must be provided".into(),
            ));
        }
        (Some(ids), None) => ids.split(',').filter(|s| !s.is_empty()).map(ToString::to_string).collect(),
        (None, Some(session)) => {
            let filter = ComponentFilter {
                session: Some(session.clone()),
                ..ComponentFilter::default()
            };
            load_components(state, tenant, &filter)?
                .into_iter()
                .map(|c| c.id)
                .collect()
        }
    };

    let mut patch = request.patch.clone();
    sanitize_patch(&mut patch);
    let mut results = Vec::with_capacity(ids.len());
    for id in ids {
        results.push(apply_component_patch(state, tenant, &id, &patch)?);
    }
    Ok(results)
}

/// `DELETE /v2/components/{id}`
pub async fn delete_component<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    TenantHeader(tenant): TenantHeader,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let key = tenant.key_for(&id);
    if !state.store.contains(kind::COMPONENTS, &key)? {
        return Err(ApiError::NotFound(format!(
            "component {id} could not be found"
        )));
    }
    state.store.delete(kind::COMPONENTS, &key)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Body for the apply-staged operation.
#[derive(Debug, Deserialize)]
pub struct ApplyStagedRequest {
    /// Components whose staged state should be promoted.
    pub xnames: Vec<String>,
}

/// Result of the apply-staged operation.
#[derive(Debug, Default, Serialize)]
pub struct ApplyStagedResponse {
    /// Components whose staged state was promoted.
    pub succeeded: Vec<String>,
    /// Components that failed (no staged state or unknown id).
    pub failed: Vec<String>,
    /// Components with nothing staged.
    pub ignored: Vec<String>,
}

/// `POST /v2/applystage` — promote staged state to desired state in a
/// single step: desired ← staged, staged ← empty.
pub async fn apply_staged<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    TenantHeader(tenant): TenantHeader,
    Json(request): Json<ApplyStagedRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if request.xnames.is_empty() {
        return Err(ApiError::BadRequest("xnames must not be empty".into()));
    }

    let now = current_timestamp();
    let mut response = ApplyStagedResponse::default();
    for id in &request.xnames {
        let key = tenant.key_for(id);
        let current: Option<Component> = state.store.get(kind::COMPONENTS, &key)?;
        let Some(component) = current else {
            response.failed.push(id.clone());
            continue;
        };
        if component.staged_state.is_empty() {
            response.ignored.push(id.clone());
            continue;
        }

        state
            .store
            .patch(kind::COMPONENTS, &key, move |c: &mut Component| {
                if c.staged_state.is_empty() {
                    return;
                }
                c.desired_state = DesiredState {
                    boot_artifacts: c.staged_state.boot_artifacts.clone(),
                    configuration: c.staged_state.configuration.clone(),
                    bss_token: String::new(),
                };
                let staged_session = c.staged_state.session.clone();
                c.session = staged_session;
                c.staged_state = StagedState::default();
                c.enabled = true;
                c.last_action = bos_store::types::LastAction {
                    action: Action::ApplyStaged,
                    num_attempts: 1,
                    last_updated: Some(now),
                    failed: false,
                };
                c.error.clear();
                c.status.status_override = None;
            })?;
        response.succeeded.push(id.clone());
    }
    Ok(Json(response))
}
