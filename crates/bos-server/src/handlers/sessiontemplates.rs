//! Session template endpoints.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;
use serde_json::Value;

use bos_core::Tenant;
use bos_store::types::{Arch, BootSet, CfsParameters, SessionTemplate};
use bos_store::{kind, Store};

use super::merge_json;
use crate::error::ApiError;
use crate::state::AppState;
use crate::tenant::TenantHeader;
use crate::validation::{validate_template, validate_template_artifacts};

/// `GET /v2/sessiontemplates`
pub async fn list_templates<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    TenantHeader(tenant): TenantHeader,
) -> Result<impl IntoResponse, ApiError> {
    let pages = state
        .store
        .scan::<SessionTemplate, _>(kind::SESSION_TEMPLATES, &tenant.key_prefix(), |_| true, 0)?;
    let templates: Vec<SessionTemplate> = pages.into_iter().flatten().collect();
    Ok(Json(templates))
}

/// `GET /v2/sessiontemplates/{name}`
pub async fn get_template<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    TenantHeader(tenant): TenantHeader,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let template: SessionTemplate = state
        .store
        .get(kind::SESSION_TEMPLATES, &tenant.key_for(&name))?
        .ok_or_else(|| {
            ApiError::NotFound(format!("session template {name} could not be found"))
        })?;
    Ok(Json(template))
}

/// `POST /v2/sessiontemplates`
pub async fn post_template<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    TenantHeader(tenant): TenantHeader,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, ApiError> {
    let mut template: SessionTemplate = serde_json::from_value(body)
        .map_err(|e| ApiError::BadRequest(format!("invalid session template: {e}")))?;
    template.tenant = tenant.clone();
    validate_template(&mut template)?;

    let key = template.key();
    if state.store.contains(kind::SESSION_TEMPLATES, &key)? {
        return Err(ApiError::Conflict(format!(
            "session template {} already exists",
            template.name
        )));
    }
    state.store.put(kind::SESSION_TEMPLATES, &key, &template)?;
    tracing::info!(template = %template.name, tenant = %tenant, "created session template");
    Ok((StatusCode::CREATED, Json(template)))
}

/// `PATCH /v2/sessiontemplates/{name}`
pub async fn patch_template<S: Store>(
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
        .get(kind::SESSION_TEMPLATES, &key)?
        .ok_or_else(|| {
            ApiError::NotFound(format!("session template {name} could not be found"))
        })?;

    let mut preview = current;
    merge_json(&mut preview, &patch);
    let mut merged_template: SessionTemplate = serde_json::from_value(preview)
        .map_err(|e| ApiError::BadRequest(format!("invalid session template patch: {e}")))?;
    validate_template(&mut merged_template)?;

    let merged = state
        .store
        .patch(kind::SESSION_TEMPLATES, &key, move |value: &mut Value| {
            merge_json(value, &patch);
        })?;
    let template: SessionTemplate = serde_json::from_value(merged)
        .map_err(|e| ApiError::Internal(format!("patched template failed to decode: {e}")))?;
    Ok(Json(template))
}

/// `DELETE /v2/sessiontemplates/{name}`
pub async fn delete_template<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    TenantHeader(tenant): TenantHeader,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let key = tenant.key_for(&name);
    if !state.store.contains(kind::SESSION_TEMPLATES, &key)? {
        return Err(ApiError::NotFound(format!(
            "session template {name} could not be found"
        )));
    }
    state.store.delete(kind::SESSION_TEMPLATES, &key)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Validation result for the validate endpoint.
#[derive(Debug, Serialize)]
pub struct ValidateResponse {
    /// Always `valid` on a 200; failures return 400 with the error.
    pub status: &'static str,
}

/// `POST /v2/sessiontemplates/{name}/validate`
///
/// Structural checks plus artifact resolution: the image manifest must
/// exist in the object store (and the image in the image service when
/// `ims_images_must_exist` is set).
pub async fn validate_template_endpoint<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    TenantHeader(tenant): TenantHeader,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let mut template: SessionTemplate = state
        .store
        .get(kind::SESSION_TEMPLATES, &tenant.key_for(&name))?
        .ok_or_else(|| {
            ApiError::NotFound(format!("session template {name} could not be found"))
        })?;
    validate_template(&mut template)?;
    let opts = state.options()?;
    validate_template_artifacts(&state, &template, &opts).await?;
    Ok(Json(ValidateResponse { status: "valid" }))
}

/// `GET /v2/sessiontemplatetemplate` — an example template for clients
/// to start from.
pub async fn template_template() -> impl IntoResponse {
    let mut boot_sets = BTreeMap::new();
    boot_sets.insert(
        "compute".to_string(),
        BootSet {
            name: "compute".into(),
            node_list: vec!["x3000c0s19b1n0".into(), "x3000c0s19b2n0".into()],
            arch: Arch::X86,
            path: "s3://boot-images/00000000-0000-0000-0000-000000000000/manifest.json".into(),
            etag: "your-manifest-etag".into(),
            kernel_parameters: "console=ttyS0,115200 bad_page=panic hugepagelist=2m-2g".into(),
            rootfs_provider: "sbps".into(),
            rootfs_provider_passthrough: "dvs:api-gw-service-nmn.local:300:nmn0".into(),
            cfs: None,
            node_groups: Vec::new(),
            node_roles_groups: Vec::new(),
        },
    );
    let example = SessionTemplate {
        name: "name-your-template".into(),
        tenant: Tenant::untenanted(),
        description: "An example session template.".into(),
        enable_cfs: true,
        cfs: Some(CfsParameters {
            configuration: "desired-cfs-config".into(),
        }),
        boot_sets,
    };
    Json(example)
}
