//! Tenant header extraction.
//!
//! Every v2 route scopes its records by the `Cray-Tenant-Name` header.
//! No header and an empty header both mean the untenanted bucket.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use bos_core::Tenant;

use crate::error::ApiError;

/// Name of the tenancy header.
pub const TENANT_HEADER: &str = "Cray-Tenant-Name";

/// The tenant a request operates under.
#[derive(Debug, Clone)]
pub struct TenantHeader(pub Tenant);

impl<S: Send + Sync> FromRequestParts<S> for TenantHeader {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = match parts.headers.get(TENANT_HEADER) {
            Some(raw) => raw.to_str().map_err(|_| {
                ApiError::BadRequest(format!("{TENANT_HEADER} header is not valid UTF-8"))
            })?,
            None => "",
        };
        let tenant = Tenant::new(value)
            .map_err(|e| ApiError::BadRequest(format!("invalid tenant name: {e}")))?;
        Ok(Self(tenant))
    }
}
