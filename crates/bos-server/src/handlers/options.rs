//! Options endpoints.
//!
//! GET returns the complete merged view; PATCH overlays the provided
//! fields onto the stored partial record.

use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;

use bos_store::types::{OptionsData, OptionsSnapshot};
use bos_store::{kind, Store, StoreError};

use crate::error::ApiError;
use crate::state::AppState;

/// `GET /v2/options`
pub async fn get_options<S: Store>(
    State(state): State<Arc<AppState<S>>>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.options()?))
}

/// `PATCH /v2/options`
pub async fn patch_options<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Json(patch): Json<OptionsData>,
) -> Result<impl IntoResponse, ApiError> {
    // First write creates the record; later writes merge atomically.
    let result = state
        .store
        .patch(kind::OPTIONS, kind::OPTIONS_KEY, |data: &mut OptionsData| {
            data.merge(&patch);
        });
    let merged = match result {
        Ok(merged) => merged,
        Err(StoreError::NotFound) => {
            state.store.put(kind::OPTIONS, kind::OPTIONS_KEY, &patch)?;
            patch
        }
        Err(e) => return Err(e.into()),
    };
    tracing::info!("options updated");
    Ok(Json(OptionsSnapshot::from_data(&merged)))
}
