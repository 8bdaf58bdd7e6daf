//! One-off resource version checks.

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use bytes::Bytes;
use prole_core::logs::NullLogStreamer;
use prole_core::{Input, Version};
use std::sync::Arc;
use tracing::{info, warn};

use crate::AppState;
use crate::error::ApiError;

pub fn router() -> Router<AppState> {
    Router::new().route("/", post(check))
}

/// Run a resource's check against the posted source, returning its versions.
async fn check(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<Vec<Version>>, ApiError> {
    let input: Input = serde_json::from_slice(&body)?;
    info!(resource_type = %input.resource_type, "Checking resource");

    let resource = state
        .tracker
        .init(&input.resource_type, Arc::new(NullLogStreamer), None)
        .await
        .map_err(|e| {
            warn!(resource_type = %input.resource_type, error = %e, "Failed to initialize resource");
            ApiError::Internal(e.to_string())
        })?;

    let versions = resource.check(&input).await;
    state.tracker.release(resource).await;

    let versions = versions.map_err(|e| {
        warn!(resource_type = %input.resource_type, error = %e, "Check failed");
        ApiError::Internal(e.to_string())
    })?;
    Ok(Json(versions))
}
