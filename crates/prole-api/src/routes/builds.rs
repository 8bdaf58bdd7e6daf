//! Build submission and status endpoints.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use prole_core::{Build, BuildEvent, BuildId};
use prole_scheduler::RunState;
use serde::Serialize;
use tracing::info;

use crate::AppState;
use crate::error::ApiError;
use crate::ws::events_handler;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_build))
        .route("/{guid}", get(get_build))
        .route("/{guid}/events", get(events_handler))
}

#[derive(Debug, Serialize)]
struct CreatedResponse {
    guid: BuildId,
}

async fn create_build(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<CreatedResponse>), ApiError> {
    let build: Build = serde_json::from_slice(&body)?;
    info!(build = %build.guid, image = %build.config.image, "Build submitted");

    let guid = state.scheduler.start(build).map_err(|err| match err {
        prole_core::Error::InvalidInput(msg) => ApiError::Conflict(msg),
        other => other.into(),
    })?;

    Ok((StatusCode::CREATED, Json(CreatedResponse { guid })))
}

#[derive(Debug, Serialize)]
struct BuildResponse {
    guid: BuildId,
    #[serde(flatten)]
    run: RunState,
    events: Vec<BuildEvent>,
}

async fn get_build(
    State(state): State<AppState>,
    Path(guid): Path<BuildId>,
) -> Result<Json<BuildResponse>, ApiError> {
    let not_found = || ApiError::NotFound(format!("build {} not found", guid));
    let run = state.scheduler.status(guid).ok_or_else(not_found)?;
    let hub = state.scheduler.hub(guid).ok_or_else(not_found)?;

    Ok(Json(BuildResponse {
        guid,
        run,
        events: hub.snapshot(),
    }))
}
