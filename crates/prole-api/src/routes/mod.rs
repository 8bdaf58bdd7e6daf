//! API routes.

pub mod builds;
pub mod checks;
pub mod health;

use crate::AppState;
use axum::Router;

/// Build the main API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .nest("/builds", builds::router())
        .nest("/checks", checks::router())
        .merge(health::router())
        .with_state(state)
}
