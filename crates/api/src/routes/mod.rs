//! Route registration.
//!
//! API v1 route tree (mounted under `/api/v1`):
//!
//! | Method | Path                  | Handler                 |
//! |--------|-----------------------|-------------------------|
//! | POST   | `/jobs`               | submit a job            |
//! | POST   | `/jobs/sync`          | submit and wait         |
//! | GET    | `/jobs/{id}`          | job status              |
//! | GET    | `/jobs/{id}/result`   | extraction result       |
//! | GET    | `/jobs/{id}/stream`   | SSE status stream       |
//! | GET    | `/queue`              | queue introspection     |
//!
//! `/health` is mounted at the root, outside the version prefix.

pub mod health;
pub mod jobs;

use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/jobs", post(jobs::submit))
        .route("/jobs/sync", post(jobs::submit_sync))
        .route("/jobs/{id}", get(jobs::get_job))
        .route("/jobs/{id}/result", get(jobs::get_job_result))
        .route("/jobs/{id}/stream", get(jobs::stream_job))
        .route("/queue", get(jobs::queue_status))
}
