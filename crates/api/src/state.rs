//! Shared application state injected into all handlers.

use std::sync::Arc;

use docflow_db::DbPool;
use docflow_store::{StatusStore, WorkQueue};

use crate::config::ServerConfig;

/// Cloned into each handler via axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub store: StatusStore,
    pub queue: WorkQueue,
    pub config: Arc<ServerConfig>,
}
