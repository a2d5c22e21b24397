//! Redis-backed shared state: the live job status cache and the
//! single-concurrency work queue.
//!
//! Both sides hold a [`redis::aio::ConnectionManager`], which reconnects
//! transparently and is cheap to clone, so every handle in the workspace
//! shares one underlying connection.

pub mod live;
pub mod queue;

pub use live::{JobState, StatusStore};
pub use queue::{DequeuedJob, WorkQueue};

/// Errors surfaced by store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("corrupt stored value: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Open a managed connection to the given Redis URL.
pub async fn connect(redis_url: &str) -> Result<redis::aio::ConnectionManager, StoreError> {
    let client = redis::Client::open(redis_url)?;
    let conn = client.get_connection_manager().await?;
    Ok(conn)
}
