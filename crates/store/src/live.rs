//! Live job state cache.
//!
//! One JSON document per job under `job:{id}`, expiring after
//! [`LIVE_STATE_TTL_SECS`]. This is the fast, lossy view the status
//! gateway serves from; the database row stays authoritative.

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};

use docflow_core::status::JobStatus;
use docflow_core::steps::{unix_now, Step};
use docflow_core::types::JobId;

use crate::StoreError;

/// Cached state lives for a day, long enough for clients to come back for
/// results without the cache growing unbounded.
pub const LIVE_STATE_TTL_SECS: u64 = 86_400;

fn state_key(job_id: JobId) -> String {
    format!("job:{job_id}")
}

/// The live view of a job as served to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobState {
    pub status: JobStatus,
    pub steps: Vec<Step>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_step: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_time_secs: Option<f64>,
    /// Fractional Unix seconds of the last write.
    pub updated_at: f64,
}

impl JobState {
    /// Fresh state for a just-submitted job.
    pub fn pending() -> Self {
        Self {
            status: JobStatus::Pending,
            steps: Vec::new(),
            current_step: None,
            result: None,
            error_message: None,
            processing_time_secs: None,
            updated_at: unix_now(),
        }
    }
}

/// Handle to the live state cache.
#[derive(Clone)]
pub struct StatusStore {
    conn: ConnectionManager,
}

impl StatusStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    /// Overwrite a job's live state, refreshing its TTL.
    pub async fn put(&self, job_id: JobId, state: &JobState) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let payload = serde_json::to_string(state)?;
        let _: () = conn
            .set_ex(state_key(job_id), payload, LIVE_STATE_TTL_SECS)
            .await?;
        Ok(())
    }

    /// Fetch a job's live state, if present and not expired.
    pub async fn get(&self, job_id: JobId) -> Result<Option<JobState>, StoreError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(state_key(job_id)).await?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Read-modify-write a job's state. Missing or expired state starts
    /// from [`JobState::pending`]. The single worker is the only writer
    /// during processing, so this needs no cross-process coordination.
    pub async fn update<F>(&self, job_id: JobId, mutate: F) -> Result<JobState, StoreError>
    where
        F: FnOnce(&mut JobState),
    {
        let mut state = self.get(job_id).await?.unwrap_or_else(JobState::pending);
        mutate(&mut state);
        state.updated_at = unix_now();
        self.put(job_id, &state).await?;
        Ok(state)
    }

    /// Verify the store is reachable.
    pub async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_state_serializes_without_empty_optionals() {
        let state = JobState::pending();
        let value = serde_json::to_value(&state).unwrap();
        let obj = value.as_object().unwrap();
        assert_eq!(obj["status"], "pending");
        assert!(!obj.contains_key("result"));
        assert!(!obj.contains_key("error_message"));
        assert!(!obj.contains_key("current_step"));
    }

    #[test]
    fn state_round_trips_through_json() {
        let mut state = JobState::pending();
        state.status = JobStatus::Completed;
        state.result = Some(serde_json::json!({"fields": {"total": 12}}));
        state.processing_time_secs = Some(4.2);

        let raw = serde_json::to_string(&state).unwrap();
        let back: JobState = serde_json::from_str(&raw).unwrap();
        assert_eq!(back.status, JobStatus::Completed);
        assert_eq!(back.processing_time_secs, Some(4.2));
        assert!(back.result.is_some());
    }
}
