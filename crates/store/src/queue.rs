//! Single-concurrency work queue.
//!
//! Job IDs wait in the `queue:list` Redis list; payloads live beside it
//! under `queue:payload:{id}` with their own TTL so an abandoned queue
//! drains itself. `queue:lock` holds the ID of the job currently being
//! processed and doubles as the concurrency gate: a dequeue only happens
//! while the lock is absent. The lock's TTL is the crash backstop; if a
//! worker dies without releasing, the gate reopens on its own.
//!
//! The dequeue is deliberately non-transactional. There is exactly one
//! consumer, so the check-then-claim window cannot race another worker.

use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use docflow_core::types::JobId;

use crate::StoreError;

const QUEUE_KEY: &str = "queue:list";
const LOCK_KEY: &str = "queue:lock";
const PAYLOAD_PREFIX: &str = "queue:payload:";

/// How long a processing lock survives a crashed worker.
pub const LOCK_TTL_SECS: u64 = 3_600;

/// How long an enqueued payload waits to be picked up.
pub const PAYLOAD_TTL_SECS: u64 = 3_600;

fn payload_key(job_id: &str) -> String {
    format!("{PAYLOAD_PREFIX}{job_id}")
}

/// A claimed queue entry.
#[derive(Debug)]
pub struct DequeuedJob {
    pub job_id: String,
    pub payload: serde_json::Value,
}

/// Handle to the work queue.
#[derive(Clone)]
pub struct WorkQueue {
    conn: ConnectionManager,
}

impl WorkQueue {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    /// Drop the lock, the pending list, and all payloads. Called once at
    /// worker startup so state left behind by a crash cannot block the
    /// queue for the full lock TTL.
    pub async fn clear_stale_state(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(LOCK_KEY).await?;
        let _: () = conn.del(QUEUE_KEY).await?;

        let mut payload_keys: Vec<String> = Vec::new();
        {
            let mut iter = conn
                .scan_match::<_, String>(format!("{PAYLOAD_PREFIX}*"))
                .await?;
            while let Some(key) = iter.next_item().await {
                payload_keys.push(key);
            }
        }
        if !payload_keys.is_empty() {
            let _: () = conn.del(payload_keys).await?;
        }
        Ok(())
    }

    /// Store the payload and append the job ID to the pending list.
    pub async fn enqueue(
        &self,
        job_id: JobId,
        payload: &serde_json::Value,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let id = job_id.to_string();
        let raw = serde_json::to_string(payload)?;
        let _: () = conn.set_ex(payload_key(&id), raw, PAYLOAD_TTL_SECS).await?;
        let _: () = conn.rpush(QUEUE_KEY, &id).await?;
        Ok(())
    }

    /// Claim the next job if no job is currently being processed.
    ///
    /// Returns `None` when the lock is held, the list is empty, or the
    /// popped entry's payload has expired (in which case the entry is
    /// discarded and the next poll moves on).
    pub async fn dequeue_if_idle(&self) -> Result<Option<DequeuedJob>, StoreError> {
        let mut conn = self.conn.clone();

        let lock: Option<String> = conn.get(LOCK_KEY).await?;
        if lock.is_some() {
            return Ok(None);
        }

        let popped: Option<String> = conn.lpop(QUEUE_KEY, None).await?;
        let Some(job_id) = popped else {
            return Ok(None);
        };

        let raw: Option<String> = conn.get(payload_key(&job_id)).await?;
        let Some(raw) = raw else {
            tracing::warn!(job_id = %job_id, "Dequeued job has no payload, skipping");
            return Ok(None);
        };
        let payload: serde_json::Value = serde_json::from_str(&raw)?;

        let _: () = conn.set_ex(LOCK_KEY, &job_id, LOCK_TTL_SECS).await?;
        Ok(Some(DequeuedJob { job_id, payload }))
    }

    /// Release the processing lock and drop the job's payload. Safe to
    /// call for a job that was never locked.
    pub async fn release(&self, job_id: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(LOCK_KEY).await?;
        let _: () = conn.del(payload_key(job_id)).await?;
        Ok(())
    }

    /// Number of jobs waiting in the pending list.
    pub async fn queue_depth(&self) -> Result<usize, StoreError> {
        let mut conn = self.conn.clone();
        let depth: usize = conn.llen(QUEUE_KEY).await?;
        Ok(depth)
    }

    /// ID of the job currently holding the processing lock, if any.
    pub async fn processing_job(&self) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        let lock: Option<String> = conn.get(LOCK_KEY).await?;
        Ok(lock)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // These run against a live Redis instance and are skipped by default;
    // run them with `cargo test -p docflow-store -- --ignored`. Each test
    // uses its own logical database so they cannot interfere with one
    // another or with a local deployment.
    async fn queue_on_db(db: u8) -> WorkQueue {
        let url = format!("redis://127.0.0.1:6379/{db}");
        let conn = crate::connect(&url).await.expect("test Redis not reachable");
        let queue = WorkQueue::new(conn);
        queue.clear_stale_state().await.unwrap();
        queue
    }

    fn payload(n: u32) -> serde_json::Value {
        serde_json::json!({ "n": n })
    }

    #[tokio::test]
    #[ignore]
    async fn release_is_idempotent() {
        let queue = queue_on_db(12).await;
        let id = JobId::new_v4();
        queue.enqueue(id, &payload(1)).await.unwrap();

        let job = queue.dequeue_if_idle().await.unwrap().unwrap();
        assert_eq!(job.job_id, id.to_string());
        assert_eq!(queue.processing_job().await.unwrap(), Some(id.to_string()));

        queue.release(&job.job_id).await.unwrap();
        queue.release(&job.job_id).await.unwrap();
        assert_eq!(queue.processing_job().await.unwrap(), None);

        // Releasing a job that was never locked is also fine.
        queue.release("never-dequeued").await.unwrap();
    }

    #[tokio::test]
    #[ignore]
    async fn jobs_dequeue_in_submission_order() {
        let queue = queue_on_db(13).await;
        let ids = [JobId::new_v4(), JobId::new_v4(), JobId::new_v4()];
        for (n, id) in ids.iter().enumerate() {
            queue.enqueue(*id, &payload(n as u32)).await.unwrap();
        }

        for id in &ids {
            let job = queue.dequeue_if_idle().await.unwrap().unwrap();
            assert_eq!(job.job_id, id.to_string());
            queue.release(&job.job_id).await.unwrap();
        }
        assert!(queue.dequeue_if_idle().await.unwrap().is_none());
    }

    #[tokio::test]
    #[ignore]
    async fn dequeue_refused_while_a_job_is_locked() {
        let queue = queue_on_db(14).await;
        let first = JobId::new_v4();
        let second = JobId::new_v4();
        queue.enqueue(first, &payload(1)).await.unwrap();
        queue.enqueue(second, &payload(2)).await.unwrap();

        let job = queue.dequeue_if_idle().await.unwrap().unwrap();
        assert_eq!(job.job_id, first.to_string());

        // The second job stays queued until the first is released.
        assert!(queue.dequeue_if_idle().await.unwrap().is_none());
        assert_eq!(queue.queue_depth().await.unwrap(), 1);

        queue.release(&job.job_id).await.unwrap();
        let job = queue.dequeue_if_idle().await.unwrap().unwrap();
        assert_eq!(job.job_id, second.to_string());
    }

    #[tokio::test]
    #[ignore]
    async fn startup_cleanup_unblocks_an_abandoned_lock() {
        let queue = queue_on_db(15).await;
        let abandoned = JobId::new_v4();
        queue.enqueue(abandoned, &payload(1)).await.unwrap();
        let job = queue.dequeue_if_idle().await.unwrap().unwrap();
        assert_eq!(job.job_id, abandoned.to_string());
        // No release: simulates a process dying mid-job.

        let restarted = queue_on_db(15).await;
        let next = JobId::new_v4();
        restarted.enqueue(next, &payload(2)).await.unwrap();
        let job = restarted.dequeue_if_idle().await.unwrap().unwrap();
        assert_eq!(job.job_id, next.to_string());
    }
}
