//! Background worker: polls the queue, runs jobs one at a time, and
//! guarantees the processing lock is released whatever happens to the
//! job, including a panic inside it.

pub mod progress;
pub mod runner;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use docflow_core::types::JobId;
use docflow_db::DbPool;
use docflow_engine::{ConvertOptions, DocumentConverter, ExtractionClient};
use docflow_store::{StatusStore, WorkQueue};

/// Queue payload describing one extraction job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobPayload {
    pub job_id: JobId,
    #[serde(default)]
    pub document_url: Option<String>,
    #[serde(default)]
    pub document_path: Option<String>,
    pub schema: serde_json::Value,
    #[serde(default)]
    pub instructions: Option<String>,
    #[serde(default)]
    pub options: ConvertOptions,
}

/// Everything a job run needs, cheap to clone into the spawned task.
#[derive(Clone)]
pub struct WorkerContext {
    pub pool: DbPool,
    pub store: StatusStore,
    pub converter: Arc<dyn DocumentConverter>,
    pub extractor: Arc<ExtractionClient>,
    /// Shared client for document downloads; reuses connections across jobs.
    pub http: reqwest::Client,
}

fn decode_payload(raw: serde_json::Value) -> Result<JobPayload, String> {
    serde_json::from_value(raw).map_err(|err| format!("invalid job payload: {err}"))
}

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);
const ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// The polling worker loop.
pub struct ExtractionWorker {
    ctx: WorkerContext,
    queue: WorkQueue,
    poll_interval: Duration,
}

impl ExtractionWorker {
    pub fn new(ctx: WorkerContext, queue: WorkQueue) -> Self {
        Self {
            ctx,
            queue,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Run until the token is cancelled.
    ///
    /// Starts by clearing any queue state a previous process left behind;
    /// deployments run exactly one worker, so anything found at startup
    /// is stale by definition.
    pub async fn run(self, cancel: CancellationToken) {
        if let Err(err) = self.queue.clear_stale_state().await {
            tracing::error!(error = %err, "Failed to clear stale queue state");
        }
        tracing::info!("Extraction worker started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Extraction worker shutting down");
                    return;
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }

            match self.queue.dequeue_if_idle().await {
                Ok(Some(job)) => self.process(job.job_id, job.payload).await,
                Ok(None) => {}
                Err(err) => {
                    tracing::error!(error = %err, "Queue poll failed");
                    tokio::time::sleep(ERROR_BACKOFF).await;
                }
            }
        }
    }

    /// Run one claimed job and always release the lock afterwards.
    ///
    /// The job body runs in its own task so a panic surfaces here as a
    /// `JoinError` instead of taking the loop down with it.
    async fn process(&self, job_id: String, payload: serde_json::Value) {
        match decode_payload(payload) {
            Ok(payload) => {
                let ctx = self.ctx.clone();
                let handle = tokio::spawn(runner::process_job(ctx, payload));
                match handle.await {
                    Ok(Ok(())) => tracing::info!(job_id = %job_id, "Job completed"),
                    Ok(Err(err)) => {
                        tracing::error!(job_id = %job_id, error = %err, "Job failed")
                    }
                    Err(join_err) => {
                        tracing::error!(job_id = %job_id, error = %join_err, "Job panicked");
                        if let Ok(id) = job_id.parse::<JobId>() {
                            runner::record_failure(
                                &self.ctx,
                                id,
                                &format!("job aborted: {join_err}"),
                                0.0,
                            )
                            .await;
                        }
                    }
                }
            }
            Err(message) => {
                // The job can never run; fail its execution so clients
                // are not left polling a permanently pending record.
                tracing::error!(job_id = %job_id, error = %message, "Undecodable job payload");
                if let Ok(id) = job_id.parse::<JobId>() {
                    runner::record_failure(&self.ctx, id, &message, 0.0).await;
                }
            }
        }

        if let Err(err) = self.queue.release(&job_id).await {
            tracing::error!(job_id = %job_id, error = %err, "Failed to release processing lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_decodes_with_minimal_fields() {
        let raw = serde_json::json!({
            "job_id": "4b1c2f39-9f2e-4d6a-9b35-0a4e86b2a6a1",
            "schema": {"type": "object"},
        });
        let payload: JobPayload = serde_json::from_value(raw).unwrap();
        assert!(payload.document_url.is_none());
        assert!(payload.document_path.is_none());
        assert!(payload.instructions.is_none());
        assert!(!payload.options.force_ocr);
    }

    #[test]
    fn payload_round_trips() {
        let payload = JobPayload {
            job_id: uuid::Uuid::new_v4(),
            document_url: Some("https://example.com/invoice.pdf".into()),
            document_path: None,
            schema: serde_json::json!({"type": "object"}),
            instructions: Some("extract totals".into()),
            options: ConvertOptions::default(),
        };
        let value = serde_json::to_value(&payload).unwrap();
        let back: JobPayload = serde_json::from_value(value).unwrap();
        assert_eq!(back.job_id, payload.job_id);
        assert_eq!(back.document_url.as_deref(), Some("https://example.com/invoice.pdf"));
    }

    #[test]
    fn undecodable_payload_yields_a_failure_message() {
        let raw = serde_json::json!({"job_id": "not-a-uuid", "schema": {}});
        let err = decode_payload(raw).unwrap_err();
        assert!(err.starts_with("invalid job payload:"), "got: {err}");

        let raw = serde_json::json!({"schema": {}});
        assert!(decode_payload(raw).is_err());
    }
}
