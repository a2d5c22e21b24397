//! Executes one extraction job end to end.
//!
//! A job moves through three main steps, fetching the document,
//! converting it, and extracting fields, with conversion sub-steps
//! discovered from the engine's output as it runs. Both terminal
//! outcomes are written twice: the database row is authoritative, the
//! live store is what clients watch.

use std::path::PathBuf;
use std::time::Instant;

use docflow_core::status::JobStatus;
use docflow_core::types::JobId;
use docflow_db::repositories::execution_repo::ExecutionRepo;
use docflow_engine::events;
use docflow_engine::EngineError;
use docflow_store::StoreError;

use crate::progress::{self, ProgressTracker};
use crate::{JobPayload, WorkerContext};

pub const STEP_FETCH: &str = "Fetching document";
pub const STEP_CONVERT: &str = "Converting document";
pub const STEP_EXTRACT: &str = "Extracting fields";

/// Errors that fail a job.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("document download failed: {0}")]
    Fetch(#[from] reqwest::Error),

    #[error("invalid job input: {0}")]
    Input(String),

    #[error("{0}")]
    Internal(String),
}

/// A document staged on disk for the converter. Downloads are deleted on
/// drop; caller-supplied paths are left in place.
#[derive(Debug)]
struct StagedDocument {
    path: PathBuf,
    owned: bool,
}

impl Drop for StagedDocument {
    fn drop(&mut self) {
        if !self.owned {
            return;
        }
        if let Err(err) = std::fs::remove_file(&self.path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %self.path.display(), error = %err, "Failed to remove staged document");
            }
        }
    }
}

/// Run a job and record its terminal outcome.
pub async fn process_job(ctx: WorkerContext, payload: JobPayload) -> Result<(), JobError> {
    let job_id = payload.job_id;
    let started = Instant::now();
    match run(&ctx, payload).await {
        Ok(result) => {
            record_success(&ctx, job_id, &result, started.elapsed().as_secs_f64()).await;
            Ok(())
        }
        Err(err) => {
            record_failure(&ctx, job_id, &err.to_string(), started.elapsed().as_secs_f64()).await;
            Err(err)
        }
    }
}

async fn run(ctx: &WorkerContext, payload: JobPayload) -> Result<serde_json::Value, JobError> {
    let job_id = payload.job_id;
    let mut tracker = ProgressTracker::new(job_id, ctx.store.clone());

    if !ExecutionRepo::mark_processing(&ctx.pool, job_id).await? {
        tracing::warn!(job_id = %job_id, "Execution was not pending when picked up");
    }
    tracker.set_status(JobStatus::Processing).await;

    // Fetch.
    tracker.start_step(STEP_FETCH).await;
    let document = match fetch_document(&ctx.http, &payload).await {
        Ok(doc) => {
            tracker.complete_step(STEP_FETCH).await;
            doc
        }
        Err(err) => {
            tracker.fail_step(STEP_FETCH).await;
            return Err(err);
        }
    };

    // Convert, with engine chatter folded in as sub-steps.
    tracker.start_step(STEP_CONVERT).await;
    let (tx, rx) = events::channel();
    let consumer = tokio::spawn(progress::consume(rx, tracker));
    let conversion = ctx
        .converter
        .convert(&document.path, &payload.options, &tx)
        .await;
    drop(tx);
    let mut tracker = consumer
        .await
        .map_err(|err| JobError::Internal(format!("progress consumer aborted: {err}")))?;
    let conversion = match conversion {
        Ok(out) => {
            tracker.complete_step(STEP_CONVERT).await;
            out
        }
        Err(err) => {
            tracker.fail_step(STEP_CONVERT).await;
            return Err(err.into());
        }
    };

    // Extract.
    tracker.start_step(STEP_EXTRACT).await;
    let fields = match ctx
        .extractor
        .extract(
            &conversion.text,
            &payload.schema,
            payload.instructions.as_deref(),
        )
        .await
    {
        Ok(fields) => {
            tracker.complete_step(STEP_EXTRACT).await;
            fields
        }
        Err(err) => {
            tracker.fail_step(STEP_EXTRACT).await;
            return Err(err.into());
        }
    };

    Ok(serde_json::json!({
        "fields": fields,
        "metadata": conversion.metadata,
    }))
}

/// Resolve the job's document to a path on disk, downloading it when the
/// input is a URL.
async fn fetch_document(
    http: &reqwest::Client,
    payload: &JobPayload,
) -> Result<StagedDocument, JobError> {
    if let Some(url) = &payload.document_url {
        let response = http.get(url).send().await?.error_for_status()?;
        let bytes = response.bytes().await?;
        let path = std::env::temp_dir().join(format!("docflow-{}.bin", payload.job_id));
        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|err| JobError::Internal(format!("failed to stage document: {err}")))?;
        return Ok(StagedDocument { path, owned: true });
    }
    if let Some(raw) = &payload.document_path {
        let path = PathBuf::from(raw);
        if !path.is_file() {
            return Err(JobError::Input(format!("document not found: {raw}")));
        }
        return Ok(StagedDocument { path, owned: false });
    }
    Err(JobError::Input(
        "job has neither document_url nor document_path".into(),
    ))
}

/// Write both terminal success records. Each write is best-effort on its
/// own; a store hiccup must not undo a recorded database result.
pub async fn record_success(
    ctx: &WorkerContext,
    job_id: JobId,
    result: &serde_json::Value,
    processing_time_secs: f64,
) {
    match ExecutionRepo::complete(&ctx.pool, job_id, result, processing_time_secs).await {
        Ok(true) => {}
        Ok(false) => tracing::warn!(job_id = %job_id, "Completion skipped, row already terminal"),
        Err(err) => tracing::error!(job_id = %job_id, error = %err, "Failed to record completion"),
    }
    let outcome = ctx
        .store
        .update(job_id, |live| {
            live.status = JobStatus::Completed;
            live.current_step = None;
            live.result = Some(result.clone());
            live.processing_time_secs = Some(processing_time_secs);
        })
        .await;
    if let Err(err) = outcome {
        tracing::warn!(job_id = %job_id, error = %err, "Failed to publish completion");
    }
}

/// Write both terminal failure records.
pub async fn record_failure(
    ctx: &WorkerContext,
    job_id: JobId,
    message: &str,
    processing_time_secs: f64,
) {
    match ExecutionRepo::fail(&ctx.pool, job_id, message, processing_time_secs).await {
        Ok(true) => {}
        Ok(false) => tracing::warn!(job_id = %job_id, "Failure skipped, row already terminal"),
        Err(err) => tracing::error!(job_id = %job_id, error = %err, "Failed to record failure"),
    }
    let message = message.to_string();
    let outcome = ctx
        .store
        .update(job_id, |live| {
            live.status = JobStatus::Failed;
            live.current_step = None;
            live.error_message = Some(message);
            live.processing_time_secs = Some(processing_time_secs);
        })
        .await;
    if let Err(err) = outcome {
        tracing::warn!(job_id = %job_id, error = %err, "Failed to publish failure");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docflow_engine::ConvertOptions;

    fn payload_with(url: Option<&str>, path: Option<&str>) -> JobPayload {
        JobPayload {
            job_id: JobId::new_v4(),
            document_url: url.map(str::to_string),
            document_path: path.map(str::to_string),
            schema: serde_json::json!({"type": "object"}),
            instructions: None,
            options: ConvertOptions::default(),
        }
    }

    #[tokio::test]
    async fn missing_local_document_is_an_input_error() {
        let http = reqwest::Client::new();
        let payload = payload_with(None, Some("/no/such/file.pdf"));
        let err = fetch_document(&http, &payload).await.unwrap_err();
        assert!(matches!(err, JobError::Input(_)), "got: {err}");
    }

    #[tokio::test]
    async fn no_input_at_all_is_an_input_error() {
        let http = reqwest::Client::new();
        let payload = payload_with(None, None);
        let err = fetch_document(&http, &payload).await.unwrap_err();
        assert!(matches!(err, JobError::Input(_)), "got: {err}");
    }

    #[tokio::test]
    async fn caller_supplied_document_survives_the_staging_guard() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let raw = file.path().to_string_lossy().into_owned();
        let http = reqwest::Client::new();
        let payload = payload_with(None, Some(&raw));

        let staged = fetch_document(&http, &payload).await.unwrap();
        assert_eq!(staged.path, file.path());
        drop(staged);
        // Only downloads are cleaned up; the caller's file stays.
        assert!(file.path().is_file());
    }
}
