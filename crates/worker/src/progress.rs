//! Folds progress events into a job's step tracker and mirrors every
//! change to the live status store.

use docflow_core::status::JobStatus;
use docflow_core::steps::StepTracker;
use docflow_core::types::JobId;
use docflow_engine::events::{ProgressEvent, ProgressReceiver};
use docflow_store::{JobState, StatusStore};

/// Per-job progress state with write-through to the store.
pub struct ProgressTracker {
    job_id: JobId,
    steps: StepTracker,
    store: StatusStore,
    status: JobStatus,
}

impl ProgressTracker {
    pub fn new(job_id: JobId, store: StatusStore) -> Self {
        Self {
            job_id,
            steps: StepTracker::new(),
            store,
            status: JobStatus::Processing,
        }
    }

    pub async fn set_status(&mut self, status: JobStatus) {
        self.status = status;
        self.flush().await;
    }

    pub async fn start_step(&mut self, name: &str) {
        self.steps.start_step(name, None);
        self.flush().await;
    }

    pub async fn complete_step(&mut self, name: &str) {
        self.steps.complete_step(name, None);
        self.flush().await;
    }

    pub async fn fail_step(&mut self, name: &str) {
        self.steps.fail_step(name, None);
        self.flush().await;
    }

    pub async fn apply(&mut self, event: ProgressEvent) {
        match event {
            ProgressEvent::StepStarted { name, timestamp } => {
                self.steps.start_step(&name, Some(timestamp));
            }
            ProgressEvent::StepCompleted { name, timestamp } => {
                self.steps.complete_step(&name, Some(timestamp));
            }
            ProgressEvent::StepFailed { name, timestamp } => {
                self.steps.fail_step(&name, Some(timestamp));
            }
            ProgressEvent::SubStepStarted { name, timestamp } => {
                self.steps.start_sub_step(&name, Some(timestamp));
            }
            ProgressEvent::SubStepCompleted { name, timestamp } => {
                self.steps.complete_sub_step(&name, Some(timestamp));
            }
        }
        self.flush().await;
    }

    /// Write the current view to the store. A write failure downgrades to
    /// a warning; live progress is best-effort and the database record is
    /// the one that matters.
    async fn flush(&self) {
        let status = self.status;
        let steps = self.steps.snapshot();
        let current_step = self.steps.current_step().map(str::to_string);
        let outcome = self
            .store
            .update(self.job_id, |live: &mut JobState| {
                live.status = status;
                live.steps = steps;
                live.current_step = current_step;
            })
            .await;
        if let Err(err) = outcome {
            tracing::warn!(job_id = %self.job_id, error = %err, "Failed to publish live progress");
        }
    }

}

/// Drain a progress channel into the tracker until the senders hang up,
/// then hand the tracker back.
pub async fn consume(mut rx: ProgressReceiver, mut tracker: ProgressTracker) -> ProgressTracker {
    while let Some(event) = rx.recv().await {
        tracker.apply(event).await;
    }
    tracker
}
