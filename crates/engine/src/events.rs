//! Progress events emitted while an engine runs.
//!
//! Producers (the worker's step boundaries, the converter's stderr
//! interpreter) push onto an unbounded channel; a single consumer folds
//! the events into the job's step tracker. Timestamps ride along as
//! fractional Unix seconds so events are ordered by when they happened,
//! not when they were consumed.

use tokio::sync::mpsc;

/// One observed change in job progress.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    StepStarted { name: String, timestamp: f64 },
    StepCompleted { name: String, timestamp: f64 },
    StepFailed { name: String, timestamp: f64 },
    SubStepStarted { name: String, timestamp: f64 },
    SubStepCompleted { name: String, timestamp: f64 },
}

pub type ProgressSender = mpsc::UnboundedSender<ProgressEvent>;
pub type ProgressReceiver = mpsc::UnboundedReceiver<ProgressEvent>;

/// Create a progress channel.
pub fn channel() -> (ProgressSender, ProgressReceiver) {
    mpsc::unbounded_channel()
}
