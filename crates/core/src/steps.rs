//! Step/sub-step progress state machine.
//!
//! A job's progress is an ordered list of [`Step`]s discovered dynamically
//! as the worker and the conversion engine report activity. At most one
//! step is `in_progress` at any time: starting a step force-completes
//! whichever step was still running, so a missed completion signal can
//! never wedge the display. The same rule applies to sub-steps within a
//! step.
//!
//! Completed durations are floored at [`MIN_DURATION_SECS`] so clock skew
//! or missing start events can never produce zero or negative durations.
//! Step timings travel as fractional Unix seconds, which is the wire
//! format of the cached live state.

use serde::{Deserialize, Serialize};

use crate::status::StepStatus;

/// Minimum duration recorded for any finished step or sub-step.
pub const MIN_DURATION_SECS: f64 = 0.001;

/// Sub-steps shorter than this are summarized into one synthetic
/// [`QUICK_OPERATIONS_NAME`] entry for display once every sub-step of the
/// parent has finished.
pub const QUICK_SUBSTEP_THRESHOLD_SECS: f64 = 0.010;

/// Display name of the synthetic aggregated sub-step.
pub const QUICK_OPERATIONS_NAME: &str = "Quick operations";

/// Current Unix time in fractional seconds.
pub fn unix_now() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// Finer-grained activity within a [`Step`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubStep {
    pub name: String,
    pub status: StepStatus,
    pub start_time: Option<f64>,
    pub end_time: Option<f64>,
    pub duration: Option<f64>,
}

/// A coarse, user-visible phase of a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub name: String,
    pub status: StepStatus,
    pub start_time: Option<f64>,
    pub end_time: Option<f64>,
    pub duration: Option<f64>,
    /// Display list: significant sub-steps plus the synthetic
    /// quick-operations summary once all sub-steps have finished.
    pub sub_steps: Vec<SubStep>,
    /// Every sub-step as reported, never aggregated.
    pub sub_steps_detailed: Vec<SubStep>,
}

impl Step {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            status: StepStatus::Pending,
            start_time: None,
            end_time: None,
            duration: None,
            sub_steps: Vec::new(),
            sub_steps_detailed: Vec::new(),
        }
    }
}

/// In-memory progress model for one job.
///
/// Steps are created lazily the first time they are observed and never
/// deleted. [`StepTracker::snapshot`] produces the display form written to
/// the shared store after every change.
#[derive(Debug, Default)]
pub struct StepTracker {
    steps: Vec<Step>,
}

impl StepTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `name` as in progress, force-completing any other step that is
    /// still running. Duplicate starts for an already-running step are
    /// no-ops on state; the live duration estimate in snapshots keeps
    /// moving regardless.
    pub fn start_step(&mut self, name: &str, timestamp: Option<f64>) {
        let at = timestamp.unwrap_or_else(unix_now);
        for step in &mut self.steps {
            if step.name != name && step.status == StepStatus::InProgress {
                finish_step(step, StepStatus::Completed, at);
            }
        }
        let idx = self.find_or_insert(name);
        let step = &mut self.steps[idx];
        if step.status == StepStatus::InProgress {
            return;
        }
        step.status = StepStatus::InProgress;
        step.start_time = Some(at);
        step.end_time = None;
        step.duration = None;
    }

    pub fn complete_step(&mut self, name: &str, timestamp: Option<f64>) {
        self.finish(name, StepStatus::Completed, timestamp);
    }

    pub fn fail_step(&mut self, name: &str, timestamp: Option<f64>) {
        self.finish(name, StepStatus::Failed, timestamp);
    }

    /// Mark a sub-step of the currently running step as in progress,
    /// force-completing any sibling that is still running. If no step is
    /// running, a generic "Processing" step is started first so the
    /// activity is never dropped on the floor.
    pub fn start_sub_step(&mut self, name: &str, timestamp: Option<f64>) {
        let at = timestamp.unwrap_or_else(unix_now);
        if self.current_index().is_none() {
            self.start_step("Processing", Some(at));
        }
        let idx = match self.current_index() {
            Some(idx) => idx,
            None => return,
        };
        let step = &mut self.steps[idx];
        for sub in &mut step.sub_steps_detailed {
            if sub.name != name && sub.status == StepStatus::InProgress {
                finish_sub_step(sub, StepStatus::Completed, at);
            }
        }
        if let Some(sub) = step.sub_steps_detailed.iter_mut().find(|s| s.name == name) {
            // Engines tend to repeat themselves; a sub-step that already
            // ran stays finished.
            if sub.status == StepStatus::Pending {
                sub.status = StepStatus::InProgress;
                sub.start_time = Some(at);
            }
            return;
        }
        step.sub_steps_detailed.push(SubStep {
            name: name.to_string(),
            status: StepStatus::InProgress,
            start_time: Some(at),
            end_time: None,
            duration: None,
        });
    }

    /// Mark a sub-step of the currently running step as finished.
    pub fn complete_sub_step(&mut self, name: &str, timestamp: Option<f64>) {
        let at = timestamp.unwrap_or_else(unix_now);
        let Some(idx) = self.current_index() else {
            return;
        };
        if let Some(sub) = self.steps[idx]
            .sub_steps_detailed
            .iter_mut()
            .find(|s| s.name == name && !s.status.is_terminal())
        {
            finish_sub_step(sub, StepStatus::Completed, at);
        }
    }

    /// Name of the step currently in progress, if any.
    pub fn current_step(&self) -> Option<&str> {
        self.current_index().map(|idx| self.steps[idx].name.as_str())
    }

    /// Display copy of all steps: live duration estimates for anything
    /// still running, and quick-operation aggregation applied to finished
    /// sub-step collections.
    pub fn snapshot(&self) -> Vec<Step> {
        let now = unix_now();
        self.steps
            .iter()
            .map(|step| {
                let mut out = step.clone();
                if out.status == StepStatus::InProgress {
                    if let Some(start) = out.start_time {
                        out.duration = Some((now - start).max(0.0));
                    }
                }
                for sub in &mut out.sub_steps_detailed {
                    if sub.status == StepStatus::InProgress {
                        if let Some(start) = sub.start_time {
                            sub.duration = Some((now - start).max(0.0));
                        }
                    }
                }
                out.sub_steps = aggregate_quick(&out.sub_steps_detailed);
                out
            })
            .collect()
    }

    fn current_index(&self) -> Option<usize> {
        self.steps
            .iter()
            .position(|s| s.status == StepStatus::InProgress)
    }

    fn find_or_insert(&mut self, name: &str) -> usize {
        if let Some(idx) = self.steps.iter().position(|s| s.name == name) {
            return idx;
        }
        self.steps.push(Step::new(name));
        self.steps.len() - 1
    }

    fn finish(&mut self, name: &str, status: StepStatus, timestamp: Option<f64>) {
        let at = timestamp.unwrap_or_else(unix_now);
        let idx = self.find_or_insert(name);
        let step = &mut self.steps[idx];
        if step.status.is_terminal() {
            return;
        }
        finish_step(step, status, at);
    }
}

fn finish_step(step: &mut Step, status: StepStatus, at: f64) {
    // A finishing step takes any still-running sub-step down with it.
    for sub in &mut step.sub_steps_detailed {
        if sub.status == StepStatus::InProgress {
            finish_sub_step(sub, StepStatus::Completed, at);
        }
    }
    step.status = status;
    step.end_time = Some(at);
    let start = step.start_time.unwrap_or(at);
    step.duration = Some((at - start).max(MIN_DURATION_SECS));
}

fn finish_sub_step(sub: &mut SubStep, status: StepStatus, at: f64) {
    sub.status = status;
    sub.end_time = Some(at);
    let start = sub.start_time.unwrap_or(at);
    sub.duration = Some((at - start).max(MIN_DURATION_SECS));
}

/// Build the display list for a sub-step collection.
///
/// While any sub-step is still running the collection is shown as-is.
/// Once all have finished, entries shorter than
/// [`QUICK_SUBSTEP_THRESHOLD_SECS`] are replaced by a single synthetic
/// [`QUICK_OPERATIONS_NAME`] entry carrying their summed duration. A lone
/// quick entry is left alone; summarizing one item hides more than it
/// helps.
fn aggregate_quick(detailed: &[SubStep]) -> Vec<SubStep> {
    if detailed.is_empty() || detailed.iter().any(|s| !s.status.is_terminal()) {
        return detailed.to_vec();
    }
    let (quick, significant): (Vec<&SubStep>, Vec<&SubStep>) = detailed
        .iter()
        .partition(|s| s.duration.unwrap_or(0.0) < QUICK_SUBSTEP_THRESHOLD_SECS);
    if quick.len() < 2 {
        return detailed.to_vec();
    }
    let mut display: Vec<SubStep> = significant.into_iter().cloned().collect();
    let start_time = quick.iter().filter_map(|s| s.start_time).fold(f64::MAX, f64::min);
    let end_time = quick.iter().filter_map(|s| s.end_time).fold(f64::MIN, f64::max);
    let total: f64 = quick.iter().filter_map(|s| s.duration).sum();
    display.push(SubStep {
        name: QUICK_OPERATIONS_NAME.to_string(),
        status: StepStatus::Completed,
        start_time: (start_time != f64::MAX).then_some(start_time),
        end_time: (end_time != f64::MIN).then_some(end_time),
        duration: Some(total.max(MIN_DURATION_SECS)),
    });
    display
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
