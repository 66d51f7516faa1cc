//! Task status, failure records and the mutable loop state.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::events::EventRecord;
use super::slot::PlanningSlot;
use crate::device::FailureKind;

/// Terminal status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Complete,
    Failed,
    Stopped,
    TimedOut,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Complete => "COMPLETE",
            Self::Failed => "FAILED",
            Self::Stopped => "STOPPED",
            Self::TimedOut => "TIMED_OUT",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureOrigin {
    /// A dispatched step failed verification after its retry.
    Step,
    /// A completion claim was rejected.
    CompletionRejected,
    /// A completion claim was rejected as belonging to a different task.
    WrongTask,
}

/// One recorded failure, fed back to the planners.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub diagnosis: String,
    pub kind: Option<FailureKind>,
    pub iteration: u32,
    pub origin: FailureOrigin,
}

impl FailureRecord {
    pub fn new(diagnosis: impl Into<String>, iteration: u32, origin: FailureOrigin) -> Self {
        Self {
            diagnosis: diagnosis.into(),
            kind: None,
            iteration,
            origin,
        }
    }

    pub fn with_kind(mut self, kind: FailureKind) -> Self {
        self.kind = Some(kind);
        self
    }
}

/// Counters and flags owned by the control loop.
#[derive(Debug, Default)]
pub struct OrchestratorState {
    /// Iterations started so far; strictly increasing.
    pub iteration: u32,
    pub failures_since_last_plan: u32,
    /// Iteration of the last strategic consult (0 = never).
    pub last_consult: u32,
    /// Iteration of the last progress self-check (0 = never).
    pub last_progress_check: u32,
    /// Iteration of the last completion claim (0 = never).
    pub last_completion_signal: u32,
    /// At most one outstanding strategic planning job.
    pub planning: PlanningSlot,
    /// A failure-driven consult that is waiting for the slot to free up.
    pub recovery_deferred: bool,
    pub complete: bool,
    pub last_resort_used: bool,
}

impl OrchestratorState {
    pub fn new(planning: PlanningSlot) -> Self {
        Self {
            planning,
            ..Default::default()
        }
    }

    pub fn iterations_since(&self, mark: u32) -> u32 {
        self.iteration.saturating_sub(mark)
    }
}

/// Final result of a task run.
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub task_id: String,
    pub task: String,
    pub status: TaskStatus,
    pub iterations: u32,
    /// Human-readable final message.
    pub message: String,
    pub duration: Duration,
    /// Every event emitted for the task, in order.
    pub events: Vec<EventRecord>,
}

impl TaskOutcome {
    pub fn is_success(&self) -> bool {
        self.status == TaskStatus::Complete
    }
}
