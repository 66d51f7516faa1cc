//! Planner contracts.
//!
//! Two decision-making components sit behind these traits: a fast action
//! planner consulted every iteration, and a slow strategic planner consulted
//! in the background. Any backend implementing them is interchangeable.

mod strategy;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::agent::{ConversationEntry, FailureRecord};
use crate::fusion::{FusedStateSnapshot, SnapshotDiff};

pub use strategy::{
    parse_planning_result, PlanningError, PlanningResult, Strategy, MAX_STRATEGIES,
    MIN_STRATEGIES,
};

/// Planner call errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlannerError {
    #[error("Planner transport failed: {0}")]
    Transport(String),
    #[error("Planner returned an unusable response: {0}")]
    InvalidResponse(String),
    #[error("Invalid planning result: {0}")]
    Planning(#[from] PlanningError),
    #[error("Planner timed out after {0:?}")]
    Timeout(Duration),
}

/// What caused a strategic planning call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanTrigger {
    Initial,
    ProgressStall,
    StepFailures,
    LastResort,
}

impl PlanTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::ProgressStall => "progress_stall",
            Self::StepFailures => "step_failures",
            Self::LastResort => "last_resort",
        }
    }
}

impl fmt::Display for PlanTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input to the fast action planner.
#[derive(Debug, Clone)]
pub struct ActionRequest {
    pub iteration: u32,
    /// Pinned task text, including any adopted guidance.
    pub task: String,
    pub snapshot: Arc<FusedStateSnapshot>,
    pub diff: SnapshotDiff,
    /// Bounded, non-pinned history, oldest first.
    pub history: Vec<ConversationEntry>,
    pub failures: Vec<FailureRecord>,
    /// Explicit instructions for this call, e.g. loop warnings.
    pub diagnostics: Vec<String>,
    /// Encoded screenshot, if the capture had one.
    pub image: Option<Arc<Vec<u8>>>,
}

/// Input to the progress self-check.
#[derive(Debug, Clone)]
pub struct ProgressCheckRequest {
    pub iteration: u32,
    pub task: String,
    pub snapshot: Arc<FusedStateSnapshot>,
    pub history: Vec<ConversationEntry>,
}

/// Answer of the progress self-check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressVerdict {
    pub progressing: bool,
    #[serde(default)]
    pub reason: String,
}

/// Input to `plan_initial`.
#[derive(Debug, Clone)]
pub struct InitialPlanRequest {
    pub task: String,
    pub snapshot: Arc<FusedStateSnapshot>,
    pub context: Vec<ConversationEntry>,
}

/// Input to `plan_recovery`.
#[derive(Debug, Clone)]
pub struct RecoveryPlanRequest {
    pub task: String,
    pub snapshot: Arc<FusedStateSnapshot>,
    pub trigger: PlanTrigger,
    pub failures: Vec<FailureRecord>,
    pub previous_plan: Option<Arc<PlanningResult>>,
    pub context: Vec<ConversationEntry>,
}

/// Low-latency planner consulted every iteration.
#[async_trait]
pub trait ActionPlanner: Send + Sync {
    /// Propose the next steps. Returns raw, untrusted text.
    async fn propose(&self, request: &ActionRequest) -> Result<String, PlannerError>;

    /// Lightweight check of whether the task is moving forward.
    async fn check_progress(
        &self,
        request: &ProgressCheckRequest,
    ) -> Result<ProgressVerdict, PlannerError>;
}

/// High-latency planner producing ranked strategies.
///
/// Requests are owned so calls can run on detached tasks.
#[async_trait]
pub trait StrategicPlanner: Send + Sync {
    async fn plan_initial(
        &self,
        request: InitialPlanRequest,
    ) -> Result<PlanningResult, PlannerError>;

    async fn plan_recovery(
        &self,
        request: RecoveryPlanRequest,
    ) -> Result<PlanningResult, PlannerError>;
}
