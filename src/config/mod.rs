//! Configuration for the orchestrator and prompt texts.

mod prompts;

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::agent::{StagnationConfig, DEFAULT_CONTEXT_WINDOW};
use crate::fusion::FusionConfig;

pub use prompts::{
    action_system_prompt, completion_system_prompt, progress_system_prompt,
    strategic_system_prompt,
};

/// Tunables for one task run.
///
/// Every threshold the control loop consults lives here; nothing is hard-coded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Iteration cap; reaching it without confirmed completion times the task out.
    pub max_iterations: u32,
    /// Number of final iterations in which the last-resort consult may fire.
    pub last_resort_window: u32,
    /// Failures since the last adopted plan that call for recovery planning.
    pub failure_threshold: u32,
    /// Iterations that must pass after a consult before failures trigger another.
    pub consult_cooldown: u32,
    /// Iterations between progress self-checks.
    pub progress_check_interval: u32,
    /// Failure increment applied when a completion claim is for the wrong task.
    pub wrong_task_penalty: u32,
    /// Non-pinned context entries retained.
    pub context_window: usize,
    /// Failure records retained for planner context.
    pub failure_history: usize,
    /// Background planning jobs older than this are discarded.
    #[serde(with = "duration_secs")]
    pub planning_job_timeout: Duration,
    /// Bound on the blocking last-resort consult.
    #[serde(with = "duration_secs")]
    pub last_resort_timeout: Duration,
    /// Pause between dispatching a step and recapturing.
    #[serde(with = "duration_millis")]
    pub settle_delay: Duration,
    /// Longest local sleep for a wait step.
    #[serde(with = "duration_millis")]
    pub max_wait_step: Duration,
    pub fusion: FusionConfig,
    pub stagnation: StagnationConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            last_resort_window: 5,
            failure_threshold: 3,
            consult_cooldown: 3,
            progress_check_interval: 3,
            wrong_task_penalty: 3,
            context_window: DEFAULT_CONTEXT_WINDOW,
            failure_history: 10,
            planning_job_timeout: Duration::from_secs(180),
            last_resort_timeout: Duration::from_secs(90),
            settle_delay: Duration::from_millis(400),
            max_wait_step: Duration::from_secs(5),
            fusion: FusionConfig::default(),
            stagnation: StagnationConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max;
        self
    }

    pub fn with_last_resort_window(mut self, window: u32) -> Self {
        self.last_resort_window = window;
        self
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn with_consult_cooldown(mut self, cooldown: u32) -> Self {
        self.consult_cooldown = cooldown;
        self
    }

    pub fn with_progress_check_interval(mut self, interval: u32) -> Self {
        self.progress_check_interval = interval;
        self
    }

    pub fn with_wrong_task_penalty(mut self, penalty: u32) -> Self {
        self.wrong_task_penalty = penalty;
        self
    }

    pub fn with_context_window(mut self, window: usize) -> Self {
        self.context_window = window;
        self
    }

    pub fn with_planning_job_timeout(mut self, timeout: Duration) -> Self {
        self.planning_job_timeout = timeout;
        self
    }

    pub fn with_last_resort_timeout(mut self, timeout: Duration) -> Self {
        self.last_resort_timeout = timeout;
        self
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    pub fn with_fusion(mut self, fusion: FusionConfig) -> Self {
        self.fusion = fusion;
        self
    }

    pub fn with_stagnation(mut self, stagnation: StagnationConfig) -> Self {
        self.stagnation = stagnation;
        self
    }

    /// First iteration of the last-resort window.
    pub fn last_resort_start(&self) -> u32 {
        self.max_iterations.saturating_sub(self.last_resort_window) + 1
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
