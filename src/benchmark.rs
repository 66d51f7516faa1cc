//! Per-task result records and the run summary written after a batch of tasks.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::agent::{TaskOutcome, TaskStatus};

/// Status as recorded in result files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Completed,
    Failed,
    Stopped,
    Timeout,
}

impl From<TaskStatus> for ReportStatus {
    fn from(status: TaskStatus) -> Self {
        match status {
            TaskStatus::Complete => Self::Completed,
            TaskStatus::Failed => Self::Failed,
            TaskStatus::Stopped => Self::Stopped,
            TaskStatus::TimedOut => Self::Timeout,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskReport {
    pub task_id: String,
    pub task: String,
    pub status: ReportStatus,
    pub duration_ms: u64,
    pub iterations: u32,
    pub final_message: String,
}

impl From<&TaskOutcome> for TaskReport {
    fn from(outcome: &TaskOutcome) -> Self {
        Self {
            task_id: outcome.task_id.clone(),
            task: outcome.task.clone(),
            status: outcome.status.into(),
            duration_ms: outcome.duration.as_millis() as u64,
            iterations: outcome.iterations,
            final_message: outcome.message.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkSummary {
    pub model: String,
    pub total_tasks: usize,
    pub passed: usize,
    pub failed: usize,
    /// Percentage, one decimal.
    pub success_rate: f64,
    pub total_time_s: f64,
    pub results: Vec<TaskReport>,
}

impl BenchmarkSummary {
    pub fn new(model: impl Into<String>, results: Vec<TaskReport>) -> Self {
        let total_tasks = results.len();
        let passed = results
            .iter()
            .filter(|r| r.status == ReportStatus::Completed)
            .count();
        let success_rate = if total_tasks == 0 {
            0.0
        } else {
            (passed as f64 * 1000.0 / total_tasks as f64).round() / 10.0
        };
        let total_ms: u64 = results.iter().map(|r| r.duration_ms).sum();
        Self {
            model: model.into(),
            total_tasks,
            passed,
            failed: total_tasks - passed,
            success_rate,
            total_time_s: (total_ms as f64 / 100.0).round() / 10.0,
            results,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn write_to(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        fs::write(path, self.to_json()?)?;
        Ok(())
    }
}
