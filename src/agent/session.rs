//! Task sessions: starting, stopping and observing task runs.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::events::{EventPublisher, EventRecord, EVENT_CAPACITY};
use super::orchestrator::Orchestrator;
use super::state::TaskOutcome;
use crate::config::OrchestratorConfig;
use crate::device::{ActionExecutor, CompletionVerifier, ScreenStateProvider, Verifier};
use crate::planner::{ActionPlanner, StrategicPlanner};

/// Session control errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Task has already finished")]
    ControlClosed,
    #[error("Task runner failed: {0}")]
    Join(String),
}

/// Control messages delivered to the loop at iteration boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Control {
    Stop,
}

/// External collaborators a task runs against.
#[derive(Clone)]
pub struct Collaborators {
    pub screen: Arc<dyn ScreenStateProvider>,
    pub executor: Arc<dyn ActionExecutor>,
    pub verifier: Arc<dyn Verifier>,
    pub completion: Arc<dyn CompletionVerifier>,
    pub action_planner: Arc<dyn ActionPlanner>,
    pub strategic_planner: Arc<dyn StrategicPlanner>,
}

/// Everything fixed for the lifetime of one task.
///
/// Built by [`Agent::start_task`], borrowed by the control loop and dropped
/// when the task reaches a terminal status.
pub struct Session {
    pub task_id: String,
    pub task: String,
    pub config: OrchestratorConfig,
    pub parts: Collaborators,
}

/// Starts tasks against a fixed set of collaborators.
#[derive(Clone)]
pub struct Agent {
    config: OrchestratorConfig,
    parts: Collaborators,
}

impl Agent {
    pub fn new(config: OrchestratorConfig, parts: Collaborators) -> Self {
        Self { config, parts }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Spawn the control loop for `task` and return a handle to it.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start_task(&self, task: impl Into<String>) -> TaskHandle {
        let session = Session {
            task_id: new_task_id(),
            task: task.into(),
            config: self.config.clone(),
            parts: self.parts.clone(),
        };
        let id = session.task_id.clone();

        let (control_tx, control_rx) = mpsc::channel(8);
        let (events_tx, events_rx) = broadcast::channel(EVENT_CAPACITY);
        let publisher = EventPublisher::new(id.clone(), events_tx.clone());

        let join = tokio::spawn(async move {
            Orchestrator::new(&session, control_rx, publisher).run().await
        });

        TaskHandle {
            id,
            control: control_tx,
            events_tx,
            events: Some(events_rx),
            join,
        }
    }

    /// Run `task` to a terminal status.
    pub async fn run_task(&self, task: impl Into<String>) -> Result<TaskOutcome, SessionError> {
        self.start_task(task).wait().await
    }
}

/// Handle to a running task.
pub struct TaskHandle {
    id: String,
    control: mpsc::Sender<Control>,
    events_tx: broadcast::Sender<EventRecord>,
    events: Option<broadcast::Receiver<EventRecord>>,
    join: JoinHandle<TaskOutcome>,
}

impl TaskHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Ask the loop to stop at the next iteration boundary.
    pub async fn stop(&self) -> Result<(), SessionError> {
        self.control
            .send(Control::Stop)
            .await
            .map_err(|_| SessionError::ControlClosed)
    }

    /// Event stream from the start of the task.
    ///
    /// The first call returns a receiver that has seen every event; later
    /// calls only see events emitted after subscribing.
    pub fn events(&mut self) -> broadcast::Receiver<EventRecord> {
        self.events
            .take()
            .unwrap_or_else(|| self.events_tx.subscribe())
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the terminal outcome.
    pub async fn wait(self) -> Result<TaskOutcome, SessionError> {
        self.join
            .await
            .map_err(|e| SessionError::Join(e.to_string()))
    }
}

/// Short task id: the first 8 hex digits of a random UUID.
pub fn new_task_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_ids_are_short_and_distinct() {
        let a = new_task_id();
        let b = new_task_id();
        assert_eq!(a.len(), 8);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }
}
