//! Append-only per-task event stream.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use super::state::{FailureRecord, TaskStatus};
use crate::actions::Step;
use crate::planner::PlanTrigger;

/// Buffered events per subscriber before it starts lagging.
pub const EVENT_CAPACITY: usize = 256;

/// Something observable that happened while running a task.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskEvent {
    Started {
        task: String,
    },
    Iteration {
        iteration: u32,
        elements: usize,
    },
    PlanReceived {
        iteration: u32,
        summary: String,
        steps: usize,
        parse_error: bool,
    },
    StepDispatched {
        iteration: u32,
        step: Step,
        attempt: u32,
    },
    Failure {
        record: FailureRecord,
        failures_since_last_plan: u32,
    },
    Diagnostic {
        iteration: u32,
        message: String,
    },
    PlanningDispatched {
        iteration: u32,
        trigger: PlanTrigger,
    },
    /// The failure threshold was reached but the cooldown or an outstanding
    /// job holds recovery back.
    RecoveryDeferred {
        iteration: u32,
        failures_since_last_plan: u32,
    },
    PlanAdopted {
        iteration: u32,
        trigger: PlanTrigger,
        strategy: String,
    },
    PlanDiscarded {
        iteration: u32,
        trigger: PlanTrigger,
        reason: String,
    },
    CompletionRejected {
        iteration: u32,
        reason: String,
        wrong_task: bool,
    },
    Finished {
        status: TaskStatus,
        iterations: u32,
        message: String,
    },
}

/// A sequenced, timestamped event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventRecord {
    pub seq: u64,
    pub task_id: String,
    pub at: DateTime<Utc>,
    pub event: TaskEvent,
}

/// Emits events to subscribers and keeps the full journal.
#[derive(Debug)]
pub struct EventPublisher {
    task_id: String,
    next_seq: u64,
    sender: broadcast::Sender<EventRecord>,
    journal: Vec<EventRecord>,
}

impl EventPublisher {
    pub fn new(task_id: impl Into<String>, sender: broadcast::Sender<EventRecord>) -> Self {
        Self {
            task_id: task_id.into(),
            next_seq: 0,
            sender,
            journal: Vec::new(),
        }
    }

    pub fn emit(&mut self, event: TaskEvent) {
        let record = EventRecord {
            seq: self.next_seq,
            task_id: self.task_id.clone(),
            at: Utc::now(),
            event,
        };
        self.next_seq += 1;
        // No subscribers is fine; the journal still has it.
        let _ = self.sender.send(record.clone());
        self.journal.push(record);
    }

    pub fn journal(&self) -> &[EventRecord] {
        &self.journal
    }

    pub fn into_journal(self) -> Vec<EventRecord> {
        self.journal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_events_are_sequenced_and_broadcast() {
        let (tx, mut rx) = broadcast::channel(EVENT_CAPACITY);
        let mut publisher = EventPublisher::new("abcd1234", tx);
        publisher.emit(TaskEvent::Started { task: "t".into() });
        publisher.emit(TaskEvent::Iteration {
            iteration: 1,
            elements: 3,
        });

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!((first.seq, second.seq), (0, 1));
        assert_eq!(second.task_id, "abcd1234");
        assert_eq!(publisher.journal().len(), 2);
    }

    #[test]
    fn test_event_serialization_is_tagged() {
        let (tx, _) = broadcast::channel(4);
        let mut publisher = EventPublisher::new("id", tx);
        publisher.emit(TaskEvent::Finished {
            status: TaskStatus::TimedOut,
            iterations: 50,
            message: "limit".into(),
        });
        let json = serde_json::to_value(&publisher.journal()[0]).unwrap();
        assert_eq!(json["event"]["type"], "finished");
        assert_eq!(json["event"]["status"], "timed_out");
    }
}
