//! Single-slot handoff for background strategic planning jobs.

use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};

use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;
use tokio::task::JoinHandle;

use crate::planner::{PlanTrigger, PlannerError, PlanningResult};

struct PlanningJob {
    trigger: PlanTrigger,
    started_at: Instant,
    result: oneshot::Receiver<Result<PlanningResult, PlannerError>>,
    task: JoinHandle<()>,
}

/// What polling the slot yielded.
#[derive(Debug)]
pub enum SlotPoll {
    Empty,
    Pending(PlanTrigger),
    Ready(PlanTrigger, PlanningResult),
    Failed(PlanTrigger, PlannerError),
    TimedOut(PlanTrigger),
}

/// Holds at most one outstanding strategic planning job.
///
/// Only the control loop touches the slot. Jobs run on detached tasks and
/// deliver their result through a oneshot channel that is drained with a
/// non-blocking poll.
pub struct PlanningSlot {
    job: Option<PlanningJob>,
    timeout: Duration,
    started: u64,
}

impl Default for PlanningSlot {
    fn default() -> Self {
        Self::new(Duration::from_secs(180))
    }
}

impl fmt::Debug for PlanningSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlanningSlot")
            .field("pending", &self.pending())
            .field("timeout", &self.timeout)
            .field("started", &self.started)
            .finish()
    }
}

impl PlanningSlot {
    pub fn new(timeout: Duration) -> Self {
        Self {
            job: None,
            timeout,
            started: 0,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.job.is_some()
    }

    /// Trigger of the outstanding job, if any.
    pub fn pending(&self) -> Option<PlanTrigger> {
        self.job.as_ref().map(|job| job.trigger)
    }

    /// Number of jobs started over the slot's lifetime.
    pub fn jobs_started(&self) -> u64 {
        self.started
    }

    /// Start `job` on a detached task. Returns `false` without spawning when
    /// a job is already outstanding.
    pub fn spawn<F>(&mut self, trigger: PlanTrigger, job: F) -> bool
    where
        F: Future<Output = Result<PlanningResult, PlannerError>> + Send + 'static,
    {
        if self.job.is_some() {
            return false;
        }
        let (tx, rx) = oneshot::channel();
        let task = tokio::spawn(async move {
            // The receiver is gone when the job was superseded.
            let _ = tx.send(job.await);
        });
        self.job = Some(PlanningJob {
            trigger,
            started_at: Instant::now(),
            result: rx,
            task,
        });
        self.started += 1;
        true
    }

    /// Non-blocking check of the outstanding job. Finished, failed and expired
    /// jobs clear the slot.
    pub fn poll(&mut self) -> SlotPoll {
        let Some(job) = self.job.as_mut() else {
            return SlotPoll::Empty;
        };
        let trigger = job.trigger;
        let expired = job.started_at.elapsed() >= self.timeout;
        match job.result.try_recv() {
            Ok(outcome) => {
                self.job = None;
                match outcome {
                    Ok(result) => SlotPoll::Ready(trigger, result),
                    Err(e) => SlotPoll::Failed(trigger, e),
                }
            }
            Err(TryRecvError::Empty) => {
                if expired {
                    self.abort();
                    SlotPoll::TimedOut(trigger)
                } else {
                    SlotPoll::Pending(trigger)
                }
            }
            Err(TryRecvError::Closed) => {
                self.job = None;
                SlotPoll::Failed(
                    trigger,
                    PlannerError::Transport("planning task ended without a result".into()),
                )
            }
        }
    }

    /// Cancel the outstanding job; its result, if any, is never delivered.
    pub fn abort(&mut self) -> Option<PlanTrigger> {
        self.job.take().map(|job| {
            job.task.abort();
            job.trigger
        })
    }
}

impl Drop for PlanningSlot {
    fn drop(&mut self) {
        self.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::Confidence;
    use crate::planner::Strategy;

    fn result() -> PlanningResult {
        let strategy = |name: &str| Strategy {
            name: name.to_string(),
            description: String::new(),
            steps: Vec::new(),
            confidence: Confidence::Medium,
        };
        PlanningResult::new(vec![strategy("a"), strategy("b")], 0, None).unwrap()
    }

    #[tokio::test]
    async fn test_second_spawn_is_refused() {
        let mut slot = PlanningSlot::new(Duration::from_secs(60));
        assert!(slot.spawn(PlanTrigger::Initial, std::future::pending()));
        assert!(!slot.spawn(PlanTrigger::StepFailures, async { Ok(result()) }));
        assert_eq!(slot.jobs_started(), 1);
        assert_eq!(slot.pending(), Some(PlanTrigger::Initial));
    }

    #[tokio::test]
    async fn test_ready_result_clears_slot() {
        let mut slot = PlanningSlot::new(Duration::from_secs(60));
        slot.spawn(PlanTrigger::Initial, async { Ok(result()) });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(matches!(slot.poll(), SlotPoll::Ready(PlanTrigger::Initial, _)));
        assert!(!slot.is_busy());
        assert!(matches!(slot.poll(), SlotPoll::Empty));
    }

    #[tokio::test]
    async fn test_failed_job_clears_slot() {
        let mut slot = PlanningSlot::new(Duration::from_secs(60));
        slot.spawn(PlanTrigger::ProgressStall, async {
            Err(PlannerError::Transport("offline".into()))
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(matches!(slot.poll(), SlotPoll::Failed(PlanTrigger::ProgressStall, _)));
        assert!(!slot.is_busy());
    }

    #[tokio::test]
    async fn test_expired_job_is_discarded() {
        let mut slot = PlanningSlot::new(Duration::ZERO);
        slot.spawn(PlanTrigger::Initial, std::future::pending());
        assert!(matches!(slot.poll(), SlotPoll::TimedOut(PlanTrigger::Initial)));
        assert!(!slot.is_busy());
    }

    #[tokio::test]
    async fn test_abort_discards_result() {
        let mut slot = PlanningSlot::new(Duration::from_secs(60));
        slot.spawn(PlanTrigger::Initial, std::future::pending());
        assert_eq!(slot.abort(), Some(PlanTrigger::Initial));
        assert!(matches!(slot.poll(), SlotPoll::Empty));
    }
}
