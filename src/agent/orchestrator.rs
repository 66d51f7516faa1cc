//! The control loop.
//!
//! One [`Orchestrator`] runs one task. It is the only owner of the task's
//! mutable state: counters, context, the current snapshot and the planning
//! slot. Boundary components receive immutable snapshots and requests and
//! hand back owned results.
//!
//! Each iteration observes the screen, adopts any finished strategic plan,
//! asks the fast planner for steps, executes and verifies them in order, and
//! then evaluates the strategic planning triggers.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use super::context::{ContextManager, Role};
use super::events::{EventPublisher, TaskEvent};
use super::session::{Control, Session};
use super::slot::{PlanningSlot, SlotPoll};
use super::stagnation::StagnationDetector;
use super::state::{FailureOrigin, FailureRecord, OrchestratorState, TaskOutcome, TaskStatus};
use crate::actions::{decode_plan, ActionKind, Plan, PlanDecode, Step};
use crate::config::OrchestratorConfig;
use crate::device::{CaptureError, CompletionVerdict, DispatchRequest, FailureKind, VerificationOutcome};
use crate::fusion::{safe_click_point, FusedStateSnapshot, FusionEngine, SnapshotDiff};
use crate::planner::{
    ActionRequest, InitialPlanRequest, PlanTrigger, PlanningResult, ProgressCheckRequest,
    RecoveryPlanRequest,
};

/// Longest slice of raw planner output kept in diagnostics.
const RAW_EXCERPT_CHARS: usize = 200;

type Observation = (Arc<FusedStateSnapshot>, Option<Arc<Vec<u8>>>);

/// Result of executing one step, including its retry.
enum StepOutcome {
    Verified(Arc<FusedStateSnapshot>),
    Failed {
        record: FailureRecord,
        after: Arc<FusedStateSnapshot>,
    },
}

/// One failed attempt at a step.
struct AttemptFailure {
    kind: FailureKind,
    detail: String,
    after: Arc<FusedStateSnapshot>,
}

pub(crate) struct Orchestrator<'a> {
    session: &'a Session,
    fusion: FusionEngine,
    context: ContextManager,
    stagnation: StagnationDetector,
    state: OrchestratorState,
    /// Recent failures, oldest first.
    failures: VecDeque<FailureRecord>,
    /// The currently adopted strategic plan.
    plan: Option<Arc<PlanningResult>>,
    previous: Option<Arc<FusedStateSnapshot>>,
    events: EventPublisher,
    control: mpsc::Receiver<Control>,
    started: Instant,
}

impl<'a> Orchestrator<'a> {
    pub(crate) fn new(
        session: &'a Session,
        control: mpsc::Receiver<Control>,
        events: EventPublisher,
    ) -> Self {
        let config = &session.config;
        Self {
            session,
            fusion: FusionEngine::new(config.fusion.clone()),
            context: ContextManager::new(session.task.clone(), config.context_window),
            stagnation: StagnationDetector::new(config.stagnation.clone()),
            state: OrchestratorState::new(PlanningSlot::new(config.planning_job_timeout)),
            failures: VecDeque::with_capacity(config.failure_history),
            plan: None,
            previous: None,
            events,
            control,
            started: Instant::now(),
        }
    }

    fn config(&self) -> &'a OrchestratorConfig {
        &self.session.config
    }

    /// Run the task to a terminal status.
    pub(crate) async fn run(mut self) -> TaskOutcome {
        let session = self.session;
        info!(task_id = %session.task_id, task = %session.task, "Starting task");
        self.events.emit(TaskEvent::Started {
            task: session.task.clone(),
        });

        if let Err(e) = session.parts.screen.ready().await {
            return self.finish(TaskStatus::Failed, format!("Screen capture unavailable: {}", e));
        }
        if let Err(e) = session.parts.executor.ready().await {
            return self.finish(TaskStatus::Failed, format!("Action executor unavailable: {}", e));
        }

        loop {
            // Let background planning jobs and control messages make progress.
            tokio::task::yield_now().await;

            if self.stop_requested() {
                return self.finish(TaskStatus::Stopped, "Stopped by request".to_string());
            }
            let max = self.config().max_iterations;
            if self.state.iteration >= max {
                return self.finish(
                    TaskStatus::TimedOut,
                    format!("Reached the limit of {} iterations without confirmed completion", max),
                );
            }
            if let Some(message) = self.iterate().await {
                return self.finish(TaskStatus::Complete, message);
            }
        }
    }

    /// One pass of the loop. Returns the completion message once a claimed
    /// completion is confirmed.
    async fn iterate(&mut self) -> Option<String> {
        self.state.iteration += 1;
        let iteration = self.state.iteration;
        let session = self.session;

        let (snapshot, image) = match self.observe().await {
            Ok(observation) => observation,
            Err(e) => {
                warn!(task_id = %session.task_id, iteration, error = %e, "Capture failed");
                self.diagnose(iteration, format!("Screen capture failed: {}", e));
                return None;
            }
        };
        debug!(task_id = %session.task_id, iteration, elements = snapshot.len(), "Observed screen");
        self.events.emit(TaskEvent::Iteration {
            iteration,
            elements: snapshot.len(),
        });

        self.poll_planning(iteration);

        let diff = match &self.previous {
            Some(previous) => snapshot.diff(previous),
            None => SnapshotDiff {
                added: snapshot.elements().iter().map(|e| e.id.clone()).collect(),
                ..Default::default()
            },
        };
        self.stagnation.observe(snapshot.fingerprint());
        let stagnation = self.stagnation.check();
        let mut diagnostics = Vec::new();
        if let Some(report) = &stagnation {
            let instruction = report.instruction();
            self.diagnose(iteration, instruction.clone());
            diagnostics.push(instruction);
        }
        self.previous = Some(snapshot.clone());

        let plan = self
            .request_plan(iteration, &snapshot, diff, diagnostics, image)
            .await;

        let mut step_failed = false;
        let mut current = snapshot;
        if plan.signals_completion() {
            self.state.last_completion_signal = iteration;
            let claim = completion_claim(&plan);
            match session
                .parts
                .completion
                .confirm(&session.task, &current, &claim)
                .await
            {
                CompletionVerdict::Confirmed { reason } => {
                    self.state.complete = true;
                    return Some(if reason.trim().is_empty() { claim } else { reason });
                }
                CompletionVerdict::Rejected { reason, wrong_task } => {
                    self.reject_completion(iteration, reason, wrong_task);
                }
            }
        } else {
            for (index, step) in plan.steps.iter().enumerate() {
                match self.execute_step(iteration, step, current.clone()).await {
                    StepOutcome::Verified(after) => current = after,
                    StepOutcome::Failed { record, after } => {
                        current = after;
                        self.record_failure(record, 1);
                        step_failed = true;
                        let skipped = plan.steps.len() - index - 1;
                        if skipped > 0 {
                            self.diagnose(
                                iteration,
                                format!("Skipped {} remaining step(s) of the plan", skipped),
                            );
                        }
                        break;
                    }
                }
            }
        }

        self.evaluate_triggers(iteration, &current, step_failed, stagnation.is_some())
            .await;
        None
    }

    async fn observe(&self) -> Result<Observation, CaptureError> {
        let capture = self.session.parts.screen.capture().await?;
        let snapshot = Arc::new(self.fusion.fuse(&capture));
        Ok((snapshot, capture.image.map(Arc::new)))
    }

    fn stop_requested(&mut self) -> bool {
        matches!(self.control.try_recv(), Ok(Control::Stop))
    }

    async fn request_plan(
        &mut self,
        iteration: u32,
        snapshot: &Arc<FusedStateSnapshot>,
        diff: SnapshotDiff,
        diagnostics: Vec<String>,
        image: Option<Arc<Vec<u8>>>,
    ) -> Plan {
        let session = self.session;
        let request = ActionRequest {
            iteration,
            task: self.context.pinned().content.clone(),
            snapshot: snapshot.clone(),
            diff,
            history: self.context.history(),
            failures: self.failures.iter().cloned().collect(),
            diagnostics,
            image,
        };

        let plan = match session.parts.action_planner.propose(&request).await {
            Ok(raw) => match decode_plan(&raw) {
                PlanDecode::Parsed(plan) => plan,
                PlanDecode::Unparseable { raw, reason } => {
                    warn!(task_id = %session.task_id, iteration, %reason, "Unusable planner output");
                    self.diagnose(
                        iteration,
                        format!(
                            "Planner output could not be used ({}): {}",
                            reason,
                            excerpt(&raw, RAW_EXCERPT_CHARS)
                        ),
                    );
                    Plan::parse_failure(&reason)
                }
            },
            Err(e) => {
                warn!(task_id = %session.task_id, iteration, error = %e, "Action planner failed");
                self.diagnose(iteration, format!("Action planner failed: {}", e));
                Plan::parse_failure(&e.to_string())
            }
        };

        self.context.push(Role::Assistant, plan.summary());
        self.events.emit(TaskEvent::PlanReceived {
            iteration,
            summary: plan.summary(),
            steps: plan.steps.len(),
            parse_error: plan.is_parse_failure(),
        });
        plan
    }

    /// Dispatch and verify one step, retrying once against a fresh capture.
    async fn execute_step(
        &mut self,
        iteration: u32,
        step: &Step,
        before: Arc<FusedStateSnapshot>,
    ) -> StepOutcome {
        if step.kind == ActionKind::Wait {
            let config = self.config();
            let pause = step
                .duration()
                .unwrap_or(config.settle_delay)
                .min(config.max_wait_step);
            self.events.emit(TaskEvent::StepDispatched {
                iteration,
                step: step.clone(),
                attempt: 1,
            });
            sleep(pause).await;
            return StepOutcome::Verified(before);
        }

        let mut snapshot = before;
        let mut attempt = 1;
        loop {
            let failure = match self.attempt_step(iteration, step, &snapshot, attempt).await {
                Ok(after) => return StepOutcome::Verified(after),
                Err(failure) => failure,
            };
            if attempt >= 2 {
                let record = FailureRecord::new(
                    format!("{} failed: {} ({})", step.label(), failure.kind, failure.detail),
                    iteration,
                    FailureOrigin::Step,
                )
                .with_kind(failure.kind);
                return StepOutcome::Failed {
                    record,
                    after: failure.after,
                };
            }

            debug!(
                task_id = %self.session.task_id,
                iteration,
                step = %step.label(),
                kind = %failure.kind,
                "Step failed, retrying against a fresh capture"
            );
            snapshot = match self.observe().await {
                Ok((fresh, _)) => fresh,
                Err(e) => {
                    let record = FailureRecord::new(
                        format!("{} failed: could not recapture ({})", step.label(), e),
                        iteration,
                        FailureOrigin::Step,
                    )
                    .with_kind(FailureKind::StaleState);
                    return StepOutcome::Failed {
                        record,
                        after: failure.after,
                    };
                }
            };
            attempt += 1;
        }
    }

    async fn attempt_step(
        &mut self,
        iteration: u32,
        step: &Step,
        snapshot: &Arc<FusedStateSnapshot>,
        attempt: u32,
    ) -> Result<Arc<FusedStateSnapshot>, AttemptFailure> {
        let session = self.session;
        let fail = |kind, detail: String, after: &Arc<FusedStateSnapshot>| AttemptFailure {
            kind,
            detail,
            after: after.clone(),
        };

        let target = match &step.target {
            Some(id) => match snapshot.element(id) {
                Some(element) => Some(element.clone()),
                None => {
                    return Err(fail(
                        FailureKind::TargetNotFound,
                        format!("no element '{}' on screen", id),
                        snapshot,
                    ))
                }
            },
            None => None,
        };
        let point = match &target {
            Some(element) if step.kind.is_pointer() => {
                Some(safe_click_point(element, snapshot.elements()))
            }
            _ => None,
        };
        let request = DispatchRequest {
            step: step.clone(),
            target,
            point,
            frame: (snapshot.width(), snapshot.height()),
        };

        self.events.emit(TaskEvent::StepDispatched {
            iteration,
            step: step.clone(),
            attempt,
        });
        self.stagnation.record_action(step, snapshot.fingerprint());
        match session.parts.executor.dispatch(&request).await {
            Ok(effect) => debug!(task_id = %session.task_id, iteration, detail = %effect.detail, "Dispatched"),
            Err(e) => return Err(fail(e.failure_kind(), e.to_string(), snapshot)),
        }

        sleep(self.config().settle_delay).await;
        let after = match self.observe().await {
            Ok((after, _)) => after,
            Err(e) => {
                return Err(fail(
                    FailureKind::StaleState,
                    format!("recapture failed: {}", e),
                    snapshot,
                ))
            }
        };

        match session.parts.verifier.check(snapshot, &after, step).await {
            VerificationOutcome::Success => Ok(after),
            VerificationOutcome::Failure { kind, detail } => Err(fail(kind, detail, &after)),
        }
    }

    fn reject_completion(&mut self, iteration: u32, reason: String, wrong_task: bool) {
        info!(
            task_id = %self.session.task_id,
            iteration,
            wrong_task,
            %reason,
            "Completion claim rejected"
        );
        self.events.emit(TaskEvent::CompletionRejected {
            iteration,
            reason: reason.clone(),
            wrong_task,
        });
        let (origin, increment) = if wrong_task {
            (FailureOrigin::WrongTask, self.config().wrong_task_penalty)
        } else {
            (FailureOrigin::CompletionRejected, 1)
        };
        let record = FailureRecord::new(
            format!("Completion claim rejected: {}", reason),
            iteration,
            origin,
        );
        self.record_failure(record, increment);
    }

    fn record_failure(&mut self, record: FailureRecord, increment: u32) {
        self.state.failures_since_last_plan += increment;
        warn!(
            task_id = %self.session.task_id,
            iteration = record.iteration,
            failures = self.state.failures_since_last_plan,
            "{}",
            record.diagnosis
        );
        self.context.push_diagnostic(record.diagnosis.clone());
        self.failures.push_back(record.clone());
        while self.failures.len() > self.config().failure_history {
            self.failures.pop_front();
        }
        self.events.emit(TaskEvent::Failure {
            record,
            failures_since_last_plan: self.state.failures_since_last_plan,
        });
    }

    /// Record a diagnostic for the next planner call and for subscribers.
    fn diagnose(&mut self, iteration: u32, message: String) {
        self.context.push_diagnostic(message.clone());
        self.events.emit(TaskEvent::Diagnostic { iteration, message });
    }

    /// Adopt the result of a finished background job, or discard a failed one.
    fn poll_planning(&mut self, iteration: u32) {
        match self.state.planning.poll() {
            SlotPoll::Ready(trigger, result) => self.adopt(iteration, trigger, result),
            SlotPoll::Failed(trigger, e) => {
                warn!(task_id = %self.session.task_id, %trigger, error = %e, "Discarding failed planning job");
                self.events.emit(TaskEvent::PlanDiscarded {
                    iteration,
                    trigger,
                    reason: e.to_string(),
                });
            }
            SlotPoll::TimedOut(trigger) => {
                warn!(task_id = %self.session.task_id, %trigger, "Discarding expired planning job");
                self.events.emit(TaskEvent::PlanDiscarded {
                    iteration,
                    trigger,
                    reason: format!(
                        "no result within {:?}",
                        self.config().planning_job_timeout
                    ),
                });
            }
            SlotPoll::Empty | SlotPoll::Pending(_) => {}
        }
    }

    fn adopt(&mut self, iteration: u32, trigger: PlanTrigger, result: PlanningResult) {
        let result = Arc::new(result);
        info!(
            task_id = %self.session.task_id,
            iteration,
            %trigger,
            strategy = %result.recommended().name,
            "Adopting strategic plan"
        );
        self.context.set_guidance(result.guidance());
        self.state.failures_since_last_plan = 0;
        self.state.recovery_deferred = false;
        self.events.emit(TaskEvent::PlanAdopted {
            iteration,
            trigger,
            strategy: result.recommended().name.clone(),
        });
        self.plan = Some(result);
    }

    /// Decide whether to consult the strategic planner, in priority order.
    async fn evaluate_triggers(
        &mut self,
        iteration: u32,
        snapshot: &Arc<FusedStateSnapshot>,
        step_failed: bool,
        stagnating: bool,
    ) {
        let config = self.config();

        if iteration == 1 {
            self.dispatch_initial(iteration, snapshot);
        }

        if !self.state.planning.is_busy()
            && self.state.iterations_since(self.state.last_completion_signal)
                > config.progress_check_interval
            && self.state.iterations_since(self.state.last_progress_check)
                > config.progress_check_interval
        {
            self.state.last_progress_check = iteration;
            if !self.making_progress(iteration, snapshot, stagnating).await {
                self.dispatch_recovery(iteration, PlanTrigger::ProgressStall, snapshot);
            }
        }

        // Only a fresh step failure arms the failure trigger; a rejected
        // completion raises the count without arming it.
        let failures = self.state.failures_since_last_plan;
        let armed_now = step_failed
            && failures >= config.failure_threshold
            && !self.state.recovery_deferred;
        if armed_now {
            self.state.recovery_deferred = true;
        }
        if self.state.recovery_deferred
            && failures >= config.failure_threshold
            && self.state.iterations_since(self.state.last_consult) > config.consult_cooldown
            && self.dispatch_recovery(iteration, PlanTrigger::StepFailures, snapshot)
        {
            self.state.recovery_deferred = false;
        } else if armed_now {
            debug!(task_id = %self.session.task_id, iteration, failures, "Recovery deferred");
            self.events.emit(TaskEvent::RecoveryDeferred {
                iteration,
                failures_since_last_plan: failures,
            });
        }

        if !self.state.last_resort_used
            && iteration >= config.last_resort_start()
            && self.state.failures_since_last_plan > 0
        {
            self.last_resort(iteration, snapshot).await;
        }
    }

    async fn making_progress(
        &mut self,
        iteration: u32,
        snapshot: &Arc<FusedStateSnapshot>,
        stagnating: bool,
    ) -> bool {
        if stagnating {
            return false;
        }
        let session = self.session;
        let request = ProgressCheckRequest {
            iteration,
            task: self.context.pinned().content.clone(),
            snapshot: snapshot.clone(),
            history: self.context.history(),
        };
        match session.parts.action_planner.check_progress(&request).await {
            Ok(verdict) => {
                debug!(
                    task_id = %session.task_id,
                    iteration,
                    progressing = verdict.progressing,
                    reason = %verdict.reason,
                    "Progress check"
                );
                if !verdict.progressing {
                    self.diagnose(iteration, format!("No progress: {}", verdict.reason));
                }
                verdict.progressing
            }
            Err(e) => {
                warn!(task_id = %session.task_id, iteration, error = %e, "Progress check failed");
                true
            }
        }
    }

    fn dispatch_initial(&mut self, iteration: u32, snapshot: &Arc<FusedStateSnapshot>) -> bool {
        let planner = self.session.parts.strategic_planner.clone();
        let request = InitialPlanRequest {
            task: self.session.task.clone(),
            snapshot: snapshot.clone(),
            context: self.context.entries(),
        };
        let spawned = self
            .state
            .planning
            .spawn(PlanTrigger::Initial, async move { planner.plan_initial(request).await });
        if spawned {
            self.consulted(iteration, PlanTrigger::Initial);
        }
        spawned
    }

    fn dispatch_recovery(
        &mut self,
        iteration: u32,
        trigger: PlanTrigger,
        snapshot: &Arc<FusedStateSnapshot>,
    ) -> bool {
        let planner = self.session.parts.strategic_planner.clone();
        let request = self.recovery_request(trigger, snapshot);
        let spawned = self
            .state
            .planning
            .spawn(trigger, async move { planner.plan_recovery(request).await });
        if spawned {
            self.consulted(iteration, trigger);
        } else {
            debug!(task_id = %self.session.task_id, %trigger, "Planning job already outstanding");
        }
        spawned
    }

    fn recovery_request(
        &self,
        trigger: PlanTrigger,
        snapshot: &Arc<FusedStateSnapshot>,
    ) -> RecoveryPlanRequest {
        RecoveryPlanRequest {
            task: self.session.task.clone(),
            snapshot: snapshot.clone(),
            trigger,
            failures: self.failures.iter().cloned().collect(),
            previous_plan: self.plan.clone(),
            context: self.context.entries(),
        }
    }

    fn consulted(&mut self, iteration: u32, trigger: PlanTrigger) {
        self.state.last_consult = iteration;
        info!(task_id = %self.session.task_id, iteration, %trigger, "Strategic planning dispatched");
        self.events.emit(TaskEvent::PlanningDispatched { iteration, trigger });
    }

    /// Blocking recovery consult near the iteration cap. Fires at most once.
    async fn last_resort(&mut self, iteration: u32, snapshot: &Arc<FusedStateSnapshot>) {
        self.state.last_resort_used = true;
        if let Some(superseded) = self.state.planning.abort() {
            self.events.emit(TaskEvent::PlanDiscarded {
                iteration,
                trigger: superseded,
                reason: "superseded by last-resort consult".to_string(),
            });
        }
        let trigger = PlanTrigger::LastResort;
        self.consulted(iteration, trigger);

        let session = self.session;
        let request = self.recovery_request(trigger, snapshot);
        let limit = self.config().last_resort_timeout;
        let planner = &session.parts.strategic_planner;
        let reason = match timeout(limit, planner.plan_recovery(request)).await {
            Ok(Ok(result)) => {
                self.adopt(iteration, trigger, result);
                return;
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("no result within {:?}", limit),
        };
        warn!(task_id = %session.task_id, iteration, %reason, "Last-resort planning failed, continuing unguided");
        self.events.emit(TaskEvent::PlanDiscarded {
            iteration,
            trigger,
            reason,
        });
    }

    fn finish(mut self, status: TaskStatus, message: String) -> TaskOutcome {
        let session = self.session;
        if let Some(trigger) = self.state.planning.abort() {
            debug!(task_id = %session.task_id, %trigger, "Cancelled outstanding planning job");
        }
        let iterations = self.state.iteration;
        match status {
            TaskStatus::Complete => {
                info!(task_id = %session.task_id, iterations, %message, "Task complete")
            }
            TaskStatus::Failed => {
                error!(task_id = %session.task_id, iterations, %message, "Task failed")
            }
            TaskStatus::Stopped | TaskStatus::TimedOut => {
                warn!(task_id = %session.task_id, iterations, %status, %message, "Task ended")
            }
        }
        self.events.emit(TaskEvent::Finished {
            status,
            iterations,
            message: message.clone(),
        });

        TaskOutcome {
            task_id: session.task_id.clone(),
            task: session.task.clone(),
            status,
            iterations,
            message,
            duration: self.started.elapsed(),
            events: self.events.into_journal(),
        }
    }
}

/// What the planner claimed when signalling completion.
fn completion_claim(plan: &Plan) -> String {
    let step = plan.steps.first().map(|s| s.description.trim()).unwrap_or("");
    if !step.is_empty() {
        step.to_string()
    } else if !plan.reasoning.trim().is_empty() {
        plan.reasoning.trim().to_string()
    } else {
        "task complete".to_string()
    }
}

fn excerpt(text: &str, max_chars: usize) -> String {
    let mut out: String = text.chars().take(max_chars).collect();
    if text.chars().count() > max_chars {
        out.push_str("...");
    }
    out
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::broadcast::error::RecvError;

    use super::*;
    use crate::agent::testing::*;
    use crate::agent::StagnationConfig;
    use crate::planner::PlannerError;

    fn dispatched(outcome: &TaskOutcome) -> Vec<(u32, PlanTrigger)> {
        outcome
            .events
            .iter()
            .filter_map(|r| match &r.event {
                TaskEvent::PlanningDispatched { iteration, trigger } => Some((*iteration, *trigger)),
                _ => None,
            })
            .collect()
    }

    fn failure_counts(outcome: &TaskOutcome) -> Vec<(u32, u32)> {
        outcome
            .events
            .iter()
            .filter_map(|r| match &r.event {
                TaskEvent::Failure {
                    record,
                    failures_since_last_plan,
                } => Some((record.iteration, *failures_since_last_plan)),
                _ => None,
            })
            .collect()
    }

    fn deferrals(outcome: &TaskOutcome) -> Vec<(u32, u32)> {
        outcome
            .events
            .iter()
            .filter_map(|r| match r.event {
                TaskEvent::RecoveryDeferred {
                    iteration,
                    failures_since_last_plan,
                } => Some((iteration, failures_since_last_plan)),
                _ => None,
            })
            .collect()
    }

    /// Thresholds isolated so only the failure trigger can fire.
    fn failure_only_config(max_iterations: u32) -> OrchestratorConfig {
        fast_config()
            .with_max_iterations(max_iterations)
            .with_progress_check_interval(100)
            .with_consult_cooldown(0)
            .with_last_resort_window(0)
    }

    #[tokio::test]
    async fn test_times_out_at_iteration_cap() {
        let harness = Harness::new(
            ScriptedActionPlanner::repeating(WAIT),
            ScriptedStrategicPlanner::new(Reply::Immediate, Reply::Immediate),
        );
        let outcome = harness.agent(fast_config()).run_task("never done").await.unwrap();

        assert_eq!(outcome.status, TaskStatus::TimedOut);
        assert_eq!(outcome.iterations, 50);

        let iterations: Vec<u32> = outcome
            .events
            .iter()
            .filter_map(|r| match r.event {
                TaskEvent::Iteration { iteration, .. } => Some(iteration),
                _ => None,
            })
            .collect();
        assert_eq!(iterations, (1..=50).collect::<Vec<_>>());
        assert!(matches!(
            outcome.events.last().map(|r| &r.event),
            Some(TaskEvent::Finished {
                status: TaskStatus::TimedOut,
                iterations: 50,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_recovery_dispatched_on_third_failure_not_second() {
        let harness = Harness::new(
            ScriptedActionPlanner::repeating(TAP_NEXT),
            ScriptedStrategicPlanner::new(Reply::Immediate, Reply::Never),
        )
        .with_verifier(FixedVerifier::failing(FailureKind::NoObservableEffect));
        let outcome = harness
            .agent(failure_only_config(6))
            .run_task("tap through")
            .await
            .unwrap();

        // The initial plan is adopted at iteration 2, resetting the count.
        assert!(outcome.events.iter().any(|r| matches!(
            r.event,
            TaskEvent::PlanAdopted {
                iteration: 2,
                trigger: PlanTrigger::Initial,
                ..
            }
        )));
        assert_eq!(
            failure_counts(&outcome),
            vec![(1, 1), (2, 1), (3, 2), (4, 3), (5, 4), (6, 5)]
        );
        assert_eq!(
            dispatched(&outcome),
            vec![(1, PlanTrigger::Initial), (4, PlanTrigger::StepFailures)]
        );
        assert_eq!(
            harness.strategic.calls(),
            vec![PlanTrigger::Initial, PlanTrigger::StepFailures]
        );
    }

    #[tokio::test]
    async fn test_recovery_waits_for_default_cooldown() {
        let cooldown = OrchestratorConfig::default().consult_cooldown;
        assert_eq!(cooldown, 3);
        let harness = Harness::new(
            ScriptedActionPlanner::repeating(TAP_NEXT),
            ScriptedStrategicPlanner::new(Reply::Immediate, Reply::Never),
        )
        .with_verifier(FixedVerifier::failing(FailureKind::NoObservableEffect));
        let outcome = harness
            .agent(failure_only_config(5).with_consult_cooldown(cooldown))
            .run_task("tap through")
            .await
            .unwrap();

        assert_eq!(failure_counts(&outcome), vec![(1, 1), (2, 1), (3, 2), (4, 3), (5, 4)]);
        // Armed on the third failure, three iterations after the initial consult.
        assert_eq!(deferrals(&outcome), vec![(4, 3)]);
        assert_eq!(
            dispatched(&outcome),
            vec![(1, PlanTrigger::Initial), (5, PlanTrigger::StepFailures)]
        );
    }

    #[tokio::test]
    async fn test_wrong_task_rejection_fast_tracks_recovery() {
        let harness = Harness::new(
            ScriptedActionPlanner::new(&[COMPLETE, TAP_NEXT], WAIT),
            ScriptedStrategicPlanner::new(Reply::Fail, Reply::Never),
        )
        .with_verifier(FixedVerifier::failing(FailureKind::NoObservableEffect))
        .with_completion(ScriptedCompletion::new(vec![CompletionVerdict::Rejected {
            reason: "that was a different chat".into(),
            wrong_task: true,
        }]));
        let outcome = harness
            .agent(failure_only_config(3))
            .run_task("message Alice")
            .await
            .unwrap();

        let wrong_task = outcome.events.iter().find_map(|r| match &r.event {
            TaskEvent::Failure {
                record,
                failures_since_last_plan,
            } if record.origin == FailureOrigin::WrongTask => Some(*failures_since_last_plan),
            _ => None,
        });
        assert_eq!(wrong_task, Some(3));
        // No recovery on the rejection itself; the next ordinary failure triggers it.
        assert_eq!(
            dispatched(&outcome),
            vec![(1, PlanTrigger::Initial), (2, PlanTrigger::StepFailures)]
        );
        assert_eq!(failure_counts(&outcome), vec![(1, 3), (2, 4)]);
        assert_eq!(outcome.status, TaskStatus::TimedOut);
    }

    #[tokio::test]
    async fn test_ordinary_rejection_counts_one() {
        let harness = Harness::new(
            ScriptedActionPlanner::new(&[COMPLETE], WAIT),
            ScriptedStrategicPlanner::new(Reply::Never, Reply::Never),
        )
        .with_completion(ScriptedCompletion::new(vec![CompletionVerdict::Rejected {
            reason: "message not sent yet".into(),
            wrong_task: false,
        }]));
        let outcome = harness
            .agent(failure_only_config(2))
            .run_task("send it")
            .await
            .unwrap();
        assert_eq!(failure_counts(&outcome), vec![(1, 1)]);
    }

    #[tokio::test]
    async fn test_confirmed_completion_with_safe_click_point() {
        let harness = Harness::new(
            ScriptedActionPlanner::new(&[TAP_NEXT, COMPLETE], WAIT),
            ScriptedStrategicPlanner::new(Reply::Never, Reply::Never),
        );
        let outcome = harness.agent(fast_config()).run_task("go next").await.unwrap();

        assert_eq!(outcome.status, TaskStatus::Complete);
        assert_eq!(outcome.iterations, 2);
        assert_eq!(outcome.message, "looks done");

        let dispatched = harness.executor.dispatched();
        assert_eq!(dispatched.len(), 1);
        assert_eq!(dispatched[0].point, Some((100, 40)));
        assert_eq!(dispatched[0].target.as_ref().map(|t| t.id.as_str()), Some("btn_next"));

        // The outstanding initial job is cancelled with the task.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(harness.strategic.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_last_resort_fires_once() {
        let harness = Harness::new(
            ScriptedActionPlanner::repeating(TAP_NEXT),
            ScriptedStrategicPlanner::new(Reply::Never, Reply::Immediate),
        )
        .with_verifier(FixedVerifier::failing(FailureKind::StaleState));
        let config = fast_config()
            .with_max_iterations(10)
            .with_last_resort_window(5)
            .with_consult_cooldown(100)
            .with_progress_check_interval(100);
        let outcome = harness.agent(config).run_task("stuck").await.unwrap();

        assert_eq!(
            harness.strategic.calls(),
            vec![PlanTrigger::Initial, PlanTrigger::LastResort]
        );
        assert_eq!(
            dispatched(&outcome),
            vec![(1, PlanTrigger::Initial), (6, PlanTrigger::LastResort)]
        );
        assert!(outcome.events.iter().any(|r| matches!(
            r.event,
            TaskEvent::PlanAdopted {
                iteration: 6,
                trigger: PlanTrigger::LastResort,
                ..
            }
        )));
        // Adoption resets the count; later failures start again from one.
        assert!(failure_counts(&outcome).contains(&(7, 1)));
    }

    #[tokio::test]
    async fn test_single_outstanding_planning_job() {
        let harness = Harness::new(
            ScriptedActionPlanner::repeating(TAP_NEXT).not_progressing(),
            ScriptedStrategicPlanner::new(Reply::Never, Reply::Immediate),
        )
        .with_verifier(FixedVerifier::failing(FailureKind::NoObservableEffect));
        let config = failure_only_config(8).with_progress_check_interval(1);
        let outcome = harness.agent(config).run_task("busy").await.unwrap();

        assert_eq!(dispatched(&outcome), vec![(1, PlanTrigger::Initial)]);
        assert_eq!(harness.strategic.calls(), vec![PlanTrigger::Initial]);
        assert_eq!(harness.strategic.max_in_flight(), 1);
        // Self-checks are skipped while a job is outstanding.
        assert_eq!(harness.action.progress_checks(), 0);
    }

    #[tokio::test]
    async fn test_progress_stall_dispatches_recovery() {
        let harness = Harness::new(
            ScriptedActionPlanner::repeating(WAIT).not_progressing(),
            ScriptedStrategicPlanner::new(Reply::Fail, Reply::Never),
        );
        let config = fast_config()
            .with_max_iterations(6)
            .with_last_resort_window(0)
            .with_stagnation(StagnationConfig {
                window: 8,
                repeat_threshold: 100,
                same_target_threshold: 100,
            });
        let outcome = harness.agent(config).run_task("scroll").await.unwrap();

        assert_eq!(
            dispatched(&outcome),
            vec![(1, PlanTrigger::Initial), (4, PlanTrigger::ProgressStall)]
        );
        assert_eq!(harness.action.progress_checks(), 1);
    }

    #[tokio::test]
    async fn test_stop_request_halts_and_cancels_job() {
        let harness = Harness::new(
            ScriptedActionPlanner::repeating(WAIT),
            ScriptedStrategicPlanner::new(Reply::Never, Reply::Never),
        );
        let mut handle = harness
            .agent(fast_config().with_max_iterations(1000))
            .start_task("forever");
        let mut events = handle.events();
        loop {
            match events.recv().await {
                Ok(record) if matches!(record.event, TaskEvent::PlanningDispatched { .. }) => break,
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => panic!("task ended before planning was dispatched"),
            }
        }
        handle.stop().await.unwrap();
        let outcome = handle.wait().await.unwrap();

        assert_eq!(outcome.status, TaskStatus::Stopped);
        assert!(outcome.iterations < 1000);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(harness.strategic.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_unavailable_executor_fails_before_loop() {
        let harness = Harness::new(
            ScriptedActionPlanner::repeating(WAIT),
            ScriptedStrategicPlanner::new(Reply::Never, Reply::Never),
        )
        .with_executor(RecordingExecutor::unavailable());
        let outcome = harness.agent(fast_config()).run_task("anything").await.unwrap();

        assert_eq!(outcome.status, TaskStatus::Failed);
        assert_eq!(outcome.iterations, 0);
        assert!(outcome.message.contains("device offline"));
        assert!(harness.action.requests().is_empty());
        assert_eq!(harness.screen.captures(), 0);
    }

    #[tokio::test]
    async fn test_unusable_planner_output_becomes_noop() {
        let harness = Harness::new(
            ScriptedActionPlanner::new(&["tap the OK button please", COMPLETE], WAIT)
                .with_error_first(PlannerError::Transport("503".into())),
            ScriptedStrategicPlanner::new(Reply::Never, Reply::Never),
        );
        let outcome = harness.agent(fast_config()).run_task("confirm").await.unwrap();

        assert_eq!(outcome.status, TaskStatus::Complete);
        assert_eq!(outcome.iterations, 3);
        let parse_errors: Vec<bool> = outcome
            .events
            .iter()
            .filter_map(|r| match r.event {
                TaskEvent::PlanReceived { parse_error, .. } => Some(parse_error),
                _ => None,
            })
            .collect();
        assert_eq!(parse_errors, vec![true, true, false]);
        assert!(harness.executor.dispatched().is_empty());
    }

    #[tokio::test]
    async fn test_failed_step_is_retried_once_and_skips_rest() {
        let harness = Harness::new(
            ScriptedActionPlanner::new(&[TAP_TWICE], WAIT),
            ScriptedStrategicPlanner::new(Reply::Never, Reply::Never),
        )
        .with_verifier(FixedVerifier::failing(FailureKind::NoObservableEffect));
        let outcome = harness
            .agent(failure_only_config(1))
            .run_task("two taps")
            .await
            .unwrap();

        let dispatched = harness.executor.dispatched();
        assert_eq!(dispatched.len(), 2);
        assert!(dispatched
            .iter()
            .all(|d| d.step.target.as_deref() == Some("btn_next")));
        let attempts: Vec<u32> = outcome
            .events
            .iter()
            .filter_map(|r| match r.event {
                TaskEvent::StepDispatched { attempt, .. } => Some(attempt),
                _ => None,
            })
            .collect();
        assert_eq!(attempts, vec![1, 2]);
        assert_eq!(failure_counts(&outcome), vec![(1, 1)]);
        assert!(outcome.events.iter().any(|r| matches!(
            &r.event,
            TaskEvent::Diagnostic { message, .. } if message.contains("Skipped 1")
        )));
    }

    #[tokio::test]
    async fn test_missing_target_is_not_dispatched() {
        let harness = Harness::new(
            ScriptedActionPlanner::new(
                &[r#"{"steps": [{"action": "tap", "target": "btn_send"}]}"#],
                WAIT,
            ),
            ScriptedStrategicPlanner::new(Reply::Never, Reply::Never),
        );
        let outcome = harness
            .agent(failure_only_config(1))
            .run_task("send")
            .await
            .unwrap();

        assert!(harness.executor.dispatched().is_empty());
        let record = outcome.events.iter().find_map(|r| match &r.event {
            TaskEvent::Failure { record, .. } => Some(record.clone()),
            _ => None,
        });
        assert_eq!(record.and_then(|r| r.kind), Some(FailureKind::TargetNotFound));
    }

    #[tokio::test]
    async fn test_stagnation_warning_reaches_planner() {
        let harness = Harness::new(
            ScriptedActionPlanner::repeating(WAIT),
            ScriptedStrategicPlanner::new(Reply::Never, Reply::Never),
        );
        harness
            .agent(fast_config().with_max_iterations(3))
            .run_task("idle")
            .await
            .unwrap();

        let requests = harness.action.requests();
        assert_eq!(requests.len(), 3);
        assert!(requests[0].diagnostics.is_empty());
        assert!(requests[1].diagnostics.is_empty());
        assert!(requests[2].diagnostics[0].contains("same layout"));
    }

    #[tokio::test]
    async fn test_adopted_guidance_is_pinned_into_requests() {
        let harness = Harness::new(
            ScriptedActionPlanner::repeating(WAIT),
            ScriptedStrategicPlanner::new(Reply::Immediate, Reply::Never),
        );
        harness
            .agent(fast_config().with_max_iterations(3).with_context_window(2))
            .run_task("open settings")
            .await
            .unwrap();

        let requests = harness.action.requests();
        assert_eq!(requests[0].task, "Task: open settings");
        assert!(requests[1].task.contains("Recommended strategy: initial primary"));
        assert!(requests
            .iter()
            .all(|r| r.history.len() <= 2 && r.history.iter().all(|e| !e.pinned)));
    }
}
