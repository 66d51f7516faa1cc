//! Scripted collaborators for orchestrator tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::session::{Agent, Collaborators};
use crate::actions::{Confidence, Step};
use crate::config::OrchestratorConfig;
use crate::device::{
    ActionEffect, ActionExecutor, CaptureError, CompletionVerdict, CompletionVerifier,
    DispatchRequest, ExecutorError, FailureKind, ScreenCapture, ScreenStateProvider,
    VerificationOutcome, Verifier,
};
use crate::fusion::{Bounds, ElementKind, FusedStateSnapshot, UiElement};
use crate::planner::{
    ActionPlanner, ActionRequest, InitialPlanRequest, PlanTrigger, PlannerError, PlanningResult,
    ProgressCheckRequest, ProgressVerdict, RecoveryPlanRequest, StrategicPlanner, Strategy,
};

pub const TAP_NEXT: &str = r#"{"reasoning": "advance", "steps": [{"action": "tap", "target": "btn_next"}]}"#;
pub const TAP_TWICE: &str = r#"{"steps": [{"action": "tap", "target": "btn_next"}, {"action": "tap", "target": "btn_back"}]}"#;
pub const WAIT: &str = r#"{"steps": [{"action": "wait", "duration_ms": 0}]}"#;
pub const COMPLETE: &str = r#"{"steps": [{"action": "complete", "description": "message sent"}]}"#;

/// A config with no sleeps.
pub fn fast_config() -> OrchestratorConfig {
    OrchestratorConfig::default()
        .with_settle_delay(Duration::ZERO)
        .with_planning_job_timeout(Duration::from_secs(60))
        .with_last_resort_timeout(Duration::from_secs(5))
}

/// A screen that never changes.
pub struct StaticScreen {
    capture: ScreenCapture,
    captures: AtomicUsize,
}

impl StaticScreen {
    pub fn new() -> Self {
        let elements = vec![
            UiElement::new(ElementKind::Button, "Next", Bounds::new(0, 0, 200, 80)).clickable(),
            UiElement::new(ElementKind::Button, "Back", Bounds::new(0, 100, 200, 180)).clickable(),
        ];
        Self {
            capture: ScreenCapture::new(1080, 1920, elements).with_foreground_app("com.example.chat"),
            captures: AtomicUsize::new(0),
        }
    }

    pub fn captures(&self) -> usize {
        self.captures.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ScreenStateProvider for StaticScreen {
    async fn capture(&self) -> Result<ScreenCapture, CaptureError> {
        self.captures.fetch_add(1, Ordering::SeqCst);
        Ok(self.capture.clone())
    }
}

/// Records every dispatch.
#[derive(Default)]
pub struct RecordingExecutor {
    unavailable: bool,
    dispatched: Mutex<Vec<DispatchRequest>>,
}

impl RecordingExecutor {
    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Default::default()
        }
    }

    pub fn dispatched(&self) -> Vec<DispatchRequest> {
        self.dispatched.lock().unwrap().clone()
    }
}

#[async_trait]
impl ActionExecutor for RecordingExecutor {
    async fn ready(&self) -> Result<(), ExecutorError> {
        if self.unavailable {
            Err(ExecutorError::Unavailable("device offline".into()))
        } else {
            Ok(())
        }
    }

    async fn dispatch(&self, request: &DispatchRequest) -> Result<ActionEffect, ExecutorError> {
        self.dispatched.lock().unwrap().push(request.clone());
        Ok(ActionEffect::default())
    }
}

/// Verifier with a fixed answer.
pub struct FixedVerifier {
    failure: Option<FailureKind>,
}

impl FixedVerifier {
    pub fn passing() -> Self {
        Self { failure: None }
    }

    pub fn failing(kind: FailureKind) -> Self {
        Self {
            failure: Some(kind),
        }
    }
}

#[async_trait]
impl Verifier for FixedVerifier {
    async fn check(
        &self,
        _before: &FusedStateSnapshot,
        _after: &FusedStateSnapshot,
        _step: &Step,
    ) -> VerificationOutcome {
        match self.failure {
            Some(kind) => VerificationOutcome::failure(kind, "scripted failure"),
            None => VerificationOutcome::Success,
        }
    }
}

/// Completion verifier answering from a queue, confirming once it runs out.
#[derive(Default)]
pub struct ScriptedCompletion {
    verdicts: Mutex<VecDeque<CompletionVerdict>>,
}

impl ScriptedCompletion {
    pub fn new(verdicts: Vec<CompletionVerdict>) -> Self {
        Self {
            verdicts: Mutex::new(verdicts.into()),
        }
    }
}

#[async_trait]
impl CompletionVerifier for ScriptedCompletion {
    async fn confirm(&self, _task: &str, _snapshot: &FusedStateSnapshot, _claim: &str) -> CompletionVerdict {
        self.verdicts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(CompletionVerdict::Confirmed {
                reason: "looks done".into(),
            })
    }
}

/// Action planner replying from a queue, then repeating a fallback reply.
pub struct ScriptedActionPlanner {
    replies: Mutex<VecDeque<Result<String, PlannerError>>>,
    fallback: String,
    progressing: bool,
    requests: Mutex<Vec<ActionRequest>>,
    progress_checks: AtomicUsize,
}

impl ScriptedActionPlanner {
    pub fn new(replies: &[&str], fallback: &str) -> Self {
        Self {
            replies: Mutex::new(replies.iter().map(|r| Ok(r.to_string())).collect()),
            fallback: fallback.to_string(),
            progressing: true,
            requests: Mutex::new(Vec::new()),
            progress_checks: AtomicUsize::new(0),
        }
    }

    pub fn repeating(reply: &str) -> Self {
        Self::new(&[], reply)
    }

    pub fn with_error_first(self, error: PlannerError) -> Self {
        self.replies.lock().unwrap().push_front(Err(error));
        self
    }

    pub fn not_progressing(mut self) -> Self {
        self.progressing = false;
        self
    }

    pub fn requests(&self) -> Vec<ActionRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn progress_checks(&self) -> usize {
        self.progress_checks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ActionPlanner for ScriptedActionPlanner {
    async fn propose(&self, request: &ActionRequest) -> Result<String, PlannerError> {
        self.requests.lock().unwrap().push(request.clone());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(self.fallback.clone()))
    }

    async fn check_progress(
        &self,
        _request: &ProgressCheckRequest,
    ) -> Result<ProgressVerdict, PlannerError> {
        self.progress_checks.fetch_add(1, Ordering::SeqCst);
        Ok(ProgressVerdict {
            progressing: self.progressing,
            reason: "scripted".into(),
        })
    }
}

/// How a scripted strategic call behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Immediate,
    Fail,
    Never,
}

/// Strategic planner with per-operation behavior and call accounting.
pub struct ScriptedStrategicPlanner {
    initial: Reply,
    recovery: Reply,
    calls: Mutex<Vec<PlanTrigger>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

/// Decrements the in-flight count when a call finishes or is dropped.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ScriptedStrategicPlanner {
    pub fn new(initial: Reply, recovery: Reply) -> Self {
        Self {
            initial,
            recovery,
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> Vec<PlanTrigger> {
        self.calls.lock().unwrap().clone()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn respond(&self, trigger: PlanTrigger, reply: Reply) -> Result<PlanningResult, PlannerError> {
        self.calls.lock().unwrap().push(trigger);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);
        match reply {
            Reply::Immediate => Ok(planning_result(trigger.as_str())),
            Reply::Fail => Err(PlannerError::Transport("planner offline".into())),
            Reply::Never => std::future::pending().await,
        }
    }
}

#[async_trait]
impl StrategicPlanner for ScriptedStrategicPlanner {
    async fn plan_initial(&self, _request: InitialPlanRequest) -> Result<PlanningResult, PlannerError> {
        self.respond(PlanTrigger::Initial, self.initial).await
    }

    async fn plan_recovery(&self, request: RecoveryPlanRequest) -> Result<PlanningResult, PlannerError> {
        self.respond(request.trigger, self.recovery).await
    }
}

pub fn planning_result(name: &str) -> PlanningResult {
    let strategy = |suffix: &str| Strategy {
        name: format!("{} {}", name, suffix),
        description: "scripted strategy".into(),
        steps: vec!["tap next".into()],
        confidence: Confidence::High,
    };
    PlanningResult::new(vec![strategy("primary"), strategy("fallback")], 0, None).unwrap()
}

/// A full set of scripted collaborators.
pub struct Harness {
    pub screen: Arc<StaticScreen>,
    pub executor: Arc<RecordingExecutor>,
    pub verifier: Arc<FixedVerifier>,
    pub completion: Arc<ScriptedCompletion>,
    pub action: Arc<ScriptedActionPlanner>,
    pub strategic: Arc<ScriptedStrategicPlanner>,
}

impl Harness {
    pub fn new(action: ScriptedActionPlanner, strategic: ScriptedStrategicPlanner) -> Self {
        Self {
            screen: Arc::new(StaticScreen::new()),
            executor: Arc::new(RecordingExecutor::default()),
            verifier: Arc::new(FixedVerifier::passing()),
            completion: Arc::new(ScriptedCompletion::default()),
            action: Arc::new(action),
            strategic: Arc::new(strategic),
        }
    }

    pub fn with_verifier(mut self, verifier: FixedVerifier) -> Self {
        self.verifier = Arc::new(verifier);
        self
    }

    pub fn with_completion(mut self, completion: ScriptedCompletion) -> Self {
        self.completion = Arc::new(completion);
        self
    }

    pub fn with_executor(mut self, executor: RecordingExecutor) -> Self {
        self.executor = Arc::new(executor);
        self
    }

    pub fn agent(&self, config: OrchestratorConfig) -> Agent {
        let parts = Collaborators {
            screen: self.screen.clone(),
            executor: self.executor.clone(),
            verifier: self.verifier.clone(),
            completion: self.completion.clone(),
            action_planner: self.action.clone(),
            strategic_planner: self.strategic.clone(),
        };
        Agent::new(config, parts)
    }
}
