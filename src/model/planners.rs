//! Model-backed implementations of the planner and verifier contracts.

use std::fmt::Write as _;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::client::{MessageBuilder, ModelClient, ModelError};
use crate::actions::parse_lenient;
use crate::agent::{ConversationEntry, FailureRecord};
use crate::config::{
    action_system_prompt, completion_system_prompt, progress_system_prompt,
    strategic_system_prompt,
};
use crate::device::{CompletionVerdict, CompletionVerifier};
use crate::fusion::FusedStateSnapshot;
use crate::planner::{
    parse_planning_result, ActionPlanner, ActionRequest, InitialPlanRequest, PlannerError,
    PlanningResult, ProgressCheckRequest, ProgressVerdict, RecoveryPlanRequest,
    StrategicPlanner,
};

impl From<ModelError> for PlannerError {
    fn from(e: ModelError) -> Self {
        PlannerError::Transport(e.to_string())
    }
}

async fn ask(client: &ModelClient, system: String, user: Value) -> Result<String, ModelError> {
    let messages = [MessageBuilder::create_system_message(&system), user];
    Ok(client.request(&messages).await?.content)
}

/// Fast planner: one chat call per iteration.
#[derive(Debug, Clone)]
pub struct ModelActionPlanner {
    client: ModelClient,
}

impl ModelActionPlanner {
    pub fn new(client: ModelClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ActionPlanner for ModelActionPlanner {
    async fn propose(&self, request: &ActionRequest) -> Result<String, PlannerError> {
        let text = render_action_request(request);
        let user = MessageBuilder::create_user_message(
            &text,
            request.image.as_deref().map(Vec::as_slice),
        );
        let reply = ask(&self.client, action_system_prompt(), user).await?;
        debug!(iteration = request.iteration, chars = reply.len(), "Action planner replied");
        Ok(reply)
    }

    async fn check_progress(
        &self,
        request: &ProgressCheckRequest,
    ) -> Result<ProgressVerdict, PlannerError> {
        let mut text = format!("{}\n\nCurrent screen:\n{}", request.task, request.snapshot.render());
        render_history(&mut text, &request.history);
        let user = MessageBuilder::create_user_message(&text, None);
        let reply = ask(&self.client, progress_system_prompt(), user).await?;
        parse_lenient::<ProgressVerdict>(&reply).map_err(PlannerError::InvalidResponse)
    }
}

/// Strategic planner producing ranked strategies.
#[derive(Debug, Clone)]
pub struct ModelStrategicPlanner {
    client: ModelClient,
}

impl ModelStrategicPlanner {
    pub fn new(client: ModelClient) -> Self {
        Self { client }
    }

    async fn plan(&self, text: String) -> Result<PlanningResult, PlannerError> {
        let user = MessageBuilder::create_user_message(&text, None);
        let reply = ask(&self.client, strategic_system_prompt(), user).await?;
        Ok(parse_planning_result(&reply)?)
    }
}

#[async_trait]
impl StrategicPlanner for ModelStrategicPlanner {
    async fn plan_initial(
        &self,
        request: InitialPlanRequest,
    ) -> Result<PlanningResult, PlannerError> {
        let mut text = format!(
            "Task: {}\n\nCurrent screen:\n{}",
            request.task,
            request.snapshot.render()
        );
        render_history(&mut text, &request.context);
        self.plan(text).await
    }

    async fn plan_recovery(
        &self,
        request: RecoveryPlanRequest,
    ) -> Result<PlanningResult, PlannerError> {
        self.plan(render_recovery_request(&request)).await
    }
}

/// Completion verifier asking a model to judge the current screen.
#[derive(Debug, Clone)]
pub struct ModelCompletionVerifier {
    client: ModelClient,
}

impl ModelCompletionVerifier {
    pub fn new(client: ModelClient) -> Self {
        Self { client }
    }
}

#[derive(Debug, Deserialize)]
struct CompletionReply {
    #[serde(alias = "confirmed", alias = "complete")]
    accepted: bool,
    #[serde(default)]
    reason: String,
    #[serde(default)]
    wrong_task: bool,
}

impl From<CompletionReply> for CompletionVerdict {
    fn from(reply: CompletionReply) -> Self {
        if reply.accepted {
            CompletionVerdict::Confirmed {
                reason: reply.reason,
            }
        } else {
            CompletionVerdict::Rejected {
                reason: reply.reason,
                wrong_task: reply.wrong_task,
            }
        }
    }
}

/// Unverifiable claims are rejected.
fn verdict_from_reply(reply: &str) -> CompletionVerdict {
    match parse_lenient::<CompletionReply>(reply) {
        Ok(parsed) => parsed.into(),
        Err(reason) => CompletionVerdict::Rejected {
            reason: format!("unreadable verification reply: {}", reason),
            wrong_task: false,
        },
    }
}

#[async_trait]
impl CompletionVerifier for ModelCompletionVerifier {
    async fn confirm(
        &self,
        task: &str,
        snapshot: &FusedStateSnapshot,
        claim: &str,
    ) -> CompletionVerdict {
        let text = format!(
            "Task: {}\nClaim: {}\n\nCurrent screen:\n{}",
            task,
            claim,
            snapshot.render()
        );
        let user = MessageBuilder::create_user_message(&text, None);
        match ask(&self.client, completion_system_prompt(), user).await {
            Ok(reply) => verdict_from_reply(&reply),
            Err(e) => {
                warn!(error = %e, "Completion verification failed");
                CompletionVerdict::Rejected {
                    reason: format!("completion could not be verified: {}", e),
                    wrong_task: false,
                }
            }
        }
    }
}

fn render_history(out: &mut String, entries: &[ConversationEntry]) {
    if entries.is_empty() {
        return;
    }
    out.push_str("\nRecent history:\n");
    for entry in entries {
        let _ = writeln!(out, "[{}] {}", entry.role.as_str(), entry.content);
    }
}

fn render_failures(out: &mut String, failures: &[FailureRecord]) {
    if failures.is_empty() {
        return;
    }
    out.push_str("\nRecent failures:\n");
    for failure in failures {
        let _ = writeln!(out, "- iteration {}: {}", failure.iteration, failure.diagnosis);
    }
}

fn render_action_request(request: &ActionRequest) -> String {
    let mut out = format!(
        "{}\n\nIteration {}\n\nCurrent screen:\n{}\nChanges: {}\n",
        request.task,
        request.iteration,
        request.snapshot.render(),
        request.diff.summary()
    );
    render_history(&mut out, &request.history);
    render_failures(&mut out, &request.failures);
    if !request.diagnostics.is_empty() {
        out.push_str("\nWarnings for this turn:\n");
        for diagnostic in &request.diagnostics {
            let _ = writeln!(out, "! {}", diagnostic);
        }
    }
    out
}

fn render_recovery_request(request: &RecoveryPlanRequest) -> String {
    let mut out = format!(
        "Task: {}\nReason for replanning: {}\n\nCurrent screen:\n{}",
        request.task,
        request.trigger,
        request.snapshot.render()
    );
    if let Some(previous) = &request.previous_plan {
        let _ = write!(out, "\nPlan that stopped working:\n{}\n", previous.guidance());
    }
    render_failures(&mut out, &request.failures);
    render_history(&mut out, &request.context);
    out
}
