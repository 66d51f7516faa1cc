//! Verification outcomes and the default snapshot-based verifier.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::Verifier;
use crate::actions::{ActionKind, Step};
use crate::fusion::FusedStateSnapshot;

/// Why a dispatched step is considered failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    TargetNotFound,
    StaleState,
    WrongApp,
    NoObservableEffect,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::TargetNotFound => "target not found",
            Self::StaleState => "stale state",
            Self::WrongApp => "wrong app",
            Self::NoObservableEffect => "no observable effect",
        };
        f.write_str(s)
    }
}

/// Result of checking a step's effect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationOutcome {
    Success,
    Failure { kind: FailureKind, detail: String },
}

impl VerificationOutcome {
    pub fn failure(kind: FailureKind, detail: impl Into<String>) -> Self {
        Self::Failure {
            kind,
            detail: detail.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Answer of the completion verifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionVerdict {
    Confirmed { reason: String },
    Rejected { reason: String, wrong_task: bool },
}

impl CompletionVerdict {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, Self::Confirmed { .. })
    }

    pub fn reason(&self) -> &str {
        match self {
            Self::Confirmed { reason } | Self::Rejected { reason, .. } => reason,
        }
    }
}

/// Verifier that compares consecutive snapshots.
#[derive(Debug, Clone, Default)]
pub struct SnapshotVerifier {
    expected_app: Option<String>,
}

impl SnapshotVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Treat leaving this app (outside navigation steps) as a failure.
    pub fn with_expected_app(mut self, app: impl Into<String>) -> Self {
        self.expected_app = Some(app.into());
        self
    }
}

#[async_trait]
impl Verifier for SnapshotVerifier {
    async fn check(
        &self,
        before: &FusedStateSnapshot,
        after: &FusedStateSnapshot,
        step: &Step,
    ) -> VerificationOutcome {
        if let Some(target) = &step.target {
            if before.element(target).is_none() {
                return VerificationOutcome::failure(
                    FailureKind::TargetNotFound,
                    format!("'{}' was not on screen", target),
                );
            }
        }

        if let (Some(expected), Some(actual)) = (&self.expected_app, after.foreground_app()) {
            if actual != expected && !step.kind.is_navigation() {
                return VerificationOutcome::failure(
                    FailureKind::WrongApp,
                    format!("expected {} in foreground, found {}", expected, actual),
                );
            }
        }

        if step.kind.expects_change()
            && before.fingerprint() == after.fingerprint()
            && after.diff(before).is_empty()
            && before.foreground_app() == after.foreground_app()
        {
            let detail = match step.kind {
                ActionKind::Type => "typed text did not appear".to_string(),
                _ => format!("{} changed nothing on screen", step.label()),
            };
            return VerificationOutcome::failure(FailureKind::NoObservableEffect, detail);
        }

        VerificationOutcome::Success
    }
}
