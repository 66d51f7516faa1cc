//! Device-side collaborators consumed by the orchestrator.
//!
//! Screen capture, gesture dispatch and post-action verification live outside
//! this crate; these traits are the contracts they must satisfy.

mod replay;
mod verifier;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::actions::Step;
use crate::fusion::{ElementRecord, FusedStateSnapshot, UiElement};

pub use replay::{ReplayDevice, ReplayError};
pub use verifier::{CompletionVerdict, FailureKind, SnapshotVerifier, VerificationOutcome};

/// Screen capture errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("Capture session unavailable: {0}")]
    Unavailable(String),
    #[error("Capture failed: {0}")]
    Failed(String),
}

/// Action dispatch errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutorError {
    #[error("Execution substrate unavailable: {0}")]
    Unavailable(String),
    #[error("Target not found: {0}")]
    TargetNotFound(String),
    #[error("Stale state: {0}")]
    StaleState(String),
    #[error("Dispatch failed: {0}")]
    Failed(String),
}

impl ExecutorError {
    /// Failure class used for recovery decisions.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::TargetNotFound(_) => FailureKind::TargetNotFound,
            Self::StaleState(_) | Self::Unavailable(_) => FailureKind::StaleState,
            Self::Failed(_) => FailureKind::NoObservableEffect,
        }
    }
}

/// One raw observation of the screen.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreenCapture {
    pub width: u32,
    pub height: u32,
    /// Elements from the platform UI tree.
    #[serde(default)]
    pub structured: Vec<UiElement>,
    /// Elements from visual text recognition, if it ran.
    #[serde(default)]
    pub recognized: Option<Vec<UiElement>>,
    #[serde(default)]
    pub foreground_app: Option<String>,
    /// Encoded screenshot (PNG), if captured.
    #[serde(skip)]
    pub image: Option<Vec<u8>>,
    #[serde(default = "Utc::now")]
    pub captured_at: DateTime<Utc>,
}

impl ScreenCapture {
    pub fn new(width: u32, height: u32, structured: Vec<UiElement>) -> Self {
        Self {
            width,
            height,
            structured,
            recognized: None,
            foreground_app: None,
            image: None,
            captured_at: Utc::now(),
        }
    }

    pub fn with_recognized(mut self, recognized: Option<Vec<UiElement>>) -> Self {
        self.recognized = recognized;
        self
    }

    pub fn with_foreground_app(mut self, app: impl Into<String>) -> Self {
        self.foreground_app = Some(app.into());
        self
    }
}

/// A step resolved against the current snapshot, ready to dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchRequest {
    pub step: Step,
    /// The resolved target element, when the step names one.
    pub target: Option<ElementRecord>,
    /// Where to touch, for pointer steps.
    pub point: Option<(i32, i32)>,
    /// Frame size the point refers to.
    pub frame: (u32, u32),
}

/// What the executor reports after dispatching.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionEffect {
    pub detail: String,
}

/// Produces raw observations of the device screen.
#[async_trait]
pub trait ScreenStateProvider: Send + Sync {
    /// Check that a capture session exists.
    async fn ready(&self) -> Result<(), CaptureError> {
        Ok(())
    }

    async fn capture(&self) -> Result<ScreenCapture, CaptureError>;
}

/// Executes gestures and input on the device.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn ready(&self) -> Result<(), ExecutorError> {
        Ok(())
    }

    async fn dispatch(&self, request: &DispatchRequest) -> Result<ActionEffect, ExecutorError>;
}

/// Classifies the effect of a dispatched step.
#[async_trait]
pub trait Verifier: Send + Sync {
    async fn check(
        &self,
        before: &FusedStateSnapshot,
        after: &FusedStateSnapshot,
        step: &Step,
    ) -> VerificationOutcome;
}

/// Independently confirms a claimed task completion.
#[async_trait]
pub trait CompletionVerifier: Send + Sync {
    async fn confirm(
        &self,
        task: &str,
        snapshot: &FusedStateSnapshot,
        claim: &str,
    ) -> CompletionVerdict;
}
