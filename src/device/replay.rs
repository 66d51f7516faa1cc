//! Replay device: serves recorded captures and advances on each dispatch.
//!
//! Useful for offline planner evaluation. The last frame repeats once the
//! trace is exhausted.

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;

use super::{
    ActionEffect, ActionExecutor, CaptureError, DispatchRequest, ExecutorError, ScreenCapture,
    ScreenStateProvider,
};

/// Replay trace loading errors.
#[derive(Error, Debug)]
pub enum ReplayError {
    #[error("Failed to read trace: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse trace: {0}")]
    Parse(#[from] serde_json::Error),
}

/// A recorded sequence of screens.
#[derive(Debug, Default)]
pub struct ReplayDevice {
    frames: Vec<ScreenCapture>,
    cursor: AtomicUsize,
    dispatched: Mutex<Vec<DispatchRequest>>,
}

impl ReplayDevice {
    pub fn new(frames: Vec<ScreenCapture>) -> Self {
        Self {
            frames,
            cursor: AtomicUsize::new(0),
            dispatched: Mutex::new(Vec::new()),
        }
    }

    /// Load a JSON array of captures.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ReplayError> {
        let content = fs::read_to_string(path)?;
        let frames: Vec<ScreenCapture> = serde_json::from_str(&content)?;
        Ok(Self::new(frames))
    }

    /// Rewind to the first frame and forget dispatched steps.
    pub fn rewind(&self) {
        self.cursor.store(0, Ordering::SeqCst);
        if let Ok(mut log) = self.dispatched.lock() {
            log.clear();
        }
    }

    pub fn position(&self) -> usize {
        self.cursor.load(Ordering::SeqCst)
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Requests dispatched so far, in order.
    pub fn dispatched(&self) -> Vec<DispatchRequest> {
        self.dispatched
            .lock()
            .map(|log| log.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ScreenStateProvider for ReplayDevice {
    async fn ready(&self) -> Result<(), CaptureError> {
        if self.frames.is_empty() {
            return Err(CaptureError::Unavailable("replay trace has no frames".into()));
        }
        Ok(())
    }

    async fn capture(&self) -> Result<ScreenCapture, CaptureError> {
        let index = self.position().min(self.frames.len().saturating_sub(1));
        let mut frame = self
            .frames
            .get(index)
            .cloned()
            .ok_or_else(|| CaptureError::Unavailable("replay trace has no frames".into()))?;
        frame.captured_at = Utc::now();
        Ok(frame)
    }
}

#[async_trait]
impl ActionExecutor for ReplayDevice {
    async fn ready(&self) -> Result<(), ExecutorError> {
        if self.frames.is_empty() {
            return Err(ExecutorError::Unavailable("replay trace has no frames".into()));
        }
        Ok(())
    }

    async fn dispatch(&self, request: &DispatchRequest) -> Result<ActionEffect, ExecutorError> {
        if let Ok(mut log) = self.dispatched.lock() {
            log.push(request.clone());
        }
        let last = self.frames.len().saturating_sub(1);
        let previous = self
            .cursor
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |i| Some((i + 1).min(last)))
            .unwrap_or_else(|i| i);
        Ok(ActionEffect {
            detail: format!("replayed {} (frame {} -> {})", request.step.label(), previous, self.position()),
        })
    }
}
