//! Stagnation and loop detection over snapshot fingerprints and acted targets.

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::actions::Step;

/// Tunables for [`StagnationDetector`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StagnationConfig {
    /// Trailing window of fingerprints and actions.
    pub window: usize,
    /// Repeats of one fingerprint within the window that count as stagnation.
    pub repeat_threshold: usize,
    /// Consecutive actions on one target without a layout change that count as a loop.
    pub same_target_threshold: usize,
}

impl Default for StagnationConfig {
    fn default() -> Self {
        Self {
            window: 8,
            repeat_threshold: 3,
            same_target_threshold: 3,
        }
    }
}

/// A detected lack of progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StagnationReport {
    /// The same element was acted on repeatedly and nothing moved.
    SameElementLoop { target: String, count: usize },
    /// One screen layout keeps coming back.
    StructuralStagnation { repeats: usize },
}

impl StagnationReport {
    /// Instruction injected into the next planner call.
    pub fn instruction(&self) -> String {
        match self {
            Self::SameElementLoop { target, count } => format!(
                "Loop detected: '{}' was acted on {} times without any change. \
                 Try a different element or navigate away.",
                target, count
            ),
            Self::StructuralStagnation { repeats } => format!(
                "The screen has returned to the same layout {} times. \
                 The current approach is not working; try a different path.",
                repeats
            ),
        }
    }
}

#[derive(Debug, Clone)]
struct ActionMark {
    target: Option<String>,
    fingerprint: u64,
}

/// Tracks trailing fingerprints and acted targets.
#[derive(Debug, Clone, Default)]
pub struct StagnationDetector {
    config: StagnationConfig,
    fingerprints: VecDeque<u64>,
    actions: VecDeque<ActionMark>,
}

impl StagnationDetector {
    pub fn new(config: StagnationConfig) -> Self {
        Self {
            config,
            fingerprints: VecDeque::new(),
            actions: VecDeque::new(),
        }
    }

    /// Record the fingerprint of a freshly observed snapshot.
    pub fn observe(&mut self, fingerprint: u64) {
        self.fingerprints.push_back(fingerprint);
        while self.fingerprints.len() > self.config.window.max(1) {
            self.fingerprints.pop_front();
        }
    }

    /// Record a dispatched step and the fingerprint it was dispatched against.
    pub fn record_action(&mut self, step: &Step, fingerprint: u64) {
        self.actions.push_back(ActionMark {
            target: step.target.clone(),
            fingerprint,
        });
        while self.actions.len() > self.config.window.max(1) {
            self.actions.pop_front();
        }
    }

    /// Check the trailing history for a loop or repeated layout.
    pub fn check(&self) -> Option<StagnationReport> {
        self.same_element_loop().or_else(|| self.structural_stagnation())
    }

    fn same_element_loop(&self) -> Option<StagnationReport> {
        let n = self.config.same_target_threshold;
        if n == 0 || self.actions.len() < n {
            return None;
        }
        let recent: Vec<&ActionMark> = self.actions.iter().rev().take(n).collect();
        let first = recent[0];
        let target = first.target.as_ref()?;
        let looping = recent
            .iter()
            .all(|a| a.target.as_ref() == Some(target) && a.fingerprint == first.fingerprint);
        // The layout observed after the last action must be unchanged as well.
        let unchanged = self
            .fingerprints
            .back()
            .map_or(true, |fp| *fp == first.fingerprint);
        (looping && unchanged).then(|| StagnationReport::SameElementLoop {
            target: target.clone(),
            count: n,
        })
    }

    fn structural_stagnation(&self) -> Option<StagnationReport> {
        let mut counts: HashMap<u64, usize> = HashMap::new();
        for fp in &self.fingerprints {
            *counts.entry(*fp).or_default() += 1;
        }
        let repeats = counts.values().copied().max().unwrap_or(0);
        (self.config.repeat_threshold > 0 && repeats >= self.config.repeat_threshold)
            .then_some(StagnationReport::StructuralStagnation { repeats })
    }
}
