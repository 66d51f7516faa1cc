//! Element fusion: merges structured and recognized element lists.

use serde::{Deserialize, Serialize};

use super::element::{Bounds, ElementKind, ElementRecord, Interactivity, Provenance, UiElement};
use super::ids::{IdAllocator, DEFAULT_SLUG_MAX_LEN};
use super::snapshot::FusedStateSnapshot;
use crate::device::ScreenCapture;

/// Tunables for the fusion engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    /// IoU above which a recognized element duplicates a structured one.
    pub iou_threshold: f64,
    /// Maximum number of elements kept per snapshot.
    pub max_elements: usize,
    /// Maximum slug length for element ids.
    pub slug_max_len: usize,
    /// Grid size (pixels) used when fingerprinting layouts.
    pub fingerprint_quantum: i32,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            iou_threshold: 0.5,
            max_elements: 200,
            slug_max_len: DEFAULT_SLUG_MAX_LEN,
            fingerprint_quantum: 24,
        }
    }
}

impl FusionConfig {
    pub fn with_iou_threshold(mut self, threshold: f64) -> Self {
        self.iou_threshold = threshold;
        self
    }

    pub fn with_max_elements(mut self, max: usize) -> Self {
        self.max_elements = max;
        self
    }
}

/// Working entry before ids are assigned.
struct Candidate {
    kind: ElementKind,
    text: String,
    bounds: Bounds,
    flags: Interactivity,
    provenance: Provenance,
}

/// Produces [`FusedStateSnapshot`]s from raw captures.
#[derive(Debug, Clone, Default)]
pub struct FusionEngine {
    config: FusionConfig,
}

impl FusionEngine {
    pub fn new(config: FusionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    /// Fuse one capture into a snapshot.
    pub fn fuse(&self, capture: &ScreenCapture) -> FusedStateSnapshot {
        let recognized = capture.recognized.as_deref().unwrap_or(&[]);
        let candidates = self.merge(&capture.structured, recognized);
        let candidates = self.cap(candidates);

        let mut ids = IdAllocator::new(self.config.slug_max_len);
        let elements = candidates
            .into_iter()
            .map(|c| ElementRecord {
                id: ids.allocate(c.kind.tag(), &c.text),
                kind: c.kind,
                text: c.text,
                bounds: c.bounds,
                flags: c.flags,
                provenance: c.provenance,
            })
            .collect();

        FusedStateSnapshot::new(
            elements,
            capture.width,
            capture.height,
            capture.foreground_app.clone(),
            capture.captured_at,
            self.config.fingerprint_quantum,
        )
    }

    /// Merge recognized text into the structured list.
    ///
    /// Structured text is authoritative and never overwritten.
    fn merge(&self, structured: &[UiElement], recognized: &[UiElement]) -> Vec<Candidate> {
        let leaves: Vec<bool> = structured
            .iter()
            .enumerate()
            .map(|(i, outer)| {
                !structured.iter().enumerate().any(|(j, inner)| {
                    i != j
                        && inner.bounds != outer.bounds
                        && !inner.bounds.is_empty()
                        && outer.bounds.contains(&inner.bounds)
                })
            })
            .collect();

        let mut merged: Vec<Candidate> = structured
            .iter()
            .map(|e| Candidate {
                kind: e.kind,
                text: e.text.trim().to_string(),
                bounds: e.bounds,
                flags: e.flags,
                provenance: Provenance::Structured,
            })
            .collect();
        let mut standalone = Vec::new();
        let mut dropped = 0usize;

        for rec in recognized {
            let text = rec.text.trim();
            if text.is_empty() {
                continue;
            }

            let best = structured
                .iter()
                .enumerate()
                .filter_map(|(i, s)| {
                    let iou = s.bounds.iou(&rec.bounds);
                    let inside_leaf =
                        leaves[i] && !s.bounds.is_empty() && s.bounds.contains(&rec.bounds);
                    (iou > self.config.iou_threshold || inside_leaf).then_some((i, iou))
                })
                .max_by(|a, b| a.1.total_cmp(&b.1));

            match best {
                Some((i, _)) if merged[i].text.is_empty() => {
                    merged[i].text = text.to_string();
                    merged[i].provenance = Provenance::Merged;
                }
                Some(_) => dropped += 1,
                None => standalone.push(Candidate {
                    kind: ElementKind::Text,
                    text: text.to_string(),
                    bounds: rec.bounds,
                    flags: rec.flags,
                    provenance: Provenance::Recognized,
                }),
            }
        }

        if dropped > 0 {
            tracing::trace!(dropped, "Dropped recognized duplicates of labelled elements");
        }

        merged.extend(standalone);
        merged
    }

    /// Enforce the element cap, keeping the most useful entries in order.
    fn cap(&self, candidates: Vec<Candidate>) -> Vec<Candidate> {
        let max = self.config.max_elements;
        if candidates.len() <= max {
            return candidates;
        }

        let rank = |c: &Candidate| match (c.flags.is_interactive(), c.provenance) {
            (true, _) => 0,
            (false, Provenance::Structured | Provenance::Merged) if !c.text.is_empty() => 1,
            (false, Provenance::Recognized) => 2,
            _ => 3,
        };

        let mut order: Vec<(usize, usize)> = candidates
            .iter()
            .enumerate()
            .map(|(i, c)| (rank(c), i))
            .collect();
        order.sort_unstable();
        let mut keep: Vec<usize> = order.into_iter().take(max).map(|(_, i)| i).collect();
        keep.sort_unstable();

        tracing::debug!(
            total = candidates.len(),
            kept = max,
            "Element cap reached, dropping low-value elements"
        );

        let mut keep = keep.into_iter().peekable();
        candidates
            .into_iter()
            .enumerate()
            .filter_map(|(i, c)| {
                if keep.peek() == Some(&i) {
                    keep.next();
                    Some(c)
                } else {
                    None
                }
            })
            .collect()
    }
}
