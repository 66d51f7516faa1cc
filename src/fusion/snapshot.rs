//! Fused snapshots, element-level diffs and layout fingerprints.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::element::ElementRecord;

/// Deduplicated, stably-identified view of one observation cycle.
///
/// Snapshots are never mutated after fusion; each iteration produces a new
/// one which supersedes the previous.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusedStateSnapshot {
    elements: Vec<ElementRecord>,
    width: u32,
    height: u32,
    foreground_app: Option<String>,
    captured_at: DateTime<Utc>,
    fingerprint: u64,
}

impl FusedStateSnapshot {
    /// Build a snapshot, deriving its fingerprint with the given grid size.
    pub fn new(
        elements: Vec<ElementRecord>,
        width: u32,
        height: u32,
        foreground_app: Option<String>,
        captured_at: DateTime<Utc>,
        quantum: i32,
    ) -> Self {
        let fingerprint = layout_fingerprint(&elements, quantum);
        Self {
            elements,
            width,
            height,
            foreground_app,
            captured_at,
            fingerprint,
        }
    }

    pub fn elements(&self) -> &[ElementRecord] {
        &self.elements
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn foreground_app(&self) -> Option<&str> {
        self.foreground_app.as_deref()
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }

    /// Look up an element by id.
    pub fn element(&self, id: &str) -> Option<&ElementRecord> {
        self.elements.iter().find(|e| e.id == id)
    }

    /// Element-level diff of `self` against an earlier snapshot.
    pub fn diff(&self, previous: &FusedStateSnapshot) -> SnapshotDiff {
        let before: HashMap<&str, &ElementRecord> =
            previous.elements.iter().map(|e| (e.id.as_str(), e)).collect();
        let after: HashSet<&str> = self.elements.iter().map(|e| e.id.as_str()).collect();

        let mut diff = SnapshotDiff::default();
        for element in &self.elements {
            match before.get(element.id.as_str()) {
                None => diff.added.push(element.id.clone()),
                Some(old) => {
                    if old.text != element.text
                        || old.bounds != element.bounds
                        || old.flags != element.flags
                    {
                        diff.changed.push(element.id.clone());
                    }
                }
            }
        }
        diff.removed = previous
            .elements
            .iter()
            .filter(|e| !after.contains(e.id.as_str()))
            .map(|e| e.id.clone())
            .collect();
        diff
    }

    /// Multi-line element listing for planner prompts.
    pub fn render(&self) -> String {
        let mut out = format!(
            "Screen {}x{}{}\n",
            self.width,
            self.height,
            self.foreground_app
                .as_deref()
                .map(|app| format!(", app: {}", app))
                .unwrap_or_default()
        );
        for element in &self.elements {
            out.push_str(&element.describe());
            out.push('\n');
        }
        out
    }
}

/// Added/removed/changed element ids between two snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub changed: Vec<String>,
}

impl SnapshotDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }

    /// Compact summary for prompts and diagnostics.
    pub fn summary(&self) -> String {
        if self.is_empty() {
            return "no element changes since the previous screen".to_string();
        }
        let mut parts = Vec::new();
        if !self.added.is_empty() {
            parts.push(format!("added: {}", self.added.join(", ")));
        }
        if !self.removed.is_empty() {
            parts.push(format!("removed: {}", self.removed.join(", ")));
        }
        if !self.changed.is_empty() {
            parts.push(format!("changed: {}", self.changed.join(", ")));
        }
        parts.join("; ")
    }
}

/// Coarse, order-insensitive hash of element kinds and quantized positions.
///
/// Text is ignored so that blinking cursors or clocks don't defeat
/// stagnation detection.
pub fn layout_fingerprint(elements: &[ElementRecord], quantum: i32) -> u64 {
    let q = quantum.max(1);
    let mut cells: Vec<u64> = elements
        .iter()
        .map(|e| {
            let mut hasher = DefaultHasher::new();
            e.kind.hash(&mut hasher);
            (e.bounds.left.div_euclid(q)).hash(&mut hasher);
            (e.bounds.top.div_euclid(q)).hash(&mut hasher);
            (e.bounds.right.div_euclid(q)).hash(&mut hasher);
            (e.bounds.bottom.div_euclid(q)).hash(&mut hasher);
            hasher.finish()
        })
        .collect();
    cells.sort_unstable();

    let mut hasher = DefaultHasher::new();
    cells.hash(&mut hasher);
    hasher.finish()
}
