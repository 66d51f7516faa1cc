//! Stable element id assignment.
//!
//! Ids are `<tag>_<slug>` where the slug is a lower-cased ASCII rendering of
//! the element text. Collisions get `_2`, `_3`, ... in encounter order, so the
//! same input in the same order always yields the same ids.

use std::collections::{HashMap, HashSet};

use once_cell::sync::Lazy;
use regex::Regex;

/// Default maximum slug length (in characters, excluding the tag).
pub const DEFAULT_SLUG_MAX_LEN: usize = 24;

static NON_SLUG_RUN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^a-z0-9]+").expect("static slug pattern"));

/// Turn free text into an `[a-z0-9_]` slug of at most `max_len` characters.
///
/// Runs of anything other than ASCII letters and digits collapse to one
/// underscore; the result never starts or ends with an underscore.
pub fn slugify(text: &str, max_len: usize) -> String {
    let lowered = text.to_lowercase();
    let collapsed = NON_SLUG_RUN.replace_all(&lowered, "_");
    let trimmed = collapsed.trim_matches('_');
    let truncated: String = trimmed.chars().take(max_len).collect();
    truncated.trim_end_matches('_').to_string()
}

/// Assigns snapshot-unique ids in encounter order.
#[derive(Debug, Default)]
pub struct IdAllocator {
    max_len: usize,
    used: HashSet<String>,
    next_suffix: HashMap<String, usize>,
}

impl IdAllocator {
    pub fn new(max_len: usize) -> Self {
        Self {
            max_len,
            used: HashSet::new(),
            next_suffix: HashMap::new(),
        }
    }

    /// Allocate the id for an element with the given type tag and text.
    pub fn allocate(&mut self, tag: &str, text: &str) -> String {
        let slug = slugify(text, self.max_len);
        let base = if slug.is_empty() {
            tag.to_string()
        } else {
            format!("{}_{}", tag, slug)
        };

        if self.used.insert(base.clone()) {
            return base;
        }

        let suffix = self.next_suffix.entry(base.clone()).or_insert(2);
        loop {
            let candidate = format!("{}_{}", base, suffix);
            *suffix += 1;
            if self.used.insert(candidate.clone()) {
                return candidate;
            }
        }
    }
}
