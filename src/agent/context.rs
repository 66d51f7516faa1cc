//! Bounded conversation history with one pinned entry.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Default number of non-pinned entries retained.
pub const DEFAULT_CONTEXT_WINDOW: usize = 12;

/// Who produced a conversation entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// The pinned task entry.
    Task,
    /// Planner output.
    Assistant,
    /// Observations fed back to the planner.
    Observation,
    /// Synthetic warnings and verification failures.
    Diagnostic,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Task => "task",
            Self::Assistant => "assistant",
            Self::Observation => "observation",
            Self::Diagnostic => "diagnostic",
        }
    }
}

/// One entry in the conversation history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationEntry {
    pub role: Role,
    pub content: String,
    pub pinned: bool,
}

impl ConversationEntry {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            pinned: false,
        }
    }
}

/// Ordered history whose first entry is permanently pinned.
///
/// The pinned entry holds the task plus adopted guidance. It is rewritten in
/// place and never counts against the window.
#[derive(Debug, Clone)]
pub struct ContextManager {
    task: String,
    guidance: Option<String>,
    pinned: ConversationEntry,
    entries: VecDeque<ConversationEntry>,
    window: usize,
}

impl ContextManager {
    pub fn new(task: impl Into<String>, window: usize) -> Self {
        let task = task.into();
        let pinned = ConversationEntry {
            role: Role::Task,
            content: render_pinned(&task, None),
            pinned: true,
        };
        Self {
            task,
            guidance: None,
            pinned,
            entries: VecDeque::with_capacity(window),
            window,
        }
    }

    pub fn task(&self) -> &str {
        &self.task
    }

    pub fn guidance(&self) -> Option<&str> {
        self.guidance.as_deref()
    }

    /// Replace the adopted guidance, rewriting the pinned entry.
    pub fn set_guidance(&mut self, guidance: impl Into<String>) {
        let guidance = guidance.into();
        self.pinned.content = render_pinned(&self.task, Some(&guidance));
        self.guidance = Some(guidance);
    }

    pub fn pinned(&self) -> &ConversationEntry {
        &self.pinned
    }

    /// Append an entry, dropping the oldest non-pinned entries beyond the window.
    pub fn push(&mut self, role: Role, content: impl Into<String>) {
        self.entries.push_back(ConversationEntry::new(role, content));
        while self.entries.len() > self.window {
            self.entries.pop_front();
        }
    }

    pub fn push_diagnostic(&mut self, content: impl Into<String>) {
        self.push(Role::Diagnostic, content);
    }

    /// Non-pinned entries, oldest first.
    pub fn history(&self) -> Vec<ConversationEntry> {
        self.entries.iter().cloned().collect()
    }

    /// All entries with the pinned one first.
    pub fn entries(&self) -> Vec<ConversationEntry> {
        std::iter::once(self.pinned.clone())
            .chain(self.entries.iter().cloned())
            .collect()
    }

    /// Number of non-pinned entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn window(&self) -> usize {
        self.window
    }
}

fn render_pinned(task: &str, guidance: Option<&str>) -> String {
    match guidance {
        Some(guidance) => format!("Task: {}\n\nGuidance:\n{}", task, guidance.trim_end()),
        None => format!("Task: {}", task),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pinned_entry_survives_trimming() {
        let mut ctx = ContextManager::new("send a message", 3);
        for i in 0..20 {
            ctx.push(Role::Observation, format!("entry {}", i));
        }
        let entries = ctx.entries();
        assert_eq!(entries.len(), 4);
        assert!(entries[0].pinned);
        assert_eq!(entries[0].content, "Task: send a message");
        assert_eq!(entries.iter().filter(|e| e.pinned).count(), 1);
    }

    #[test]
    fn test_window_keeps_most_recent_in_order() {
        let mut ctx = ContextManager::new("task", 3);
        for i in 0..5 {
            ctx.push(Role::Assistant, format!("{}", i));
        }
        ctx.push_diagnostic("loop detected");
        let contents: Vec<String> = ctx.history().into_iter().map(|e| e.content).collect();
        assert_eq!(contents, vec!["3", "4", "loop detected"]);
        assert_eq!(ctx.len(), 3);
    }

    #[test]
    fn test_guidance_rewrites_pinned_in_place() {
        let mut ctx = ContextManager::new("open settings", DEFAULT_CONTEXT_WINDOW);
        ctx.push(Role::Assistant, "tap");
        ctx.set_guidance("Use the search bar");
        ctx.set_guidance("Scroll the list");
        assert_eq!(ctx.guidance(), Some("Scroll the list"));
        assert!(ctx.pinned().content.contains("Scroll the list"));
        assert!(!ctx.pinned().content.contains("search bar"));
        assert_eq!(ctx.len(), 1);
    }
}
