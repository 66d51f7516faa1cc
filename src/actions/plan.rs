//! Steps and plans produced by the fast action planner.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Marker placed at the start of the reasoning of a plan that replaced
/// unparseable planner output.
pub const PARSE_ERROR_MARKER: &str = "[parse-error]";

/// Supported action kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Tap,
    LongPress,
    Type,
    Swipe,
    Back,
    Home,
    Launch,
    Wait,
    Complete,
}

impl ActionKind {
    /// Map a planner-supplied action name onto a kind.
    ///
    /// Returns `None` for names we don't support.
    pub fn from_name(name: &str) -> Option<Self> {
        let normalized: String = name
            .trim()
            .to_ascii_lowercase()
            .chars()
            .map(|c| if c == ' ' || c == '-' { '_' } else { c })
            .collect();
        let kind = match normalized.as_str() {
            "tap" | "click" | "press" => Self::Tap,
            "long_press" | "longpress" | "long_click" => Self::LongPress,
            "type" | "input" | "type_text" | "enter_text" | "set_text" => Self::Type,
            "swipe" | "scroll" => Self::Swipe,
            "back" | "go_back" | "navigate_back" => Self::Back,
            "home" | "go_home" | "navigate_home" => Self::Home,
            "launch" | "open_app" | "launch_app" | "open" => Self::Launch,
            "wait" | "noop" | "no_op" => Self::Wait,
            "complete" | "done" | "finish" | "task_complete" => Self::Complete,
            _ => return None,
        };
        Some(kind)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tap => "tap",
            Self::LongPress => "long_press",
            Self::Type => "type",
            Self::Swipe => "swipe",
            Self::Back => "back",
            Self::Home => "home",
            Self::Launch => "launch",
            Self::Wait => "wait",
            Self::Complete => "complete",
        }
    }

    /// Whether a successful dispatch should visibly change the screen.
    pub fn expects_change(&self) -> bool {
        !matches!(self, Self::Wait | Self::Complete)
    }

    /// Steps that legitimately move to another app or screen stack.
    pub fn is_navigation(&self) -> bool {
        matches!(self, Self::Back | Self::Home | Self::Launch)
    }

    /// Steps aimed at a point on screen.
    pub fn is_pointer(&self) -> bool {
        matches!(self, Self::Tap | Self::LongPress)
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Swipe direction (content moves opposite to the finger for scrolls).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwipeDirection {
    Up,
    Down,
    Left,
    Right,
}

impl SwipeDirection {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "up" => Some(Self::Up),
            "down" => Some(Self::Down),
            "left" => Some(Self::Left),
            "right" => Some(Self::Right),
            _ => None,
        }
    }
}

/// Optional step argument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum StepPayload {
    Text(String),
    Direction(SwipeDirection),
    #[serde(with = "duration_ms")]
    Duration(Duration),
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// One concrete action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub kind: ActionKind,
    pub target: Option<String>,
    pub payload: Option<StepPayload>,
    pub description: String,
}

impl Step {
    pub fn new(kind: ActionKind, description: impl Into<String>) -> Self {
        Self {
            kind,
            target: None,
            payload: None,
            description: description.into(),
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_payload(mut self, payload: StepPayload) -> Self {
        self.payload = Some(payload);
        self
    }

    /// The no-op step used whenever planner output can't be acted upon.
    pub fn noop(description: impl Into<String>) -> Self {
        Self::new(ActionKind::Wait, description)
    }

    pub fn text(&self) -> Option<&str> {
        match &self.payload {
            Some(StepPayload::Text(text)) => Some(text),
            _ => None,
        }
    }

    pub fn duration(&self) -> Option<Duration> {
        match &self.payload {
            Some(StepPayload::Duration(d)) => Some(*d),
            _ => None,
        }
    }

    /// Short human-readable label, e.g. `tap btn_ok`.
    pub fn label(&self) -> String {
        match &self.target {
            Some(target) => format!("{} {}", self.kind, target),
            None => self.kind.to_string(),
        }
    }
}

/// Planner's confidence in a plan or strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Low,
    #[default]
    Medium,
    High,
}

impl Confidence {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "high" => Self::High,
            "low" => Self::Low,
            _ => Self::Medium,
        }
    }
}

/// Ordered list of steps plus the planner's reasoning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub steps: Vec<Step>,
    pub reasoning: String,
    pub confidence: Confidence,
    pub progress: String,
}

impl Plan {
    /// Single no-op plan carrying a parse-error marker.
    pub fn parse_failure(reason: &str) -> Self {
        Self {
            steps: vec![Step::noop("wait: planner output could not be used")],
            reasoning: format!("{} {}", PARSE_ERROR_MARKER, reason),
            confidence: Confidence::Low,
            progress: String::new(),
        }
    }

    pub fn is_parse_failure(&self) -> bool {
        self.reasoning.starts_with(PARSE_ERROR_MARKER)
    }

    /// Whether this plan claims the task is complete.
    pub fn signals_completion(&self) -> bool {
        self.steps.len() == 1 && self.steps[0].kind == ActionKind::Complete
    }

    /// One-line summary for the conversation history.
    pub fn summary(&self) -> String {
        let steps = self
            .steps
            .iter()
            .map(Step::label)
            .collect::<Vec<_>>()
            .join(" -> ");
        format!("{} | plan: {}", self.reasoning.trim(), steps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_kind_aliases() {
        assert_eq!(ActionKind::from_name("Tap"), Some(ActionKind::Tap));
        assert_eq!(ActionKind::from_name("Long Press"), Some(ActionKind::LongPress));
        assert_eq!(ActionKind::from_name("open-app"), Some(ActionKind::Launch));
        assert_eq!(ActionKind::from_name("finish"), Some(ActionKind::Complete));
        assert_eq!(ActionKind::from_name("teleport"), None);
    }

    #[test]
    fn test_parse_failure_plan() {
        let plan = Plan::parse_failure("no JSON object found");
        assert!(plan.is_parse_failure());
        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.steps[0].kind, ActionKind::Wait);
        assert!(!plan.signals_completion());
    }

    #[test]
    fn test_payload_serialization() {
        let step = Step::new(ActionKind::Wait, "pause")
            .with_payload(StepPayload::Duration(Duration::from_millis(1500)));
        let json = serde_json::to_value(&step).unwrap();
        assert_eq!(json["payload"]["type"], "duration");
        assert_eq!(json["payload"]["value"], 1500);
    }

    #[test]
    fn test_step_label() {
        let step = Step::new(ActionKind::Tap, "press ok").with_target("btn_ok");
        assert_eq!(step.label(), "tap btn_ok");
        assert_eq!(Step::new(ActionKind::Back, "go back").label(), "back");
    }
}
