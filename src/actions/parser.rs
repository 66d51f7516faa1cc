//! Tolerant decoding of free-text planner output.
//!
//! Planner output is untrusted: it may be wrapped in code fences, surrounded
//! by prose, or contain small JSON mistakes. Decoding never fails hard; it
//! yields [`PlanDecode::Unparseable`] instead, which maps onto a no-op plan.

use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::plan::{ActionKind, Confidence, Plan, Step, StepPayload, SwipeDirection};

static CODE_FENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^\s*```[A-Za-z0-9_-]*\s*\n?(.*?)\n?\s*```\s*$").expect("static fence pattern")
});

static TRAILING_COMMA: Lazy<Regex> =
    Lazy::new(|| Regex::new(r",(\s*[}\]])").expect("static trailing comma pattern"));

/// Result of decoding planner output.
#[derive(Debug, Clone, PartialEq)]
pub enum PlanDecode {
    Parsed(Plan),
    Unparseable { raw: String, reason: String },
}

impl PlanDecode {
    /// Collapse to a plan, substituting the parse-error no-op plan.
    pub fn into_plan(self) -> Plan {
        match self {
            Self::Parsed(plan) => plan,
            Self::Unparseable { reason, .. } => Plan::parse_failure(&reason),
        }
    }

    pub fn is_parsed(&self) -> bool {
        matches!(self, Self::Parsed(_))
    }
}

/// Remove one pair of enclosing ``` markers, if present.
pub fn strip_code_fence(raw: &str) -> &str {
    match CODE_FENCE.captures(raw).and_then(|c| c.get(1)) {
        Some(inner) => inner.as_str(),
        None => raw.trim(),
    }
}

/// Locate the first balanced `{ ... }` object, ignoring braces in strings.
pub fn extract_json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in raw[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&raw[start..start + offset + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Fence-strip, extract and deserialize the first JSON object in `raw`.
///
/// Retries once with trailing commas removed.
pub fn parse_lenient<T: DeserializeOwned>(raw: &str) -> Result<T, String> {
    let body = strip_code_fence(raw);
    let object = extract_json_object(body).ok_or_else(|| "no JSON object found".to_string())?;
    match serde_json::from_str(object) {
        Ok(value) => Ok(value),
        Err(first) => {
            let relaxed = TRAILING_COMMA.replace_all(object, "$1");
            serde_json::from_str(&relaxed).map_err(|_| format!("invalid JSON: {}", first))
        }
    }
}

/// Decode planner output into a plan.
pub fn decode_plan(raw: &str) -> PlanDecode {
    let unparseable = |reason: String| PlanDecode::Unparseable {
        raw: raw.to_string(),
        reason,
    };

    let value: Value = match parse_lenient(raw) {
        Ok(v) => v,
        Err(reason) => return unparseable(reason),
    };

    let raw_steps: Vec<Value> = match value.get("steps").or_else(|| value.get("actions")) {
        Some(Value::Array(items)) => items.clone(),
        Some(_) => return unparseable("\"steps\" is not an array".to_string()),
        // A lone step object is accepted as a one-step plan.
        None if value.get("action").is_some() => vec![value.clone()],
        None => return unparseable("no steps in planner output".to_string()),
    };

    if raw_steps.is_empty() {
        return unparseable("plan has no steps".to_string());
    }

    let steps: Vec<Step> = raw_steps.iter().map(decode_step).collect();

    if steps.len() > 1 && steps.iter().any(|s| s.kind == ActionKind::Complete) {
        return unparseable("\"complete\" must be the only step of a plan".to_string());
    }

    let reasoning = string_field(&value, &["reasoning", "thought", "thinking", "reason"])
        .unwrap_or_default();
    let confidence = string_field(&value, &["confidence"])
        .map(|c| Confidence::parse(&c))
        .unwrap_or_default();
    let progress =
        string_field(&value, &["progress", "progress_assessment"]).unwrap_or_default();

    PlanDecode::Parsed(Plan {
        steps,
        reasoning,
        confidence,
        progress,
    })
}

/// Decode one step; unknown kinds become a no-op wait.
fn decode_step(value: &Value) -> Step {
    let name = string_field(value, &["action", "kind", "type"]).unwrap_or_default();
    let description = string_field(value, &["description", "reason", "why"]).unwrap_or_default();

    let Some(kind) = ActionKind::from_name(&name) else {
        tracing::warn!(action = %name, "Unsupported action kind from planner, substituting wait");
        return Step::noop(format!("wait (unsupported action '{}')", name));
    };

    let mut step = Step::new(kind, description);
    step.target = string_field(value, &["target", "element_id", "element", "id"]);
    step.payload = match kind {
        ActionKind::Type => string_field(value, &["text", "value"]).map(StepPayload::Text),
        ActionKind::Launch => string_field(value, &["app", "package", "text"]).map(StepPayload::Text),
        ActionKind::Swipe => string_field(value, &["direction"])
            .and_then(|d| SwipeDirection::parse(&d))
            .map(StepPayload::Direction),
        ActionKind::Wait | ActionKind::LongPress => duration_field(value).map(StepPayload::Duration),
        _ => None,
    };
    step
}

/// First present key among `keys`, rendered as a string.
fn string_field(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match value.get(*key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    })
}

/// Negative values clamp to zero and unrepresentable ones saturate.
fn duration_field(value: &Value) -> Option<Duration> {
    if let Some(ms) = value.get("duration_ms").and_then(Value::as_f64) {
        return Some(Duration::from_millis(ms.max(0.0) as u64));
    }
    value
        .get("seconds")
        .and_then(Value::as_f64)
        .map(|s| Duration::try_from_secs_f64(s.max(0.0)).unwrap_or(Duration::MAX))
}
