//! Strategies proposed by the strategic planner.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::actions::{parse_lenient, Confidence};

/// Minimum number of strategies in a planning result.
pub const MIN_STRATEGIES: usize = 2;
/// Maximum number of strategies kept from a planning result.
pub const MAX_STRATEGIES: usize = 3;

/// Invalid planning results.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanningError {
    #[error("Expected at least {MIN_STRATEGIES} strategies, got {0}")]
    TooFewStrategies(usize),
    #[error("Recommended index {index} out of range for {len} strategies")]
    RecommendedOutOfRange { index: usize, len: usize },
    #[error("Malformed planning result: {0}")]
    Malformed(String),
}

/// One high-level way to accomplish the task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Strategy {
    pub name: String,
    pub description: String,
    pub steps: Vec<String>,
    pub confidence: Confidence,
}

/// Ranked strategies from one strategic planning call.
///
/// Immutable once built; the orchestrator shares it behind an `Arc`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanningResult {
    strategies: Vec<Strategy>,
    recommended: usize,
    parallel: Option<String>,
}

impl PlanningResult {
    /// Validate and build a result. Extra strategies beyond the maximum are dropped.
    pub fn new(
        mut strategies: Vec<Strategy>,
        recommended: usize,
        parallel: Option<String>,
    ) -> Result<Self, PlanningError> {
        if strategies.len() < MIN_STRATEGIES {
            return Err(PlanningError::TooFewStrategies(strategies.len()));
        }
        if strategies.len() > MAX_STRATEGIES {
            tracing::debug!(
                count = strategies.len(),
                "Truncating planning result to {} strategies",
                MAX_STRATEGIES
            );
            strategies.truncate(MAX_STRATEGIES);
        }
        if recommended >= strategies.len() {
            return Err(PlanningError::RecommendedOutOfRange {
                index: recommended,
                len: strategies.len(),
            });
        }
        let parallel = parallel.filter(|p| !p.trim().is_empty());
        Ok(Self {
            strategies,
            recommended,
            parallel,
        })
    }

    pub fn strategies(&self) -> &[Strategy] {
        &self.strategies
    }

    pub fn recommended_index(&self) -> usize {
        self.recommended
    }

    pub fn recommended(&self) -> &Strategy {
        &self.strategies[self.recommended]
    }

    pub fn parallel(&self) -> Option<&str> {
        self.parallel.as_deref()
    }

    /// Guidance text injected into the pinned context entry.
    pub fn guidance(&self) -> String {
        let best = self.recommended();
        let mut text = format!("Recommended strategy: {}\n{}\n", best.name, best.description);
        for (i, step) in best.steps.iter().enumerate() {
            text.push_str(&format!("  {}. {}\n", i + 1, step));
        }
        let alternatives: Vec<&str> = self
            .strategies
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != self.recommended)
            .map(|(_, s)| s.name.as_str())
            .collect();
        if !alternatives.is_empty() {
            text.push_str(&format!(
                "If this stops working, fall back to: {}\n",
                alternatives.join("; ")
            ));
        }
        if let Some(parallel) = &self.parallel {
            text.push_str(&format!("Parallel hint: {}\n", parallel));
        }
        text
    }
}

#[derive(Debug, Deserialize)]
struct RawStrategy {
    #[serde(default)]
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    steps: Vec<Value>,
    #[serde(default)]
    confidence: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct RawPlanningResult {
    #[serde(default)]
    strategies: Vec<RawStrategy>,
    #[serde(default, alias = "recommended_index", alias = "recommendation")]
    recommended: Option<Value>,
    #[serde(default, alias = "parallel_execution", alias = "parallel_recommendation")]
    parallel: Option<Value>,
}

/// Parse free-text strategic planner output into a [`PlanningResult`].
pub fn parse_planning_result(raw: &str) -> Result<PlanningResult, PlanningError> {
    let parsed: RawPlanningResult = parse_lenient(raw).map_err(PlanningError::Malformed)?;

    let strategies: Vec<Strategy> = parsed
        .strategies
        .into_iter()
        .enumerate()
        .map(|(i, s)| Strategy {
            name: if s.name.trim().is_empty() {
                format!("strategy {}", i + 1)
            } else {
                s.name.trim().to_string()
            },
            description: s.description.trim().to_string(),
            steps: s
                .steps
                .into_iter()
                .filter_map(|v| match v {
                    Value::String(s) => Some(s),
                    Value::Null => None,
                    other => Some(other.to_string()),
                })
                .collect(),
            confidence: match s.confidence {
                Some(Value::String(c)) => Confidence::parse(&c),
                Some(Value::Number(n)) => match n.as_f64().unwrap_or(0.5) {
                    x if x >= 0.75 => Confidence::High,
                    x if x < 0.4 => Confidence::Low,
                    _ => Confidence::Medium,
                },
                _ => Confidence::Medium,
            },
        })
        .collect();

    let recommended = match parsed.recommended {
        Some(Value::Number(n)) => n.as_u64().unwrap_or(0) as usize,
        Some(Value::String(name)) => strategies
            .iter()
            .position(|s| s.name.eq_ignore_ascii_case(name.trim()))
            .or_else(|| name.trim().parse().ok())
            .unwrap_or(0),
        _ => 0,
    };

    let parallel = match parsed.parallel {
        Some(Value::String(s)) => Some(s),
        Some(Value::Bool(true)) => Some("strategies may be tried in parallel".to_string()),
        _ => None,
    };

    PlanningResult::new(strategies, recommended, parallel)
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn strategy(name: &str) -> Strategy {
        Strategy {
            name: name.to_string(),
            description: format!("{} description", name),
            steps: vec!["first".to_string(), "second".to_string()],
            confidence: Confidence::Medium,
        }
    }

    #[test]
    fn test_requires_two_strategies() {
        assert_eq!(
            PlanningResult::new(vec![strategy("a")], 0, None),
            Err(PlanningError::TooFewStrategies(1))
        );
    }

    #[test]
    fn test_truncates_and_validates_index() {
        let result = PlanningResult::new(
            vec![strategy("a"), strategy("b"), strategy("c"), strategy("d")],
            2,
            Some("   ".to_string()),
        )
        .unwrap();
        assert_eq!(result.strategies().len(), 3);
        assert_eq!(result.recommended().name, "c");
        assert!(result.parallel().is_none());

        assert!(matches!(
            PlanningResult::new(vec![strategy("a"), strategy("b")], 2, None),
            Err(PlanningError::RecommendedOutOfRange { .. })
        ));
    }

    #[test]
    fn test_guidance_mentions_recommended_and_alternatives() {
        let result =
            PlanningResult::new(vec![strategy("search"), strategy("browse")], 1, None).unwrap();
        let guidance = result.guidance();
        assert!(guidance.starts_with("Recommended strategy: browse"));
        assert!(guidance.contains("fall back to: search"));
    }

    #[test]
    fn test_parse_planning_result() {
        let raw = r#"```json
        {"strategies": [
            {"name": "Use search", "description": "Search for the contact", "steps": ["tap search", "type name"], "confidence": "high"},
            {"name": "Scroll list", "description": "Scroll until found", "steps": ["swipe up"], "confidence": 0.3}
        ], "recommended": "Scroll list", "parallel": true}
        ```"#;
        let result = parse_planning_result(raw).unwrap();
        assert_eq!(result.recommended_index(), 1);
        assert_eq!(result.strategies()[0].confidence, Confidence::High);
        assert_eq!(result.strategies()[1].confidence, Confidence::Low);
        assert!(result.parallel().is_some());
    }

    #[test]
    fn test_parse_planning_result_rejects_garbage() {
        assert!(matches!(
            parse_planning_result("no idea"),
            Err(PlanningError::Malformed(_))
        ));
    }
}
