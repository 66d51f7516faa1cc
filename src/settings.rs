//! Persisted user settings.
//! Stored as JSON in the platform-specific config directory via `directories::ProjectDirs`.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::OrchestratorConfig;
use crate::model::ModelConfig;

/// Application settings that can be saved and loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// Action planner API base URL
    pub base_url: String,
    /// Action planner API key
    pub api_key: String,
    /// Action planner model name
    pub model_name: String,
    /// Strategic planner API base URL (empty: same as the action planner)
    pub planner_base_url: String,
    /// Strategic planner API key (empty: same as the action planner)
    pub planner_api_key: String,
    /// Strategic planner model name
    pub planner_model_name: String,
    /// Maximum retries for model requests
    pub max_retries: u32,
    /// Retry delay in seconds
    pub retry_delay: u64,
    pub max_iterations: u32,
    pub last_resort_window: u32,
    pub failure_threshold: u32,
    pub consult_cooldown: u32,
    pub progress_check_interval: u32,
    pub wrong_task_penalty: u32,
    pub context_window: usize,
    /// Background planning job timeout in seconds
    pub planning_timeout_secs: u64,
    /// Pause after each dispatched step in milliseconds
    pub settle_delay_ms: u64,
}

impl Default for AppSettings {
    fn default() -> Self {
        let orchestrator = OrchestratorConfig::default();
        let model = ModelConfig::default();
        Self {
            base_url: model.base_url,
            api_key: model.api_key,
            model_name: model.model_name,
            planner_base_url: String::new(),
            planner_api_key: String::new(),
            planner_model_name: "gpt-4o".to_string(),
            max_retries: model.max_retries,
            retry_delay: model.retry_delay_secs,
            max_iterations: orchestrator.max_iterations,
            last_resort_window: orchestrator.last_resort_window,
            failure_threshold: orchestrator.failure_threshold,
            consult_cooldown: orchestrator.consult_cooldown,
            progress_check_interval: orchestrator.progress_check_interval,
            wrong_task_penalty: orchestrator.wrong_task_penalty,
            context_window: orchestrator.context_window,
            planning_timeout_secs: orchestrator.planning_job_timeout.as_secs(),
            settle_delay_ms: orchestrator.settle_delay.as_millis() as u64,
        }
    }
}

impl AppSettings {
    fn project_dirs() -> Option<directories::ProjectDirs> {
        directories::ProjectDirs::from("com", "moderras", "relay-agent")
    }

    /// Get the config directory path.
    pub fn config_dir() -> Option<PathBuf> {
        Self::project_dirs().map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the settings file path.
    pub fn settings_path() -> Option<PathBuf> {
        Self::config_dir().map(|dir| dir.join("settings.json"))
    }

    /// Load settings from the config file, falling back to defaults.
    pub fn load() -> Self {
        let Some(path) = Self::settings_path() else {
            return Self::default();
        };
        match fs::read_to_string(&path) {
            Ok(content) => Self::from_json(&content).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "Ignoring unreadable settings file");
                Self::default()
            }),
            Err(_) => {
                debug!(path = %path.display(), "No settings file, using defaults");
                Self::default()
            }
        }
    }

    /// Parse settings, back-filling fields that older files lack or left empty.
    pub fn from_json(content: &str) -> Result<Self, serde_json::Error> {
        let defaults = Self::default();
        let mut loaded: Self = serde_json::from_str(content)?;

        if loaded.base_url.is_empty() {
            loaded.base_url = defaults.base_url;
        }
        if loaded.model_name.is_empty() {
            loaded.model_name = defaults.model_name;
        }
        if loaded.planner_model_name.is_empty() {
            loaded.planner_model_name = defaults.planner_model_name;
        }
        if loaded.max_iterations == 0 {
            loaded.max_iterations = defaults.max_iterations;
        }
        if loaded.planning_timeout_secs == 0 {
            loaded.planning_timeout_secs = defaults.planning_timeout_secs;
        }

        Ok(loaded)
    }

    /// Save settings to the config file.
    pub fn save(&self) -> Result<(), String> {
        let dir = Self::config_dir().ok_or("Cannot determine config directory")?;

        fs::create_dir_all(&dir)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;

        let path = dir.join("settings.json");
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize settings: {}", e))?;

        fs::write(&path, content)
            .map_err(|e| format!("Failed to write settings file: {}", e))?;

        Ok(())
    }

    /// Apply `AGENT_*` and `MODEL_*` environment overrides.
    pub fn apply_env(&mut self) {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());

        if let Some(v) = var("MODEL_BASE_URL") {
            self.base_url = v;
        }
        if let Some(v) = var("MODEL_API_KEY") {
            self.api_key = v;
        }
        if let Some(v) = var("MODEL_NAME") {
            self.model_name = v;
        }
        if let Some(v) = var("PLANNER_BASE_URL") {
            self.planner_base_url = v;
        }
        if let Some(v) = var("PLANNER_API_KEY") {
            self.planner_api_key = v;
        }
        if let Some(v) = var("PLANNER_MODEL_NAME") {
            self.planner_model_name = v;
        }
        if let Some(v) = var("AGENT_MAX_ITERATIONS").and_then(|v| v.parse().ok()) {
            self.max_iterations = v;
        }
        if let Some(v) = var("AGENT_FAILURE_THRESHOLD").and_then(|v| v.parse().ok()) {
            self.failure_threshold = v;
        }
        if let Some(v) = var("AGENT_PLANNING_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            self.planning_timeout_secs = v;
        }
    }

    /// Model config for the fast action planner and completion verifier.
    pub fn action_model(&self) -> ModelConfig {
        ModelConfig::default()
            .with_base_url(&self.base_url)
            .with_api_key(&self.api_key)
            .with_model_name(&self.model_name)
            .with_max_retries(self.max_retries)
            .with_retry_delay(self.retry_delay)
    }

    /// Model config for the strategic planner.
    pub fn planner_model(&self) -> ModelConfig {
        let base_url = if self.planner_base_url.is_empty() {
            &self.base_url
        } else {
            &self.planner_base_url
        };
        let api_key = if self.planner_api_key.is_empty() {
            &self.api_key
        } else {
            &self.planner_api_key
        };
        ModelConfig::default()
            .with_base_url(base_url)
            .with_api_key(api_key)
            .with_model_name(&self.planner_model_name)
            .with_max_retries(self.max_retries)
            .with_retry_delay(self.retry_delay)
            .with_request_timeout(Duration::from_secs(self.planning_timeout_secs))
    }

    pub fn orchestrator(&self) -> OrchestratorConfig {
        OrchestratorConfig::default()
            .with_max_iterations(self.max_iterations)
            .with_last_resort_window(self.last_resort_window)
            .with_failure_threshold(self.failure_threshold)
            .with_consult_cooldown(self.consult_cooldown)
            .with_progress_check_interval(self.progress_check_interval)
            .with_wrong_task_penalty(self.wrong_task_penalty)
            .with_context_window(self.context_window)
            .with_planning_job_timeout(Duration::from_secs(self.planning_timeout_secs))
            .with_settle_delay(Duration::from_millis(self.settle_delay_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_orchestrator_defaults() {
        assert_eq!(AppSettings::default().orchestrator(), OrchestratorConfig::default());
    }

    #[test]
    fn test_backfill_of_older_files() {
        let settings =
            AppSettings::from_json(r#"{"model_name": "", "max_iterations": 0, "api_key": "k"}"#)
                .unwrap();
        let defaults = AppSettings::default();
        assert_eq!(settings.model_name, defaults.model_name);
        assert_eq!(settings.max_iterations, 50);
        assert_eq!(settings.api_key, "k");
        assert_eq!(settings.failure_threshold, 3);
    }

    #[test]
    fn test_planner_endpoint_falls_back_to_action_endpoint() {
        let settings = AppSettings {
            base_url: "http://a/v1".into(),
            api_key: "key".into(),
            ..Default::default()
        };
        let planner = settings.planner_model();
        assert_eq!(planner.base_url, "http://a/v1");
        assert_eq!(planner.api_key, "key");
        assert_eq!(planner.model_name, "gpt-4o");
    }
}
