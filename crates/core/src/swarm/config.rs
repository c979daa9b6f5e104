//! # Orchestrator Configuration
//!
//! Precedence: defaults < JSON config file < `ASSAY_*` environment variables.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::models::{LlmProvider, ModelConfig};
use crate::skills::llm_helpers::RetryPolicy;
use crate::skills::validator_skill::DEFAULT_APPROVAL_THRESHOLD;

/// Configuration for the orchestrator
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Validation rounds before settling for the best effort
    pub max_refinement_iterations: u32,
    /// Minimum overall score for approval
    pub approval_threshold: f64,
    /// How many times the analysis fan-out runs
    pub analysis_rounds: u32,
    /// Deadline for each worker
    pub worker_timeout_secs: u64,
    /// Deadline for the whole analysis stage; `None` disables it
    pub analysis_deadline_secs: Option<u64>,
    pub generation_timeout_secs: u64,
    pub validation_timeout_secs: u64,
    pub retry: RetryPolicy,
    /// Global model for all agents
    pub model: ModelConfig,
    /// Per-agent model overrides (agent_id -> model name)
    pub per_agent_models: HashMap<String, String>,
    /// Per-agent provider overrides (agent_id -> provider)
    pub per_agent_providers: HashMap<String, LlmProvider>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_refinement_iterations: 2,
            approval_threshold: DEFAULT_APPROVAL_THRESHOLD,
            analysis_rounds: 1,
            worker_timeout_secs: 120,
            analysis_deadline_secs: Some(300),
            generation_timeout_secs: 180,
            validation_timeout_secs: 120,
            retry: RetryPolicy::default(),
            model: ModelConfig::default(),
            per_agent_models: HashMap::new(),
            per_agent_providers: HashMap::new(),
        }
    }
}

impl OrchestratorConfig {
    /// Load from an optional JSON file, then apply the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config {}", path.display()))?;
                serde_json::from_str(&content)
                    .with_context(|| format!("Failed to parse config {}", path.display()))?
            }
            None => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply `ASSAY_*` overrides from any key lookup. Unparseable values are
    /// ignored with a warning.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(value) = parsed(&lookup, "ASSAY_MAX_REFINEMENTS") {
            self.max_refinement_iterations = value;
        }
        if let Some(value) = parsed(&lookup, "ASSAY_APPROVAL_THRESHOLD") {
            self.approval_threshold = value;
        }
        if let Some(value) = parsed(&lookup, "ASSAY_ANALYSIS_ROUNDS") {
            self.analysis_rounds = value;
        }
        if let Some(name) = lookup("ASSAY_PROVIDER") {
            match LlmProvider::from_name(&name) {
                Some(provider) if provider != self.model.provider => {
                    self.model = ModelConfig::with_provider(provider, provider.default_model());
                }
                Some(_) => {}
                None => tracing::warn!(provider = %name, "Unknown provider in ASSAY_PROVIDER"),
            }
        }
        if let Some(model) = lookup("ASSAY_MODEL").filter(|m| !m.trim().is_empty()) {
            self.model.model = model;
        }
    }

    /// Get model config for a specific agent
    pub fn model_for(&self, agent_id: &str) -> ModelConfig {
        // Provider: per-agent override -> global
        let provider = self
            .per_agent_providers
            .get(agent_id)
            .copied()
            .unwrap_or(self.model.provider);

        // Model: per-agent override -> global (same provider) -> provider default
        let model = self
            .per_agent_models
            .get(agent_id)
            .cloned()
            .unwrap_or_else(|| {
                if provider == self.model.provider {
                    self.model.model.clone()
                } else {
                    provider.default_model().to_string()
                }
            });

        ModelConfig {
            provider,
            model,
            base_url: if provider == self.model.provider {
                self.model.base_url.clone()
            } else {
                None
            },
            max_output_tokens: self.model.max_output_tokens,
        }
    }

    pub fn worker_timeout(&self) -> Duration {
        Duration::from_secs(self.worker_timeout_secs)
    }

    pub fn analysis_deadline(&self) -> Option<Duration> {
        self.analysis_deadline_secs.map(Duration::from_secs)
    }

    pub fn generation_timeout(&self) -> Duration {
        Duration::from_secs(self.generation_timeout_secs)
    }

    pub fn validation_timeout(&self) -> Duration {
        Duration::from_secs(self.validation_timeout_secs)
    }
}

fn parsed<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Ignoring unparseable override");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.max_refinement_iterations, 2);
        assert_eq!(config.approval_threshold, 85.0);
        assert_eq!(config.analysis_rounds, 1);
        assert_eq!(config.worker_timeout(), Duration::from_secs(120));
        assert_eq!(config.retry.max_attempts, 2);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("assay.json");
        std::fs::write(&path, r#"{"approval_threshold": 70.0, "analysis_deadline_secs": null}"#)
            .unwrap();

        let mut config: OrchestratorConfig =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        config.apply_overrides(env(&[]));
        assert_eq!(config.approval_threshold, 70.0);
        assert_eq!(config.analysis_deadline(), None);
        assert_eq!(config.max_refinement_iterations, 2);
    }

    #[test]
    fn test_load_rejects_bad_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(OrchestratorConfig::load(Some(&path)).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = OrchestratorConfig::default();
        config.apply_overrides(env(&[
            ("ASSAY_MAX_REFINEMENTS", "4"),
            ("ASSAY_APPROVAL_THRESHOLD", "not-a-number"),
            ("ASSAY_PROVIDER", "anthropic"),
            ("ASSAY_MODEL", "claude-custom"),
        ]));
        assert_eq!(config.max_refinement_iterations, 4);
        assert_eq!(config.approval_threshold, 85.0);
        assert_eq!(config.model.provider, LlmProvider::Anthropic);
        assert_eq!(config.model.model, "claude-custom");
    }

    #[test]
    fn test_model_for_agent() {
        let mut config = OrchestratorConfig::default();
        config
            .per_agent_models
            .insert("validator".into(), "gemini-2.5-pro".into());
        config
            .per_agent_providers
            .insert("generator".into(), LlmProvider::Anthropic);

        assert_eq!(config.model_for("validator").model, "gemini-2.5-pro");
        assert_eq!(config.model_for("structure_analyzer"), config.model);

        let generator = config.model_for("generator");
        assert_eq!(generator.provider, LlmProvider::Anthropic);
        assert_eq!(generator.model, LlmProvider::Anthropic.default_model());
    }
}
