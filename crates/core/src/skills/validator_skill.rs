//! # Validator Skill
//!
//! Scores one artifact version on the fixed dimensions. The overall score is
//! always the arithmetic mean computed here, never the model's own total.
//!
//! The validator makes exactly one backend call. Any failure (backend,
//! parse, missing dimension) still yields a full [`ValidationResult`] with
//! `overall_score = 0`, `approved = false` and the `validation_failed` issue,
//! and a `ValidationFailure` message on the bus.

use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

use super::artifact_registry::{
    Artifact, SynthesizedReport, ValidationDimension, ValidationFeedback, ValidationResult,
};
use super::llm_helpers::{call_backend, SkillContext};
use super::prompts::VALIDATOR;
use crate::swarm::events::MessageKind;
use crate::tools::structured_output::{self, ParseOutcome, RAW_PREVIEW_CHARS};

pub const AGENT_ID: &str = "validator";

pub const DEFAULT_APPROVAL_THRESHOLD: f64 = 85.0;

const TEMPERATURE: f32 = 0.3;

/// Validator skill for scoring artifacts
#[derive(Debug, Clone, Copy)]
pub struct ValidatorSkill {
    threshold: f64,
}

impl Default for ValidatorSkill {
    fn default() -> Self {
        Self::new(DEFAULT_APPROVAL_THRESHOLD)
    }
}

impl ValidatorSkill {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub async fn validate(
        &self,
        artifact: &Artifact,
        report: &SynthesizedReport,
        ctx: &SkillContext,
    ) -> ValidationResult {
        let prompt = validation_prompt(artifact, report);

        let raw = match call_backend(ctx, AGENT_ID, VALIDATOR, &prompt, TEMPERATURE).await {
            Ok(raw) => raw,
            Err(e) => return self.failed(ctx, artifact.version, &e.to_string(), None),
        };

        let value = match structured_output::parse(&raw) {
            ParseOutcome::Parsed(value) => value,
            ParseOutcome::Failed { raw, reason } => {
                return self.failed(ctx, artifact.version, &reason, Some(&raw))
            }
        };

        match self.interpret(artifact.version, &value) {
            Ok(result) => {
                tracing::info!(
                    version = artifact.version,
                    score = result.overall_score,
                    approved = result.approved,
                    "Artifact validated"
                );
                ctx.notify(
                    AGENT_ID,
                    MessageKind::ValidationRecorded,
                    json!({
                        "artifact_version": result.artifact_version,
                        "overall_score": result.overall_score,
                        "approved": result.approved,
                        "dimension_scores": result.dimension_scores,
                        "issues": result.issues,
                    }),
                );
                result
            }
            Err(reason) => self.failed(ctx, artifact.version, &reason, Some(&raw)),
        }
    }

    /// Turn a parsed response into a result for `version`.
    pub fn interpret(&self, version: u32, value: &Value) -> Result<ValidationResult, String> {
        let Value::Object(root) = value else {
            return Err("response is not a JSON object".to_string());
        };

        let mut scores = BTreeMap::new();
        for dimension in ValidationDimension::all() {
            let score = find_score(root, dimension)
                .ok_or_else(|| format!("missing score for '{}'", dimension.key()))?;
            if !score.is_finite() {
                return Err(format!("score for '{}' is not finite", dimension.key()));
            }
            scores.insert(dimension.key().to_string(), score.clamp(0.0, 100.0));
        }

        let mut result = ValidationResult::from_scores(version, scores, self.threshold);
        result.issues = string_list(root.get("issues"));
        result.suggestions = string_list(root.get("suggestions"));
        result.feedback = root
            .get("feedback")
            .cloned()
            .and_then(|f| serde_json::from_value::<ValidationFeedback>(f).ok())
            .unwrap_or_default();
        Ok(result)
    }

    fn failed(
        &self,
        ctx: &SkillContext,
        version: u32,
        reason: &str,
        raw: Option<&str>,
    ) -> ValidationResult {
        tracing::warn!(version, reason, "Validation failed; scoring as 0");
        ctx.notify(
            AGENT_ID,
            MessageKind::ValidationFailure,
            json!({
                "artifact_version": version,
                "reason": reason,
                "raw_preview": raw.map(|r| structured_output::preview(r, RAW_PREVIEW_CHARS)),
            }),
        );
        ValidationResult::validation_failed(version)
    }
}

/// Look for a dimension by key or alias, at top level or under a
/// `scores`/`dimension_scores` object.
fn find_score(root: &Map<String, Value>, dimension: ValidationDimension) -> Option<f64> {
    let containers = [
        Some(root),
        root.get("scores").and_then(Value::as_object),
        root.get("dimension_scores").and_then(Value::as_object),
    ];
    let keys = std::iter::once(dimension.key()).chain(dimension.aliases().iter().copied());

    for key in keys {
        for container in containers.iter().flatten() {
            if let Some(score) = container.get(key).and_then(number) {
                return Some(score);
            }
        }
    }
    None
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches('%').parse().ok(),
        Value::Object(obj) => obj.get("score").and_then(number),
        _ => None,
    }
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    let Some(Value::Array(items)) = value else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match item {
            Value::String(s) => Some(s.clone()),
            Value::Object(obj) => ["description", "issue", "text"]
                .iter()
                .find_map(|k| obj.get(*k).and_then(Value::as_str))
                .map(str::to_string),
            _ => None,
        })
        .collect()
}

fn validation_prompt(artifact: &Artifact, report: &SynthesizedReport) -> String {
    let body = serde_json::to_string_pretty(&artifact.body).unwrap_or_default();
    let tech = report.tech_summary.technologies();
    let repository = report
        .target
        .as_ref()
        .map(|t| t.name.as_str())
        .unwrap_or("unknown");
    format!(
        "Review this coding problem (version {}).\n\nRepository: {}\nRepository tech stack: {}\nRepository complexity: {}\n\n## Problem\n```json\n{}\n```",
        artifact.version,
        repository,
        if tech.is_empty() { "unknown".to_string() } else { tech.join(", ") },
        report.complexity.as_str(),
        body,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BackendError;
    use crate::models::ModelConfig;
    use crate::skills::artifact_registry::{GenerationMode, VALIDATION_FAILED};
    use crate::swarm::message_bus::MessageBus;
    use crate::test_support::{problem_reply, validation_reply, Script, ScriptedBackend};
    use std::sync::Arc;
    use std::time::Duration;

    fn artifact(version: u32) -> Artifact {
        let body = structured_output::parse_as(&problem_reply("Stock ledger", "Build it")).unwrap();
        Artifact {
            version,
            conversation_id: "conv_val".into(),
            mode: GenerationMode::Create,
            created_at: chrono::Utc::now(),
            body,
            restored_fields: vec![],
            change_ratio: None,
        }
    }

    fn context(backend: Arc<ScriptedBackend>) -> SkillContext {
        SkillContext::new(backend, Arc::new(MessageBus::new()), "conv_val")
            .for_agent(ModelConfig::default(), Duration::from_secs(10))
    }

    #[test]
    fn test_overall_is_exact_mean() {
        let validator = ValidatorSkill::default();
        // Binary-exact scores, so the mean does not depend on summation order
        let vectors: [[f64; 4]; 7] = [
            [0.0, 0.0, 0.0, 0.0],
            [100.0, 100.0, 100.0, 100.0],
            [85.0, 85.0, 85.0, 85.0],
            [91.25, 72.5, 88.125, 64.75],
            [33.5, 66.25, 99.75, 0.5],
            [84.75, 85.0, 85.25, 85.0],
            [84.5, 85.0, 85.0, 85.0],
        ];
        for v in vectors {
            let value = json!({
                "feasibility": v[0],
                "clarity": v[1],
                "technical_fit": v[2],
                "educational_value": v[3],
            });
            let result = validator.interpret(2, &value).unwrap();

            let expected = (v[0] + v[1] + v[2] + v[3]) / 4.0;
            assert_eq!(result.overall_score, expected);
            assert_eq!(result.approved, expected >= 85.0);
            assert_eq!(result.artifact_version, 2);

            let mut sorted: Vec<f64> = v.to_vec();
            sorted.sort_by(f64::total_cmp);
            let mut stored: Vec<f64> = result.dimension_scores.values().copied().collect();
            stored.sort_by(f64::total_cmp);
            assert_eq!(stored, sorted);
        }
    }

    #[test]
    fn test_aliases_and_nested_scores() {
        let value = json!({
            "scores": {"feasibility": 90, "quality": "80", "technical": {"score": 70}},
            "educational_score": 60,
            "overall_score": 99,
            "issues": ["Too long", {"description": "No tests"}],
        });
        let result = ValidatorSkill::new(70.0).interpret(0, &value).unwrap();
        assert_eq!(result.overall_score, 75.0);
        assert!(result.approved);
        assert_eq!(result.dimension_scores["clarity"], 80.0);
        assert_eq!(result.issues, vec!["Too long", "No tests"]);
    }

    #[test]
    fn test_missing_dimension_is_an_error() {
        let value = json!({"feasibility": 90, "clarity": 90, "technical_fit": 90});
        let err = ValidatorSkill::default().interpret(0, &value).unwrap_err();
        assert!(err.contains("educational_value"));
    }

    #[tokio::test]
    async fn test_validate_scores_and_records() {
        let backend = Arc::new(
            ScriptedBackend::new().script(AGENT_ID, vec![Script::Reply(validation_reply(60.0))]),
        );
        let ctx = context(backend);
        let result = ValidatorSkill::default()
            .validate(&artifact(1), &SynthesizedReport::default(), &ctx)
            .await;

        assert_eq!(result.overall_score, 60.0);
        assert!(!result.approved);
        assert!(!result.failed);
        assert_eq!(result.artifact_version, 1);
        assert_eq!(result.feedback.weaknesses, vec!["Too broad"]);
        assert_eq!(
            ctx.bus
                .history_filtered("conv_val", Some(MessageKind::ValidationRecorded), None)
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_backend_failure_scores_zero_without_retry() {
        let backend = Arc::new(ScriptedBackend::new().script(
            AGENT_ID,
            vec![Script::Fail(BackendError::service("reset"))],
        ));
        let ctx = context(backend.clone());
        let result = ValidatorSkill::default()
            .validate(&artifact(0), &SynthesizedReport::default(), &ctx)
            .await;

        assert!(result.failed);
        assert!(!result.approved);
        assert_eq!(result.overall_score, 0.0);
        assert_eq!(result.issues, vec![VALIDATION_FAILED.to_string()]);
        assert_eq!(backend.calls_for(AGENT_ID), 1);
        assert_eq!(
            ctx.bus
                .history_filtered("conv_val", Some(MessageKind::ValidationFailure), None)
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_unparseable_reply_scores_zero() {
        let backend = Arc::new(
            ScriptedBackend::new().script(AGENT_ID, vec![Script::Reply("Looks great!".into())]),
        );
        let result = ValidatorSkill::default()
            .validate(&artifact(0), &SynthesizedReport::default(), &context(backend))
            .await;
        assert!(result.failed);
        assert_eq!(result.overall_score, 0.0);
    }
}
