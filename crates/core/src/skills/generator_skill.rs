//! # Generator Skill
//!
//! Produces the problem statement from the synthesized report (`create`,
//! version 0) and applies validator feedback to the latest version
//! (`refine`, version k+1).
//!
//! Refinement keeps the identity fields (title, category, tech stack) of the
//! prior version unless a validation issue names them. The prompt asks for
//! that, and the result is checked afterwards: drifted fields are put back.

use serde_json::json;
use std::sync::OnceLock;

use super::artifact_registry::{
    Artifact, GenerationMode, GenerationParams, IdentityField, ProblemStatement,
    SynthesizedReport, ValidationResult,
};
use super::llm_helpers::{call_backend, SkillContext};
use super::prompts::GENERATOR;
use crate::error::{BackendError, GenerationFailure};
use crate::swarm::events::MessageKind;
use crate::tools::structured_output::{parse_as, preview};

pub const AGENT_ID: &str = "generator";

const TEMPERATURE: f32 = 0.7;
const MAX_OPPORTUNITIES_IN_PROMPT: usize = 10;

fn artifact_schema() -> &'static str {
    static SCHEMA: OnceLock<String> = OnceLock::new();
    SCHEMA.get_or_init(|| {
        let schema = schemars::schema_for!(ProblemStatement);
        serde_json::to_string_pretty(&schema).unwrap_or_default()
    })
}

/// Generator skill for creating and refining artifacts
#[derive(Debug, Clone, Copy, Default)]
pub struct GeneratorSkill;

impl GeneratorSkill {
    pub fn new() -> Self {
        Self
    }

    /// Create artifact version 0.
    pub async fn create(
        &self,
        report: &SynthesizedReport,
        params: &GenerationParams,
        ctx: &SkillContext,
    ) -> Result<Artifact, GenerationFailure> {
        let prompt = create_prompt(report, params);
        let (mut body, attempts) = generate_body(ctx, &prompt).await?;

        if body.difficulty.trim().is_empty() {
            body.difficulty = params.difficulty.clone();
        }
        if let Some(category) = &params.category {
            if body.category.trim().is_empty() {
                body.category = category.clone();
            }
        }

        let artifact = Artifact {
            version: 0,
            conversation_id: ctx.conversation_id.clone(),
            mode: GenerationMode::Create,
            created_at: chrono::Utc::now(),
            body,
            restored_fields: Vec::new(),
            change_ratio: None,
        };
        announce(ctx, &artifact, attempts);
        Ok(artifact)
    }

    /// Apply `feedback` to `prior`, producing version `prior.version + 1`.
    pub async fn refine(
        &self,
        prior: &Artifact,
        feedback: &ValidationResult,
        report: &SynthesizedReport,
        ctx: &SkillContext,
    ) -> Result<Artifact, GenerationFailure> {
        let unlocked = IdentityField::flagged_in(&feedback.issues);
        let prompt = refine_prompt(prior, feedback, report, &unlocked);
        let (mut body, attempts) = generate_body(ctx, &prompt).await?;

        let restored_fields = body.restore_identity(&prior.body, &unlocked);
        if !restored_fields.is_empty() {
            tracing::info!(
                version = prior.version + 1,
                restored = ?restored_fields,
                "Restored identity fields changed during refinement"
            );
        }
        let change_ratio = body.change_ratio(&prior.body);

        let artifact = Artifact {
            version: prior.version + 1,
            conversation_id: ctx.conversation_id.clone(),
            mode: GenerationMode::Refine,
            created_at: chrono::Utc::now(),
            body,
            restored_fields,
            change_ratio: Some(change_ratio),
        };
        announce(ctx, &artifact, attempts);
        Ok(artifact)
    }
}

/// Call and parse with the context's retry budget.
///
/// Transient backend errors and unparseable output are retried with backoff;
/// timeouts, quota and client errors end the attempt immediately.
async fn generate_body(
    ctx: &SkillContext,
    prompt: &str,
) -> Result<(ProblemStatement, u32), GenerationFailure> {
    let max = ctx.retry.attempts();
    let mut last_reason = String::from("no attempt made");

    for attempt in 1..=max {
        match call_backend(ctx, AGENT_ID, GENERATOR, prompt, TEMPERATURE).await {
            Ok(text) => match parse_as::<ProblemStatement>(&text) {
                Ok(body) if body.title.trim().is_empty() => {
                    last_reason = "artifact has an empty title".to_string();
                }
                Ok(body) => return Ok((body, attempt)),
                Err(failure) => {
                    tracing::warn!(attempt, reason = %failure.reason, "Generator output unparseable");
                    ctx.notify(
                        AGENT_ID,
                        MessageKind::Notification,
                        json!({
                            "event": "parse_failure",
                            "attempt": attempt,
                            "reason": failure.reason,
                            "raw_preview": preview(&failure.raw, 500),
                        }),
                    );
                    last_reason = failure.reason;
                }
            },
            Err(error @ BackendError::Timeout(_)) => {
                return Err(GenerationFailure {
                    attempts: attempt,
                    reason: error.to_string(),
                })
            }
            Err(error) if !error.is_transient() => {
                return Err(GenerationFailure {
                    attempts: attempt,
                    reason: error.to_string(),
                })
            }
            Err(error) => last_reason = error.to_string(),
        }

        if attempt < max {
            tokio::time::sleep(ctx.retry.backoff(attempt)).await;
        }
    }

    Err(GenerationFailure {
        attempts: max,
        reason: last_reason,
    })
}

fn announce(ctx: &SkillContext, artifact: &Artifact, attempts: u32) {
    tracing::info!(
        version = artifact.version,
        title = %artifact.body.title,
        attempts,
        "Artifact produced"
    );
    ctx.notify(
        AGENT_ID,
        MessageKind::ArtifactProduced,
        json!({
            "version": artifact.version,
            "mode": artifact.mode,
            "title": artifact.body.title,
            "restored_fields": artifact.restored_fields,
            "change_ratio": artifact.change_ratio,
            "attempts": attempts,
        }),
    );
}

fn report_section(report: &SynthesizedReport) -> String {
    let mut out = String::new();
    if let Some(target) = &report.target {
        out.push_str(&format!(
            "Repository: {}\nLanguage: {}\nDescription: {}\n",
            target.name,
            target.language.as_deref().unwrap_or("Unknown"),
            target.description.as_deref().unwrap_or("No description"),
        ));
    }

    let tech = report.tech_summary.technologies();
    out.push_str(&format!(
        "Tech stack: {}\nComplexity: {}\n",
        if tech.is_empty() { "unknown".to_string() } else { tech.join(", ") },
        report.complexity.as_str(),
    ));

    out.push_str("\nTop opportunities:\n");
    if report.ranked_opportunities.is_empty() {
        out.push_str("- (none identified; derive a problem from the tech stack)\n");
    }
    for (rank, opportunity) in report
        .ranked_opportunities
        .iter()
        .take(MAX_OPPORTUNITIES_IN_PROMPT)
        .enumerate()
    {
        out.push_str(&format!(
            "{}. {} (score {:.2})\n",
            rank + 1,
            opportunity.title,
            opportunity.score
        ));
    }

    for (worker, findings) in &report.findings {
        out.push_str(&format!(
            "\nFindings from {}:\n{}\n",
            worker,
            preview(&serde_json::Value::Object(findings.clone()).to_string(), 800)
        ));
    }
    out
}

fn create_prompt(report: &SynthesizedReport, params: &GenerationParams) -> String {
    let time_box = params
        .time_box_minutes
        .map(|m| format!("{} minutes", m))
        .unwrap_or_else(|| "2-4 hours".to_string());
    format!(
        "Create a take-home coding problem for this repository.\n\n## Repository Analysis\n{}\n## Requirements\n- Difficulty: {}\n- Category: {}\n- Time box: {}\n\n## Output Schema\n```json\n{}\n```",
        report_section(report),
        params.difficulty,
        params.category.as_deref().unwrap_or("choose the best fit"),
        time_box,
        artifact_schema(),
    )
}

fn refine_prompt(
    prior: &Artifact,
    feedback: &ValidationResult,
    report: &SynthesizedReport,
    unlocked: &[IdentityField],
) -> String {
    let current = serde_json::to_string_pretty(&prior.body).unwrap_or_default();
    let scores = feedback
        .dimension_scores
        .iter()
        .map(|(k, v)| format!("{}: {:.0}", k, v))
        .collect::<Vec<_>>()
        .join(", ");
    let list = |items: &[String]| {
        if items.is_empty() {
            "- (none)".to_string()
        } else {
            items.iter().map(|i| format!("- {}", i)).collect::<Vec<_>>().join("\n")
        }
    };
    let identity_rule = if unlocked.is_empty() {
        "Keep the title, category and tech stack exactly as they are.".to_string()
    } else {
        let names: Vec<String> = unlocked
            .iter()
            .map(|f| serde_json::to_value(f).ok().and_then(|v| v.as_str().map(str::to_string)).unwrap_or_default())
            .collect();
        format!(
            "The reviewer flagged these identity fields as defective, so you may change them: {}. Keep every other identity field (title, category, tech stack) exactly as it is.",
            names.join(", ")
        )
    };

    format!(
        "Refine this coding problem (version {}).\n\n## Current Problem\n```json\n{}\n```\n\n## Review\nOverall score: {:.1}\nScores: {}\n\nIssues that must be fixed:\n{}\n\nSuggestions:\n{}\n\nWeaknesses:\n{}\n\nImprovements:\n{}\n\nStrengths to keep:\n{}\n\n## Rules\n- Make the smallest edit that addresses the issues.\n- {}\n\n## Repository Analysis\n{}\n## Output Schema\n```json\n{}\n```",
        prior.version,
        current,
        feedback.overall_score,
        scores,
        list(&feedback.issues),
        list(&feedback.suggestions),
        list(&feedback.feedback.weaknesses),
        list(&feedback.feedback.improvements),
        list(&feedback.feedback.strengths),
        identity_rule,
        report_section(report),
        artifact_schema(),
    )
}
