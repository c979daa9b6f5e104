//! # Transcripts
//!
//! Markdown rendering of a run for humans: the outcome, every artifact
//! version with the validation that scored it, and the full audit trail.

use anyhow::Result;
use std::fmt::Write as _;
use std::path::PathBuf;

use super::db::{RunStatus, StoredRun};
use super::io::write_runtime_file;
use crate::skills::artifact_registry::{Artifact, ValidationResult};
use crate::swarm::events::Message;
use crate::swarm::report::GenerationReport;

/// Runtime subdirectory transcripts are written to
pub const TRANSCRIPT_DIR: &str = "transcripts";

pub fn render_report(report: &GenerationReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Run {}", report.conversation_id);
    let _ = writeln!(out);
    let _ = writeln!(out, "- **Target:** {}", report.target_id);
    let _ = writeln!(out, "- **Outcome:** {}", report.outcome.as_str());
    let _ = writeln!(out, "- **Approved:** {}", report.approved);
    let _ = writeln!(out, "- **Score:** {:.1}", report.validation.overall_score);
    let _ = writeln!(
        out,
        "- **Refinements:** {} ({} generation calls, {} backend calls)",
        report.metrics.refinement_iterations,
        report.metrics.generation_calls,
        report.metrics.backend_calls
    );
    let _ = writeln!(out, "- **Duration:** {} ms", report.metrics.total_ms);
    let _ = writeln!(out, "- **Started:** {}", report.started_at.to_rfc3339());

    if !report.issues.is_empty() {
        let _ = writeln!(out, "\n## Issues\n");
        for issue in &report.issues {
            let _ = writeln!(out, "- {}", issue);
        }
    }

    let _ = writeln!(out, "\n## Analysis\n");
    let _ = writeln!(out, "- **Complexity:** {}", report.report.complexity.as_str());
    let technologies = report.report.tech_summary.technologies();
    if !technologies.is_empty() {
        let _ = writeln!(out, "- **Technologies:** {}", technologies.join(", "));
    }
    let _ = writeln!(
        out,
        "- **Contributing workers:** {}",
        list_or_none(&report.report.contributing_workers)
    );
    let _ = writeln!(
        out,
        "- **Degraded workers:** {}",
        list_or_none(&report.report.degraded_workers)
    );
    for (rank, opportunity) in report.report.ranked_opportunities.iter().enumerate() {
        let _ = writeln!(
            out,
            "{}. {} (score {:.2}; {})",
            rank + 1,
            opportunity.title,
            opportunity.score,
            opportunity.contributors.join(", ")
        );
    }

    for artifact in &report.artifacts {
        let validation = report
            .validations
            .iter()
            .find(|v| v.artifact_version == artifact.version);
        render_version(&mut out, artifact, validation);
    }

    render_trail(&mut out, &report.audit_trail);
    out
}

/// Transcript of a run that ended with an error
pub fn render_failure(run_id: &str, target_id: &str, error: &str, messages: &[Message]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Run {} (failed)", run_id);
    let _ = writeln!(out);
    let _ = writeln!(out, "- **Target:** {}", target_id);
    let _ = writeln!(out, "- **Error:** {}", error);
    render_trail(&mut out, messages);
    out
}

pub fn render_stored(run: &StoredRun) -> String {
    match (&run.report, run.summary.status) {
        (Some(report), RunStatus::Completed) => render_report(report),
        _ => render_failure(
            &run.summary.id,
            &run.summary.target_id,
            run.summary.error.as_deref().unwrap_or("unknown error"),
            &run.messages,
        ),
    }
}

/// Write the transcript under `.assay/transcripts/<run>.md`
pub async fn export(report: &GenerationReport) -> Result<PathBuf> {
    let relative = PathBuf::from(TRANSCRIPT_DIR).join(format!("{}.md", report.conversation_id));
    let path = write_runtime_file(relative, &render_report(report)).await?;
    tracing::info!(path = %path.display(), "Transcript written");
    Ok(path)
}

fn render_version(out: &mut String, artifact: &Artifact, validation: Option<&ValidationResult>) {
    let body = &artifact.body;
    let _ = writeln!(out, "\n## Version {}: {}\n", artifact.version, body.title);
    if let Some(ratio) = artifact.change_ratio {
        let _ = writeln!(out, "_Changed {:.0}% from the previous version._\n", ratio * 100.0);
    }
    if !artifact.restored_fields.is_empty() {
        let _ = writeln!(out, "_Restored fields: {:?}_\n", artifact.restored_fields);
    }
    let _ = writeln!(out, "{}\n", body.description);
    if !body.business_context.is_empty() {
        let _ = writeln!(out, "**Context:** {}\n", body.business_context);
    }
    section(out, "Requirements", &body.requirements);
    section(out, "Acceptance criteria", &body.acceptance_criteria);
    section(out, "Hints", &body.hints);
    if !body.starter_code.is_empty() {
        let _ = writeln!(out, "### Starter files\n");
        for file in &body.starter_code {
            let _ = writeln!(out, "- `{}` {}", file.filename, file.description);
        }
        let _ = writeln!(out);
    }

    match validation {
        Some(v) => {
            let verdict = if v.approved { "approved" } else { "not approved" };
            let _ = writeln!(out, "### Validation: {:.1} ({})\n", v.overall_score, verdict);
            for (dimension, score) in &v.dimension_scores {
                let _ = writeln!(out, "- {}: {:.1}", dimension, score);
            }
            let _ = writeln!(out);
            section(out, "Issues", &v.issues);
            section(out, "Suggestions", &v.suggestions);
        }
        None => {
            let _ = writeln!(out, "### Validation: not scored\n");
        }
    }
}

fn render_trail(out: &mut String, messages: &[Message]) {
    let _ = writeln!(out, "\n## Audit trail\n");
    let _ = writeln!(out, "| # | time | from | to | kind | payload |");
    let _ = writeln!(out, "|---|------|------|----|------|---------|");
    for m in messages {
        let payload = m.payload.to_string().replace('|', "\\|");
        let _ = writeln!(
            out,
            "| {} | {} | {} | {} | {} | {} |",
            m.sequence,
            m.timestamp.format("%H:%M:%S%.3f"),
            m.sender,
            m.recipient,
            m.kind.as_str(),
            truncate(&payload, 160)
        );
    }
}

fn section(out: &mut String, title: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    let _ = writeln!(out, "### {}\n", title);
    for item in items {
        let _ = writeln!(out, "- {}", item);
    }
    let _ = writeln!(out);
}

fn list_or_none(items: &[String]) -> String {
    if items.is_empty() {
        "none".to_string()
    } else {
        items.join(", ")
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let cut: String = s.chars().take(max).collect();
    format!("{}…", cut)
}
