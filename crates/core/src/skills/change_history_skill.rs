//! # Change History Worker
//!
//! Reads proposed changes and recent commits for development patterns and
//! recurring problem areas.

use super::analysis_worker::{bullet_list, promote_to_findings, target_header, AnalysisWorker};
use super::artifact_registry::{AnalysisFragment, WorkerKind};
use super::prompts::CHANGE_HISTORY_ANALYZER;
use crate::state::snapshot::Snapshot;

const MAX_CHANGES: usize = 20;
const MAX_COMMITS: usize = 20;

#[derive(Debug, Clone, Copy, Default)]
pub struct ChangeHistoryWorker;

impl AnalysisWorker for ChangeHistoryWorker {
    fn kind(&self) -> WorkerKind {
        WorkerKind::ChangeHistory
    }

    fn system_prompt(&self) -> &'static str {
        CHANGE_HISTORY_ANALYZER
    }

    fn temperature(&self) -> f32 {
        0.4
    }

    fn build_prompt(&self, snapshot: &Snapshot) -> String {
        let changes = snapshot.changes.iter().map(|c| {
            format!(
                "#{} [{}] {}{}",
                c.id,
                if c.state.is_empty() { "unknown" } else { c.state.as_str() },
                c.title,
                c.author
                    .as_deref()
                    .map(|a| format!(" (by {})", a))
                    .unwrap_or_default()
            )
        });
        let commits = snapshot.commits.iter().map(|c| {
            let short = c.id.get(..7).unwrap_or(&c.id);
            format!("{} {}", short, c.summary)
        });
        format!(
            "Analyze the change history of this project:\n\n{}\n\n## Pull Requests ({} total)\n{}\n\n## Recent Commits ({} total)\n{}",
            target_header(snapshot),
            snapshot.changes.len(),
            bullet_list(changes, MAX_CHANGES),
            snapshot.commits.len(),
            bullet_list(commits, MAX_COMMITS),
        )
    }

    fn opportunity_aliases(&self) -> &'static [&'static str] {
        &["suggested_problems"]
    }

    fn interpret(&self, fragment: &mut AnalysisFragment) {
        promote_to_findings(fragment, &["patterns", "insights"]);
    }
}
