//! # Defect History Worker
//!
//! Reads the issue tracker for recurring failures and open problems.

use super::analysis_worker::{bullet_list, promote_to_findings, target_header, AnalysisWorker};
use super::artifact_registry::{AnalysisFragment, WorkerKind};
use super::prompts::DEFECT_HISTORY_ANALYZER;
use crate::state::snapshot::Snapshot;

const MAX_ISSUES: usize = 25;

#[derive(Debug, Clone, Copy, Default)]
pub struct DefectHistoryWorker;

impl AnalysisWorker for DefectHistoryWorker {
    fn kind(&self) -> WorkerKind {
        WorkerKind::DefectHistory
    }

    fn system_prompt(&self) -> &'static str {
        DEFECT_HISTORY_ANALYZER
    }

    fn temperature(&self) -> f32 {
        0.4
    }

    fn build_prompt(&self, snapshot: &Snapshot) -> String {
        let open = snapshot
            .issues
            .iter()
            .filter(|i| i.state.eq_ignore_ascii_case("open"))
            .count();
        let issues = snapshot.issues.iter().map(|issue| {
            let labels = if issue.labels.is_empty() {
                String::new()
            } else {
                format!(" {{{}}}", issue.labels.join(", "))
            };
            format!("#{} [{}] {}{}", issue.id, issue.state, issue.title, labels)
        });
        format!(
            "Analyze the issue history of this project:\n\n{}\n\n## Issues ({} total, {} open)\n{}",
            target_header(snapshot),
            snapshot.issues.len(),
            open,
            bullet_list(issues, MAX_ISSUES),
        )
    }

    fn opportunity_aliases(&self) -> &'static [&'static str] {
        &["suggested_problems"]
    }

    fn interpret(&self, fragment: &mut AnalysisFragment) {
        promote_to_findings(fragment, &["categories", "notable_issues", "themes"]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{bare_snapshot, sample_snapshot};

    #[test]
    fn test_prompt_renders_issue_labels() {
        let prompt = DefectHistoryWorker.build_prompt(&sample_snapshot());
        assert!(prompt.contains("Issues (1 total, 1 open)"));
        assert!(prompt.contains("#12 [open] Stock count drifts under load {bug}"));
    }

    #[test]
    fn test_prompt_without_issues() {
        let prompt = DefectHistoryWorker.build_prompt(&bare_snapshot());
        assert!(prompt.contains("Issues (0 total, 0 open)\n(none)"));
    }
}
