//! # Dependency Worker
//!
//! Reads dependency manifests for the technology summary that seeds the
//! synthesized report, plus dependency health and integration ideas.

use serde_json::{json, Value};

use super::analysis_worker::{bullet_list, promote_to_findings, target_header, AnalysisWorker};
use super::artifact_registry::{AnalysisFragment, WorkerKind};
use super::prompts::DEPENDENCY_ANALYZER;
use crate::state::snapshot::Snapshot;
use crate::tools::structured_output::preview;
use crate::tools::synthesizer::TECH_STACK_KEY;

const MAX_MANIFESTS: usize = 6;
const MANIFEST_CHARS: usize = 1500;

#[derive(Debug, Clone, Copy, Default)]
pub struct DependencyWorker;

impl AnalysisWorker for DependencyWorker {
    fn kind(&self) -> WorkerKind {
        WorkerKind::Dependency
    }

    fn system_prompt(&self) -> &'static str {
        DEPENDENCY_ANALYZER
    }

    fn temperature(&self) -> f32 {
        0.3
    }

    fn build_prompt(&self, snapshot: &Snapshot) -> String {
        let manifests = if snapshot.dependencies.is_empty() {
            "(no dependency manifests found)".to_string()
        } else {
            snapshot
                .dependencies
                .iter()
                .take(MAX_MANIFESTS)
                .map(|m| format!("### {}\n```\n{}\n```", m.file, preview(&m.content, MANIFEST_CHARS)))
                .collect::<Vec<_>>()
                .join("\n\n")
        };
        format!(
            "Analyze the dependencies and technology stack:\n\n{}\n\n## Manifests\n{}\n\n## Files\n{}",
            target_header(snapshot),
            manifests,
            bullet_list(snapshot.files.iter().map(|f| f.path.as_str()), 40),
        )
    }

    fn opportunity_aliases(&self) -> &'static [&'static str] {
        &["integration_opportunities"]
    }

    fn interpret(&self, fragment: &mut AnalysisFragment) {
        promote_to_findings(fragment, &[TECH_STACK_KEY, "dependency_health"]);

        // The report always carries a tech summary, possibly empty
        if !matches!(fragment.findings.get(TECH_STACK_KEY), Some(Value::Object(_))) {
            fragment.findings.insert(
                TECH_STACK_KEY.to_string(),
                json!({"frameworks": [], "libraries": [], "runtime": null, "build_tools": []}),
            );
        }
    }
}
