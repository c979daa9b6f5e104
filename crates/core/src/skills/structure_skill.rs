//! # Structure Worker
//!
//! Looks at the file layout, README and manifests to judge architecture,
//! complexity and feature gaps.

use serde_json::Value;

use super::analysis_worker::{bullet_list, promote_to_findings, target_header, AnalysisWorker};
use super::artifact_registry::{AnalysisFragment, Complexity, WorkerKind};
use super::prompts::STRUCTURE_ANALYZER;
use crate::state::snapshot::Snapshot;
use crate::tools::structured_output::preview;

const MAX_FILES: usize = 80;
const README_CHARS: usize = 1000;

#[derive(Debug, Clone, Copy, Default)]
pub struct StructureWorker;

impl AnalysisWorker for StructureWorker {
    fn kind(&self) -> WorkerKind {
        WorkerKind::Structure
    }

    fn system_prompt(&self) -> &'static str {
        STRUCTURE_ANALYZER
    }

    fn temperature(&self) -> f32 {
        0.3
    }

    fn build_prompt(&self, snapshot: &Snapshot) -> String {
        let readme = snapshot
            .readme
            .as_deref()
            .map(|r| preview(r, README_CHARS))
            .unwrap_or_else(|| "No README".to_string());
        format!(
            "Analyze this codebase:\n\n{}\n\n## File Structure ({} files)\n{}\n\n## README\n{}\n\n## Dependency Manifests\n{}",
            target_header(snapshot),
            snapshot.files.len(),
            bullet_list(snapshot.files.iter().map(|f| f.path.as_str()), MAX_FILES),
            readme,
            bullet_list(snapshot.dependencies.iter().map(|d| d.file.as_str()), 20),
        )
    }

    fn interpret(&self, fragment: &mut AnalysisFragment) {
        promote_to_findings(fragment, &["architecture", "code_quality", "opportunities"]);

        if fragment.complexity.is_none() {
            fragment.complexity = fragment
                .findings
                .get("architecture")
                .and_then(|a| a.get("complexity"))
                .and_then(Value::as_str)
                .and_then(Complexity::from_label);
        }

        // Fall back to the feature list when no explicit suggestions came back
        if fragment.suggested_opportunities.is_empty() {
            if let Some(Value::Array(features)) = fragment
                .findings
                .get("opportunities")
                .and_then(|o| o.get("features"))
            {
                fragment.suggested_opportunities = features
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skills::analysis_worker::validate_envelope;
    use crate::test_support::{bare_snapshot, sample_snapshot};
    use serde_json::json;

    #[test]
    fn test_prompt_lists_files_and_readme() {
        let prompt = StructureWorker.build_prompt(&sample_snapshot());
        assert!(prompt.contains("acme/widgets"));
        assert!(prompt.contains("- src/main.rs"));
        assert!(prompt.contains("Tracks widget stock"));

        let bare = StructureWorker.build_prompt(&bare_snapshot());
        assert!(bare.contains("No README"));
        assert!(bare.contains("(none)"));
    }

    #[test]
    fn test_interpret_promotes_architecture_and_features() {
        let value = json!({
            "confidence": 0.7,
            "architecture": {"pattern": "layered", "complexity": "high"},
            "opportunities": {"features": ["Bulk import", "Audit log"]}
        });
        let mut fragment = validate_envelope(&StructureWorker, value).unwrap();
        StructureWorker.interpret(&mut fragment);

        assert_eq!(fragment.findings["architecture"]["pattern"], "layered");
        assert_eq!(fragment.suggested_opportunities, vec!["Bulk import", "Audit log"]);
        assert!(fragment.extensions.is_empty());
        assert_eq!(fragment.complexity, Some(Complexity::High));
    }
}
