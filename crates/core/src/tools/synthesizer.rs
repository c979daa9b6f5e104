//! # Synthesizer
//!
//! Merges the fragments of one run into a [`SynthesizedReport`].
//!
//! Pure and total: no I/O, no panics, and a well-formed report even when
//! every fragment is degraded. Fragments must be given in worker
//! registration order; ties in ranking fall back to that order, so the same
//! fragment list always yields the same report.

use serde_json::Value;
use std::collections::HashMap;

use crate::skills::artifact_registry::{
    AnalysisFragment, Complexity, RankedOpportunity, SynthesizedReport, TechSummary, WorkerKind,
};

/// Key under which the dependency worker reports its technology summary
pub const TECH_STACK_KEY: &str = "tech_stack";

/// Sender id of the synthesized-report broadcast
pub const AGENT_ID: &str = "synthesizer";

pub fn synthesize(fragments: &[AnalysisFragment]) -> SynthesizedReport {
    let tech_summary = fragments
        .iter()
        .find(|f| f.kind == WorkerKind::Dependency && !f.is_degraded())
        .and_then(|f| {
            f.findings
                .get(TECH_STACK_KEY)
                .or_else(|| f.extensions.get(TECH_STACK_KEY))
        })
        .map(tech_summary_from)
        .unwrap_or_default();

    let complexity = fragments
        .iter()
        .filter_map(|f| f.complexity)
        .max()
        .unwrap_or(Complexity::Unknown);

    let mut contributing_workers = Vec::new();
    let mut degraded_workers = Vec::new();
    let mut findings = std::collections::BTreeMap::new();
    for fragment in fragments {
        if fragment.is_degraded() {
            degraded_workers.push(fragment.worker_id.clone());
        } else {
            contributing_workers.push(fragment.worker_id.clone());
            findings.insert(fragment.worker_id.clone(), fragment.findings.clone());
        }
    }

    SynthesizedReport {
        tech_summary,
        ranked_opportunities: rank_opportunities(fragments),
        complexity,
        contributing_workers,
        degraded_workers,
        findings,
        target: None,
    }
}

/// Lowercase and collapse internal whitespace
pub fn normalize_title(title: &str) -> String {
    title
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn rank_opportunities(fragments: &[AnalysisFragment]) -> Vec<RankedOpportunity> {
    let mut ranked: Vec<RankedOpportunity> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for fragment in fragments {
        let confidence = if fragment.confidence.is_finite() {
            fragment.confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };

        // A fragment counts once per title even if it repeats itself
        let mut seen_here = Vec::new();
        for title in &fragment.suggested_opportunities {
            let key = normalize_title(title);
            if key.is_empty() || seen_here.contains(&key) {
                continue;
            }
            seen_here.push(key.clone());

            match index.get(&key) {
                Some(&slot) => {
                    let entry = &mut ranked[slot];
                    entry.score += confidence;
                    entry.contributors.push(fragment.worker_id.clone());
                }
                None => {
                    index.insert(key, ranked.len());
                    ranked.push(RankedOpportunity {
                        title: title.split_whitespace().collect::<Vec<_>>().join(" "),
                        score: confidence,
                        contributors: vec![fragment.worker_id.clone()],
                    });
                }
            }
        }
    }

    // Stable: equal scores keep first-seen (registration) order
    ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
    ranked
}

/// Read a technology summary leniently: lists may arrive as a single string
/// and `runtime` as a list.
fn tech_summary_from(value: &Value) -> TechSummary {
    let Value::Object(map) = value else {
        return TechSummary::default();
    };
    let runtime = match map.get("runtime") {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .find(|s| !s.is_empty())
            .map(str::to_string),
        _ => None,
    };
    TechSummary {
        frameworks: string_list(map.get("frameworks")),
        libraries: string_list(map.get("libraries")),
        runtime,
        build_tools: string_list(map.get("build_tools")),
    }
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.trim().to_string()),
                Value::Object(obj) => obj.get("name").and_then(Value::as_str).map(str::to_string),
                _ => None,
            })
            .filter(|s| !s.is_empty())
            .collect(),
        Some(Value::String(s)) if !s.trim().is_empty() => vec![s.trim().to_string()],
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skills::artifact_registry::DegradationReason;
    use serde_json::{json, Map};

    fn fragment(kind: WorkerKind, confidence: f64, opportunities: &[&str]) -> AnalysisFragment {
        AnalysisFragment {
            worker_id: kind.agent_id().to_string(),
            kind,
            findings: Map::new(),
            confidence,
            suggested_opportunities: opportunities.iter().map(|s| s.to_string()).collect(),
            complexity: None,
            extensions: Map::new(),
            degraded: None,
        }
    }

    fn degraded(kind: WorkerKind) -> AnalysisFragment {
        AnalysisFragment::degraded(kind, DegradationReason::Timeout { after_ms: 10 })
    }

    #[test]
    fn test_all_degraded_is_well_formed() {
        let fragments: Vec<_> = WorkerKind::all().into_iter().map(degraded).collect();
        let report = synthesize(&fragments);

        assert!(report.ranked_opportunities.is_empty());
        assert_eq!(report.complexity, Complexity::Unknown);
        assert!(report.tech_summary.is_empty());
        assert_eq!(report.degraded_workers.len(), 4);
        assert!(report.contributing_workers.is_empty());
    }

    #[test]
    fn test_zero_confidence_fragments_still_merge() {
        let fragments = vec![
            fragment(WorkerKind::Structure, 0.0, &["Add caching"]),
            fragment(WorkerKind::ChangeHistory, 0.0, &["add   Caching", "Retry logic"]),
        ];
        let report = synthesize(&fragments);
        assert_eq!(report.ranked_opportunities.len(), 2);
        assert_eq!(report.ranked_opportunities[0].title, "Add caching");
        assert_eq!(report.ranked_opportunities[0].score, 0.0);
    }

    #[test]
    fn test_ranking_dedupes_and_sums_confidence() {
        let fragments = vec![
            fragment(WorkerKind::Structure, 0.5, &["Plugin system", "Add  caching"]),
            fragment(WorkerKind::ChangeHistory, 0.75, &["add caching"]),
            fragment(WorkerKind::DefectHistory, 0.25, &["ADD CACHING", "Add caching"]),
            fragment(WorkerKind::Dependency, 0.5, &["Upgrade tokio"]),
        ];
        let report = synthesize(&fragments);
        let titles: Vec<_> = report
            .ranked_opportunities
            .iter()
            .map(|o| o.title.as_str())
            .collect();

        assert_eq!(titles, vec!["Add caching", "Plugin system", "Upgrade tokio"]);
        assert_eq!(report.ranked_opportunities[0].score, 1.5);
        assert_eq!(
            report.ranked_opportunities[0].contributors,
            vec![
                "structure_analyzer",
                "change_history_analyzer",
                "defect_history_analyzer"
            ]
        );
    }

    #[test]
    fn test_ties_follow_registration_order() {
        let fragments = vec![
            fragment(WorkerKind::Structure, 0.5, &["B idea"]),
            fragment(WorkerKind::ChangeHistory, 0.5, &["A idea"]),
        ];
        let report = synthesize(&fragments);
        assert_eq!(report.ranked_opportunities[0].title, "B idea");
        assert_eq!(report, synthesize(&fragments));
    }

    #[test]
    fn test_complexity_is_max_reported() {
        let mut low = fragment(WorkerKind::Structure, 0.9, &[]);
        low.complexity = Some(Complexity::Low);
        let mut high = fragment(WorkerKind::DefectHistory, 0.1, &[]);
        high.complexity = Some(Complexity::High);
        let silent = fragment(WorkerKind::Dependency, 0.9, &[]);

        assert_eq!(synthesize(&[low.clone(), high, silent]).complexity, Complexity::High);
        assert_eq!(synthesize(&[low]).complexity, Complexity::Low);
    }

    #[test]
    fn test_tech_summary_from_dependency_fragment() {
        let mut dep = fragment(WorkerKind::Dependency, 0.8, &[]);
        dep.findings.insert(
            TECH_STACK_KEY.into(),
            json!({
                "frameworks": ["axum"],
                "libraries": "serde",
                "runtime": ["rust 1.75"],
                "build_tools": [{"name": "cargo"}, 7]
            }),
        );
        let report = synthesize(&[fragment(WorkerKind::Structure, 0.5, &[]), dep]);

        assert_eq!(report.tech_summary.frameworks, vec!["axum"]);
        assert_eq!(report.tech_summary.libraries, vec!["serde"]);
        assert_eq!(report.tech_summary.runtime.as_deref(), Some("rust 1.75"));
        assert_eq!(report.tech_summary.build_tools, vec!["cargo"]);
    }

    #[test]
    fn test_tech_summary_missing_defaults_empty() {
        let mut dep = fragment(WorkerKind::Dependency, 0.8, &[]);
        dep.findings.insert(TECH_STACK_KEY.into(), json!("not an object"));
        assert!(synthesize(&[dep]).tech_summary.is_empty());
        assert!(synthesize(&[]).tech_summary.is_empty());
    }

    #[test]
    fn test_non_finite_confidence_counts_as_zero() {
        let fragments = vec![fragment(WorkerKind::Structure, f64::NAN, &["X"])];
        assert_eq!(synthesize(&fragments).ranked_opportunities[0].score, 0.0);
    }
}
