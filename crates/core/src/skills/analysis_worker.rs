//! # Analysis Worker
//!
//! Capability shared by the four analysis variants. A worker only decides
//! *what to ask* (prompt, temperature) and how to tidy its own extension
//! fields; the driver in this module does the rest:
//!
//! ```text
//! build_prompt(snapshot) → backend (retry) → structured_output::parse
//!     → envelope validation → interpret() → AnalysisFragment
//! ```
//!
//! Any failure on that path yields a degraded fragment plus a
//! `WorkerDegradation` message. The driver never returns an error.

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use super::artifact_registry::{AnalysisFragment, Complexity, DegradationReason, WorkerKind};
use super::llm_helpers::{complete_with_retry, SkillContext};
use super::prompts;
use crate::error::BackendError;
use crate::state::snapshot::Snapshot;
use crate::swarm::events::MessageKind;
use crate::tools::structured_output::{self, ParseOutcome, RAW_PREVIEW_CHARS};

#[async_trait]
pub trait AnalysisWorker: Send + Sync {
    fn kind(&self) -> WorkerKind;

    fn id(&self) -> &'static str {
        self.kind().agent_id()
    }

    fn system_prompt(&self) -> &'static str;

    fn temperature(&self) -> f32;

    /// Fixed prompt for this worker's slice of the snapshot
    fn build_prompt(&self, snapshot: &Snapshot) -> String;

    /// Extra top-level keys this worker's model may use for opportunities
    fn opportunity_aliases(&self) -> &'static [&'static str] {
        &[]
    }

    /// Normalize worker-specific fields once the envelope is valid
    fn interpret(&self, _fragment: &mut AnalysisFragment) {}

    /// Analyze the snapshot. Never fails; see the module docs.
    async fn analyze(&self, snapshot: &Snapshot, ctx: &SkillContext) -> AnalysisFragment {
        run_analysis(self, snapshot, ctx, &[]).await
    }

    /// Analyze with the previous round's fragments as peer context.
    async fn analyze_with_peers(
        &self,
        snapshot: &Snapshot,
        ctx: &SkillContext,
        peers: &[AnalysisFragment],
    ) -> AnalysisFragment {
        run_analysis(self, snapshot, ctx, peers).await
    }
}

/// The shared worker driver
pub async fn run_analysis<W: AnalysisWorker + ?Sized>(
    worker: &W,
    snapshot: &Snapshot,
    ctx: &SkillContext,
    peers: &[AnalysisFragment],
) -> AnalysisFragment {
    let id = worker.id();
    let mut prompt = worker.build_prompt(snapshot);
    let digest = peer_digest(id, peers);
    if !digest.is_empty() {
        prompt.push_str("\n\n## Peer Findings (previous round)\n");
        prompt.push_str(&digest);
    }
    prompt.push_str("\n\n");
    prompt.push_str(prompts::FRAGMENT_CONTRACT);

    let completion =
        match complete_with_retry(ctx, id, worker.system_prompt(), &prompt, worker.temperature())
            .await
        {
            Ok(completion) => completion,
            Err(failure) => {
                let reason = match failure.error {
                    BackendError::Timeout(after) => DegradationReason::Timeout {
                        after_ms: after.as_millis() as u64,
                    },
                    other => DegradationReason::Backend {
                        detail: other.to_string(),
                    },
                };
                return degrade(worker, ctx, reason, failure.attempts, None);
            }
        };

    let value = match structured_output::parse(&completion.text) {
        ParseOutcome::Parsed(value) => value,
        ParseOutcome::Failed { raw, reason } => {
            return degrade(
                worker,
                ctx,
                DegradationReason::Parse { detail: reason },
                completion.attempts,
                Some(&raw),
            );
        }
    };

    let mut fragment = match validate_envelope(worker, value) {
        Ok(fragment) => fragment,
        Err(detail) => {
            return degrade(
                worker,
                ctx,
                DegradationReason::InvalidEnvelope { detail },
                completion.attempts,
                Some(&completion.text),
            );
        }
    };
    worker.interpret(&mut fragment);

    tracing::info!(
        worker = id,
        confidence = fragment.confidence,
        opportunities = fragment.suggested_opportunities.len(),
        "Analysis fragment produced"
    );
    ctx.notify(
        id,
        MessageKind::Response,
        json!({
            "worker": id,
            "confidence": fragment.confidence,
            "complexity": fragment.complexity,
            "suggested_opportunities": fragment.suggested_opportunities,
            "findings_keys": fragment.findings.keys().collect::<Vec<_>>(),
            "attempts": completion.attempts,
        }),
    );
    fragment
}

fn degrade<W: AnalysisWorker + ?Sized>(
    worker: &W,
    ctx: &SkillContext,
    reason: DegradationReason,
    attempts: u32,
    raw: Option<&str>,
) -> AnalysisFragment {
    tracing::warn!(worker = worker.id(), reason = reason.label(), attempts, "Worker degraded");
    ctx.notify(
        worker.id(),
        MessageKind::WorkerDegradation,
        json!({
            "worker": worker.id(),
            "reason": reason,
            "attempts": attempts,
            "raw_preview": raw.map(|r| structured_output::preview(r, RAW_PREVIEW_CHARS)),
        }),
    );
    AnalysisFragment::degraded(worker.kind(), reason)
}

/// Check the common envelope and split off extension fields.
pub fn validate_envelope<W: AnalysisWorker + ?Sized>(
    worker: &W,
    value: Value,
) -> Result<AnalysisFragment, String> {
    let Value::Object(mut map) = value else {
        return Err("response is not a JSON object".to_string());
    };

    let confidence = match map.remove("confidence") {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| format!("confidence is not a number: {:?}", s))?,
        Some(other) => return Err(format!("confidence is not a number: {}", other)),
        None => return Err("missing required field 'confidence'".to_string()),
    };
    // Percent-style answers (e.g. 80) are scaled down
    let confidence = if confidence > 1.0 && confidence <= 100.0 {
        confidence / 100.0
    } else {
        confidence
    };
    if !(0.0..=1.0).contains(&confidence) {
        return Err(format!("confidence out of range: {}", confidence));
    }

    let findings = match map.remove("findings") {
        Some(Value::Object(findings)) => findings,
        Some(Value::Null) | None => Map::new(),
        Some(other) => return Err(format!("findings must be an object, got {}", other)),
    };

    let mut suggested_opportunities = Vec::new();
    let keys = std::iter::once("suggested_opportunities").chain(worker.opportunity_aliases().iter().copied());
    for key in keys {
        if let Some(raw) = map.remove(key) {
            suggested_opportunities.extend(opportunity_titles(&raw)?);
        }
    }

    let complexity = map
        .remove("complexity")
        .or_else(|| findings.get("complexity").cloned())
        .as_ref()
        .and_then(complexity_label);

    // Whatever is left is worker-specific
    let extensions = map;

    Ok(AnalysisFragment {
        worker_id: worker.id().to_string(),
        kind: worker.kind(),
        findings,
        confidence,
        suggested_opportunities,
        complexity,
        extensions,
        degraded: None,
    })
}

/// `"high"` or `{"level": "high", ...}`
fn complexity_label(value: &Value) -> Option<Complexity> {
    match value {
        Value::String(label) => Complexity::from_label(label),
        Value::Object(obj) => ["level", "overall", "rating"]
            .iter()
            .find_map(|key| obj.get(*key).and_then(Value::as_str))
            .and_then(Complexity::from_label),
        _ => None,
    }
}

/// Opportunities may be plain titles or objects carrying a `title`.
fn opportunity_titles(raw: &Value) -> Result<Vec<String>, String> {
    let Value::Array(items) = raw else {
        return Err("suggested opportunities must be a list".to_string());
    };
    Ok(items
        .iter()
        .filter_map(|item| match item {
            Value::String(title) => Some(title.trim().to_string()),
            Value::Object(obj) => obj
                .get("title")
                .or_else(|| obj.get("name"))
                .or_else(|| obj.get("opportunity"))
                .and_then(Value::as_str)
                .map(|t| t.trim().to_string()),
            _ => None,
        })
        .filter(|title| !title.is_empty())
        .collect())
}

/// Short digest of other workers' fragments for multi-round analysis
fn peer_digest(own_id: &str, peers: &[AnalysisFragment]) -> String {
    peers
        .iter()
        .filter(|peer| peer.worker_id != own_id && !peer.is_degraded())
        .map(|peer| {
            format!(
                "- {} (confidence {:.2}): opportunities [{}]; findings {}",
                peer.worker_id,
                peer.confidence,
                peer.suggested_opportunities.join("; "),
                structured_output::preview(&Value::Object(peer.findings.clone()).to_string(), 600)
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Repository headline shared by every worker prompt
pub fn target_header(snapshot: &Snapshot) -> String {
    let target = &snapshot.target;
    format!(
        "Repository: {}\nLanguage: {}\nDescription: {}",
        snapshot.display_name(),
        target.language.as_deref().unwrap_or("Unknown"),
        target.description.as_deref().unwrap_or("No description"),
    )
}

/// Move worker-specific keys the model put at top level into `findings`.
pub fn promote_to_findings(fragment: &mut AnalysisFragment, keys: &[&str]) {
    for key in keys {
        if fragment.findings.contains_key(*key) {
            continue;
        }
        if let Some(value) = fragment.extensions.remove(*key) {
            fragment.findings.insert(key.to_string(), value);
        }
    }
}

/// Render up to `max` items as a bullet list, noting how many were left out
pub fn bullet_list<I, S>(items: I, max: usize) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut lines = Vec::new();
    let mut total = 0;
    for item in items {
        total += 1;
        if lines.len() < max {
            lines.push(format!("- {}", item.as_ref()));
        }
    }
    if total == 0 {
        return "(none)".to_string();
    }
    if total > max {
        lines.push(format!("- ... and {} more", total - max));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ModelConfig;
    use crate::skills::structure_skill::StructureWorker;
    use crate::swarm::message_bus::MessageBus;
    use crate::test_support::{sample_snapshot, worker_reply, Script, ScriptedBackend};
    use std::sync::Arc;
    use std::time::Duration;

    fn context(backend: ScriptedBackend) -> SkillContext {
        SkillContext::new(Arc::new(backend), Arc::new(MessageBus::new()), "conv")
            .for_agent(ModelConfig::default(), Duration::from_secs(2))
    }

    #[tokio::test]
    async fn test_valid_reply_becomes_fragment() {
        let ctx = context(ScriptedBackend::new().script(
            "structure_analyzer",
            vec![Script::Reply(worker_reply(0.8, &["Add caching"]))],
        ));
        let fragment = StructureWorker.analyze(&sample_snapshot(), &ctx).await;

        assert!(!fragment.is_degraded());
        assert_eq!(fragment.confidence, 0.8);
        assert_eq!(fragment.suggested_opportunities, vec!["Add caching"]);
        assert_eq!(fragment.complexity, Some(Complexity::Medium));
        assert_eq!(fragment.findings["summary"], "looks reasonable");

        let responses = ctx
            .bus
            .history_filtered("conv", Some(MessageKind::Response), None);
        assert_eq!(responses.len(), 1);
    }

    #[tokio::test]
    async fn test_extensions_and_object_opportunities() {
        let reply = json!({
            "confidence": "75",
            "findings": {},
            "suggested_opportunities": [{"title": "Event sourcing", "why": "audit"}, 3, ""],
            "architecture": {"pattern": "layered"},
            "hotspots": ["src/ledger.rs"]
        });
        let ctx = context(
            ScriptedBackend::new().script("structure_analyzer", vec![Script::Reply(reply.to_string())]),
        );
        let fragment = StructureWorker.analyze(&sample_snapshot(), &ctx).await;
        assert_eq!(fragment.confidence, 0.75);
        assert_eq!(fragment.suggested_opportunities, vec!["Event sourcing"]);
        assert_eq!(fragment.extensions["hotspots"][0], "src/ledger.rs");
        // Structure findings are lifted out of the extension area
        assert_eq!(fragment.findings["architecture"]["pattern"], "layered");
        assert!(!fragment.extensions.contains_key("architecture"));
    }

    #[tokio::test]
    async fn test_missing_confidence_degrades() {
        let ctx = context(ScriptedBackend::new().script(
            "structure_analyzer",
            vec![Script::Reply("{\"findings\": {}}".into())],
        ));
        let fragment = StructureWorker.analyze(&sample_snapshot(), &ctx).await;
        assert!(matches!(
            fragment.degraded,
            Some(DegradationReason::InvalidEnvelope { .. })
        ));
        let notes = ctx
            .bus
            .history_filtered("conv", Some(MessageKind::WorkerDegradation), None);
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].payload["worker"], "structure_analyzer");
    }

    #[tokio::test]
    async fn test_unparseable_reply_degrades_with_raw_preview() {
        let ctx = context(ScriptedBackend::new().script(
            "structure_analyzer",
            vec![Script::Reply("I cannot help with that.".into())],
        ));
        let fragment = StructureWorker.analyze(&sample_snapshot(), &ctx).await;
        assert!(matches!(fragment.degraded, Some(DegradationReason::Parse { .. })));
        let notes = ctx
            .bus
            .history_filtered("conv", Some(MessageKind::WorkerDegradation), None);
        assert_eq!(notes[0].payload["raw_preview"], "I cannot help with that.");
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_degrades_without_retry() {
        let backend = Arc::new(ScriptedBackend::new().script("structure_analyzer", vec![Script::Hang]));
        let ctx = SkillContext::new(backend.clone(), Arc::new(MessageBus::new()), "conv")
            .for_agent(ModelConfig::default(), Duration::from_secs(2));
        let fragment = StructureWorker.analyze(&sample_snapshot(), &ctx).await;
        assert_eq!(
            fragment.degraded,
            Some(DegradationReason::Timeout { after_ms: 2000 })
        );
        assert_eq!(backend.calls_for("structure_analyzer"), 1);
    }

    #[tokio::test]
    async fn test_peer_digest_included_in_prompt() {
        let backend = Arc::new(ScriptedBackend::new().script(
            "structure_analyzer",
            vec![Script::Reply(worker_reply(0.5, &[]))],
        ));
        let ctx = SkillContext::new(backend.clone(), Arc::new(MessageBus::new()), "conv");
        let mut peer = AnalysisFragment::degraded(
            WorkerKind::Dependency,
            DegradationReason::Timeout { after_ms: 1 },
        );
        peer.degraded = None;
        peer.suggested_opportunities = vec!["Upgrade axum".into()];

        StructureWorker
            .analyze_with_peers(&sample_snapshot(), &ctx, &[peer])
            .await;
        let prompt = &backend.requests_for("structure_analyzer")[0].prompt;
        assert!(prompt.contains("Peer Findings"));
        assert!(prompt.contains("Upgrade axum"));
    }

    #[test]
    fn test_promote_to_findings() {
        let mut fragment = AnalysisFragment::degraded(
            WorkerKind::Structure,
            DegradationReason::Timeout { after_ms: 1 },
        );
        fragment.extensions.insert("architecture".into(), json!({"pattern": "mvc"}));
        fragment.extensions.insert("other".into(), json!(1));
        promote_to_findings(&mut fragment, &["architecture"]);
        assert_eq!(fragment.findings["architecture"]["pattern"], "mvc");
        assert!(fragment.extensions.contains_key("other"));
    }

    #[test]
    fn test_bullet_list() {
        assert_eq!(bullet_list(Vec::<String>::new(), 3), "(none)");
        assert_eq!(bullet_list(["a", "b", "c"], 2), "- a\n- b\n- ... and 1 more");
    }
}
