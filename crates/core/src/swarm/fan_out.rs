//! # Analysis Fan-Out
//!
//! Scatter-gather over the analysis workers. Every worker gets its own task,
//! its own model and its own per-call deadline; an optional stage deadline
//! bounds the whole gather. The result always has one fragment per worker,
//! in registration order, whatever order the tasks finish in.

use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

use super::config::OrchestratorConfig;
use super::events::{Envelope, MessageKind};
use crate::skills::analysis_worker::AnalysisWorker;
use crate::skills::artifact_registry::{AnalysisFragment, DegradationReason};
use crate::skills::llm_helpers::SkillContext;
use crate::state::snapshot::Snapshot;

pub const ORCHESTRATOR_ID: &str = "orchestrator";

/// Run one analysis round over all workers.
pub async fn fan_out(
    workers: &[Arc<dyn AnalysisWorker>],
    snapshot: Arc<Snapshot>,
    base: &SkillContext,
    config: &OrchestratorConfig,
    round: u32,
    peers: Arc<Vec<AnalysisFragment>>,
) -> Vec<AnalysisFragment> {
    let total = workers.len();
    let stage_deadline = config.analysis_deadline();
    let mut join_set = JoinSet::new();
    let mut task_slots = HashMap::new();

    // SCATTER
    for (index, worker) in workers.iter().enumerate() {
        let ctx = base.for_agent(config.model_for(worker.id()), config.worker_timeout());
        base.bus.record_envelope(
            &base.conversation_id,
            Envelope::new(ORCHESTRATOR_ID, worker.id(), MessageKind::Request).with_payload(json!({
                "task": "analyze",
                "target": snapshot.target.id,
                "round": round,
                "peer_fragments": peers.len(),
            })),
        );

        let worker = Arc::clone(worker);
        let snapshot = Arc::clone(&snapshot);
        let peers = Arc::clone(&peers);
        let handle = join_set.spawn(async move {
            let fragment = worker.analyze_with_peers(&snapshot, &ctx, &peers).await;
            (index, fragment)
        });
        task_slots.insert(handle.id(), index);
    }

    // GATHER
    let mut slots: Vec<Option<AnalysisFragment>> = (0..total).map(|_| None).collect();
    let deadline_at = stage_deadline.map(|d| tokio::time::Instant::now() + d);
    let mut expired = false;
    let mut crashes = 0usize;

    loop {
        let next = match deadline_at {
            Some(at) => match tokio::time::timeout_at(at, join_set.join_next()).await {
                Ok(next) => next,
                Err(_) => {
                    expired = true;
                    join_set.abort_all();
                    break;
                }
            },
            None => join_set.join_next().await,
        };
        match next {
            Some(Ok((index, fragment))) => slots[index] = Some(fragment),
            Some(Err(e)) => {
                crashes += 1;
                tracing::warn!(error = %e, "Analysis task did not complete");
                // Settled now so a later deadline cannot relabel it
                if let Some(&index) = task_slots.get(&e.id()) {
                    let detail = if e.is_panic() {
                        "worker task panicked"
                    } else {
                        "worker task was cancelled"
                    };
                    slots[index] = Some(substitute(
                        base,
                        workers[index].as_ref(),
                        DegradationReason::Crashed {
                            detail: detail.to_string(),
                        },
                    ));
                }
            }
            None => break,
        }
    }

    if expired || crashes > 0 {
        tracing::warn!(
            "Analysis round {} finished with {} crashed and {} late of {} workers",
            round,
            crashes,
            slots.iter().filter(|s| s.is_none()).count(),
            total
        );
    }

    slots
        .into_iter()
        .zip(workers)
        .map(|(slot, worker)| match slot {
            Some(fragment) => fragment,
            None => {
                let reason = if expired {
                    DegradationReason::DeadlineExceeded {
                        after_ms: stage_deadline.unwrap_or(Duration::ZERO).as_millis() as u64,
                    }
                } else {
                    DegradationReason::Crashed {
                        detail: "worker task panicked".to_string(),
                    }
                };
                substitute(base, worker.as_ref(), reason)
            }
        })
        .collect()
}

fn substitute(
    ctx: &SkillContext,
    worker: &dyn AnalysisWorker,
    reason: DegradationReason,
) -> AnalysisFragment {
    ctx.notify(
        worker.id(),
        MessageKind::WorkerDegradation,
        json!({
            "worker": worker.id(),
            "reason": reason,
            "attempts": 0,
        }),
    );
    AnalysisFragment::degraded(worker.kind(), reason)
}
