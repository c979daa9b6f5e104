//! # Orchestrator
//!
//! Drives one run through the pipeline:
//!
//! ```text
//! collect → fan out workers → synthesize → create → validate ⟲ refine → done
//! ```
//!
//! Every stage change, request and result is recorded on the run's
//! conversation. Only a collection error or an exhausted generator come back
//! as `Err`; everything else degrades into a delivered, annotated report.

use chrono::Utc;
use serde_json::json;
use std::sync::Arc;

use super::config::OrchestratorConfig;
use super::events::{new_conversation_id, Envelope, Message, MessageKind, BROADCAST};
use super::fan_out::{fan_out, ORCHESTRATOR_ID};
use super::message_bus::MessageBus;
use super::metrics::{RunMetrics, StageClock};
use super::pipeline::{Pipeline, PipelineStage};
use super::report::{GenerationReport, GenerationRequest, Outcome, StageDegradation};
use crate::backend::GenerativeBackend;
use crate::error::PipelineError;
use crate::skills::analysis_worker::AnalysisWorker;
use crate::skills::artifact_registry::{AnalysisFragment, TargetProfile, ValidationResult};
use crate::skills::llm_helpers::SkillContext;
use crate::skills::{
    generator_skill, validator_skill, ChangeHistoryWorker, DefectHistoryWorker,
    DependencyWorker, GeneratorSkill, StructureWorker, ValidatorSkill,
};
use crate::state::db::RunStore;
use crate::state::snapshot::Snapshot;
use crate::tools::collector::DataCollector;
use crate::tools::synthesizer::{self, synthesize};

/// The four analysis workers, in registration order
pub fn default_workers() -> Vec<Arc<dyn AnalysisWorker>> {
    vec![
        Arc::new(StructureWorker),
        Arc::new(ChangeHistoryWorker),
        Arc::new(DefectHistoryWorker),
        Arc::new(DependencyWorker),
    ]
}

/// Agent ids taking part in a run with these workers, in pipeline order
pub fn agent_ids(workers: &[Arc<dyn AnalysisWorker>]) -> Vec<&'static str> {
    let mut agents: Vec<&'static str> = workers.iter().map(|w| w.id()).collect();
    agents.extend([synthesizer::AGENT_ID, generator_skill::AGENT_ID, validator_skill::AGENT_ID]);
    agents
}

/// Per-run bookkeeping
struct Run {
    conversation_id: String,
    pipeline: Pipeline,
    clock: StageClock,
    ctx: SkillContext,
}

pub struct Orchestrator {
    config: OrchestratorConfig,
    collector: Arc<dyn DataCollector>,
    backend: Arc<dyn GenerativeBackend>,
    bus: Arc<MessageBus>,
    workers: Vec<Arc<dyn AnalysisWorker>>,
    generator: GeneratorSkill,
    validator: ValidatorSkill,
    store: Option<Arc<RunStore>>,
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        collector: Arc<dyn DataCollector>,
        backend: Arc<dyn GenerativeBackend>,
    ) -> Self {
        let validator = ValidatorSkill::new(config.approval_threshold);
        Self {
            config,
            collector,
            backend,
            bus: Arc::new(MessageBus::new()),
            workers: default_workers(),
            generator: GeneratorSkill::new(),
            validator,
            store: None,
        }
    }

    /// Share a bus (e.g. one with a live feed) across runs
    pub fn with_bus(mut self, bus: Arc<MessageBus>) -> Self {
        self.bus = bus;
        self
    }

    /// Persist every finished or failed run
    pub fn with_store(mut self, store: Arc<RunStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Replace the registered workers; order is the merge order
    pub fn with_workers(mut self, workers: Vec<Arc<dyn AnalysisWorker>>) -> Self {
        self.workers = workers;
        self
    }

    pub fn bus(&self) -> Arc<MessageBus> {
        Arc::clone(&self.bus)
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Run the whole pipeline for one target.
    #[tracing::instrument(skip(self, request), fields(target = %request.target_id))]
    pub async fn generate(
        &self,
        request: GenerationRequest,
    ) -> Result<GenerationReport, PipelineError> {
        let started_at = Utc::now();
        let conversation_id = new_conversation_id();
        self.bus.open_conversation(&conversation_id);
        let _open = OpenConversation {
            bus: Arc::clone(&self.bus),
            conversation_id: conversation_id.clone(),
        };

        let ctx = SkillContext::new(
            Arc::clone(&self.backend),
            Arc::clone(&self.bus),
            conversation_id.clone(),
        )
        .with_retry(self.config.retry.clone());
        let mut run = Run {
            conversation_id,
            pipeline: Pipeline::new(self.config.max_refinement_iterations),
            clock: StageClock::start(),
            ctx,
        };

        tracing::info!(conversation_id = %run.conversation_id, "Run started");
        self.broadcast(
            &run,
            ORCHESTRATOR_ID,
            MessageKind::RunStarted,
            json!({
                "target": request.target_id,
                "params": request.params,
                "max_refinement_iterations": self.config.max_refinement_iterations,
                "approval_threshold": self.config.approval_threshold,
                "workers": self.workers.iter().map(|w| w.id()).collect::<Vec<_>>(),
            }),
        );
        run.clock.enter(PipelineStage::Collecting);

        // COLLECT
        let snapshot = match self.collector.fetch(&request.target_id).await {
            Ok(snapshot) => Arc::new(snapshot),
            Err(source) => {
                let err = PipelineError::Collection {
                    target_id: request.target_id.clone(),
                    source,
                };
                return Err(self.abort(run, &request, err));
            }
        };
        run.ctx.notify(
            self.collector.name(),
            MessageKind::Response,
            json!({"event": "snapshot_collected", "snapshot": snapshot.summary()}),
        );

        // ANALYZE
        self.step(&mut run);
        let fragments = self.analyze(&run, &snapshot).await;

        // SYNTHESIZE
        self.step(&mut run);
        let report = synthesize(&fragments).with_target(profile(&snapshot));
        self.broadcast(
            &run,
            synthesizer::AGENT_ID,
            MessageKind::Broadcast,
            json!({
                "complexity": report.complexity,
                "technologies": report.tech_summary.technologies(),
                "top_opportunities": report
                    .ranked_opportunities
                    .iter()
                    .take(5)
                    .map(|o| &o.title)
                    .collect::<Vec<_>>(),
                "contributing_workers": report.contributing_workers,
                "degraded_workers": report.degraded_workers,
            }),
        );

        // GENERATE
        self.step(&mut run);
        let gen_ctx = run.ctx.for_agent(
            self.config.model_for(generator_skill::AGENT_ID),
            self.config.generation_timeout(),
        );
        let val_ctx = run.ctx.for_agent(
            self.config.model_for(validator_skill::AGENT_ID),
            self.config.validation_timeout(),
        );

        let ask = self.request(&run, generator_skill::AGENT_ID, json!({"task": "create"}));
        run.pipeline.record_generation();
        let mut artifact = match self.generator.create(&report, &request.params, &gen_ctx).await {
            Ok(artifact) => artifact,
            Err(failure) => return Err(self.abort(run, &request, failure.into())),
        };
        self.reply(&run, generator_skill::AGENT_ID, &ask, json!({"artifact_version": artifact.version}));
        let mut artifacts = vec![artifact.clone()];
        let mut validations: Vec<ValidationResult> = Vec::new();

        // VALIDATE ⟲ REFINE
        let validation = loop {
            self.step(&mut run);
            let ask = self.request(
                &run,
                validator_skill::AGENT_ID,
                json!({"task": "validate", "artifact_version": artifact.version}),
            );
            let validation = self.validator.validate(&artifact, &report, &val_ctx).await;
            self.reply(
                &run,
                validator_skill::AGENT_ID,
                &ask,
                json!({
                    "artifact_version": validation.artifact_version,
                    "overall_score": validation.overall_score,
                    "approved": validation.approved,
                }),
            );
            validations.push(validation.clone());

            let from = run.pipeline.stage;
            let next = run.pipeline.on_validated(validation.approved);
            self.note_transition(&mut run, from, next);
            if next != PipelineStage::Refining {
                break validation;
            }

            let ask = self.request(
                &run,
                generator_skill::AGENT_ID,
                json!({"task": "refine", "from_version": artifact.version}),
            );
            run.pipeline.record_generation();
            match self.generator.refine(&artifact, &validation, &report, &gen_ctx).await {
                Ok(refined) => {
                    self.reply(
                        &run,
                        generator_skill::AGENT_ID,
                        &ask,
                        json!({"artifact_version": refined.version}),
                    );
                    artifact = refined;
                    artifacts.push(artifact.clone());
                }
                Err(failure) => return Err(self.abort(run, &request, failure.into())),
            }
        };

        // DONE
        let degradations = degradations(&fragments, &validations);
        let approved = validation.approved;
        let outcome = Outcome::classify(approved, &degradations);
        let mut issues = validation.issues.clone();
        issues.extend(
            degradations
                .iter()
                .map(|d| format!("{} degraded during {}: {}", d.component, d.stage.as_str(), d.reason)),
        );

        self.broadcast(
            &run,
            ORCHESTRATOR_ID,
            MessageKind::RunCompleted,
            json!({
                "approved": approved,
                "outcome": outcome,
                "overall_score": validation.overall_score,
                "artifact_version": artifact.version,
                "refinement_iterations": run.pipeline.refinements_used(),
            }),
        );
        self.bus.close_conversation(&run.conversation_id);

        let (stage_durations_ms, total_ms) = run.clock.finish();
        let metrics = RunMetrics {
            stage_durations_ms,
            total_ms,
            refinement_iterations: run.pipeline.refinements_used(),
            generation_calls: run.pipeline.generation_calls,
            validation_rounds: run.pipeline.iteration,
            backend_calls: run.ctx.calls_made(),
            degraded_workers: fragments.iter().filter(|f| f.is_degraded()).count() as u32,
        };
        tracing::info!(
            conversation_id = %run.conversation_id,
            approved,
            outcome = outcome.as_str(),
            score = validation.overall_score,
            refinements = metrics.refinement_iterations,
            total_ms = metrics.total_ms,
            "Run completed"
        );

        let report = GenerationReport {
            audit_trail: self.bus.history(&run.conversation_id),
            conversation_id: run.conversation_id,
            target_id: request.target_id,
            params: request.params,
            approved,
            outcome,
            artifact,
            validation,
            artifacts,
            validations,
            report,
            fragments,
            degradations,
            issues,
            stages: run.pipeline.history().to_vec(),
            metrics,
            started_at,
            finished_at: Utc::now(),
        };

        if let Some(store) = &self.store {
            if let Err(e) = store.save_report(&report) {
                tracing::warn!(error = %e, "Failed to persist run");
            }
        }
        Ok(report)
    }

    /// Every analysis round; later rounds see the previous round's fragments
    async fn analyze(&self, run: &Run, snapshot: &Arc<Snapshot>) -> Vec<AnalysisFragment> {
        let rounds = self.config.analysis_rounds.max(1);
        let mut fragments = Vec::new();
        for round in 1..=rounds {
            let peers = Arc::new(std::mem::take(&mut fragments));
            fragments = fan_out(
                &self.workers,
                Arc::clone(snapshot),
                &run.ctx,
                &self.config,
                round,
                peers,
            )
            .await;
        }
        fragments
    }

    /// Advance along the linear part of the machine
    fn step(&self, run: &mut Run) {
        let from = run.pipeline.stage;
        let to = run.pipeline.advance();
        self.note_transition(run, from, to);
    }

    fn note_transition(&self, run: &mut Run, from: PipelineStage, to: PipelineStage) {
        if from == to {
            return;
        }
        run.clock.enter(to);
        tracing::debug!(from = from.as_str(), to = to.as_str(), iteration = run.pipeline.iteration, "Stage transition");
        self.broadcast(
            run,
            ORCHESTRATOR_ID,
            MessageKind::StageTransition,
            json!({
                "from": from,
                "to": to,
                "iteration": run.pipeline.iteration,
            }),
        );
    }

    fn broadcast(&self, run: &Run, sender: &str, kind: MessageKind, payload: serde_json::Value) -> Message {
        self.bus.record(sender, BROADCAST, kind, payload, &run.conversation_id)
    }

    fn request(&self, run: &Run, agent: &str, payload: serde_json::Value) -> Message {
        self.bus.record(ORCHESTRATOR_ID, agent, MessageKind::Request, payload, &run.conversation_id)
    }

    fn reply(&self, run: &Run, agent: &str, request: &Message, payload: serde_json::Value) {
        self.bus.record_envelope(
            &run.conversation_id,
            Envelope::new(agent, ORCHESTRATOR_ID, MessageKind::Response)
                .with_payload(payload)
                .replying_to(&request.id),
        );
    }

    /// Move to Failed, record why, persist, and hand the error back
    fn abort(&self, mut run: Run, request: &GenerationRequest, err: PipelineError) -> PipelineError {
        let from = run.pipeline.stage;
        run.pipeline.fail();
        let to = run.pipeline.stage;
        self.note_transition(&mut run, from, to);

        tracing::error!(
            conversation_id = %run.conversation_id,
            kind = err.kind(),
            error = %err,
            "Run failed"
        );
        self.broadcast(
            &run,
            ORCHESTRATOR_ID,
            MessageKind::RunFailed,
            json!({
                "kind": err.kind(),
                "error": err.to_string(),
                "failed_during": from,
            }),
        );
        self.bus.close_conversation(&run.conversation_id);

        if let Some(store) = &self.store {
            let trail = self.bus.history(&run.conversation_id);
            if let Err(e) = store.save_failure(&run.conversation_id, &request.target_id, &err, &trail) {
                tracing::warn!(error = %e, "Failed to persist failed run");
            }
        }
        err
    }
}

/// Closes the run's conversation when `generate` is dropped before it
/// reaches Done or Failed, so a cancelled run can still be released.
struct OpenConversation {
    bus: Arc<MessageBus>,
    conversation_id: String,
}

impl Drop for OpenConversation {
    fn drop(&mut self) {
        if !self.bus.is_open(&self.conversation_id) {
            return;
        }
        tracing::warn!(conversation_id = %self.conversation_id, "Run cancelled before completion");
        self.bus.record(
            ORCHESTRATOR_ID,
            BROADCAST,
            MessageKind::RunFailed,
            json!({"kind": "cancelled", "error": "run was cancelled by the caller"}),
            &self.conversation_id,
        );
        self.bus.close_conversation(&self.conversation_id);
    }
}

fn profile(snapshot: &Snapshot) -> TargetProfile {
    TargetProfile {
        name: snapshot.display_name().to_string(),
        description: snapshot.target.description.clone(),
        language: snapshot.target.language.clone(),
    }
}

fn degradations(
    fragments: &[AnalysisFragment],
    validations: &[ValidationResult],
) -> Vec<StageDegradation> {
    let workers = fragments.iter().filter_map(|f| {
        f.degraded.as_ref().map(|reason| StageDegradation {
            stage: PipelineStage::Analyzing,
            component: f.worker_id.clone(),
            reason: reason.label().to_string(),
        })
    });
    let scoring = validations.iter().filter(|v| v.failed).map(|v| StageDegradation {
        stage: PipelineStage::Validating,
        component: validator_skill::AGENT_ID.to_string(),
        reason: format!("artifact v{} could not be scored", v.artifact_version),
    });
    workers.chain(scoring).collect()
}
