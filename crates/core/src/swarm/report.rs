//! # Generation Report
//!
//! What a finished run hands back to the caller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::events::Message;
use super::metrics::RunMetrics;
use super::pipeline::PipelineStage;
use crate::skills::artifact_registry::{
    AnalysisFragment, Artifact, GenerationParams, SynthesizedReport, ValidationResult,
};

/// Caller-facing entry point arguments
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenerationRequest {
    pub target_id: String,
    #[serde(flatten)]
    pub params: GenerationParams,
}

impl GenerationRequest {
    pub fn new(target_id: impl Into<String>) -> Self {
        Self {
            target_id: target_id.into(),
            params: GenerationParams::default(),
        }
    }

    pub fn with_params(mut self, params: GenerationParams) -> Self {
        self.params = params;
        self
    }
}

/// How good the delivered result is. A hard failure is an `Err`, not an outcome.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Approved with every stage healthy
    HighQuality,
    /// Unapproved, or produced around degraded stages
    BestEffort,
}

impl Outcome {
    pub fn classify(approved: bool, degradations: &[StageDegradation]) -> Self {
        if approved && degradations.is_empty() {
            Outcome::HighQuality
        } else {
            Outcome::BestEffort
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::HighQuality => "high_quality",
            Outcome::BestEffort => "best_effort",
        }
    }
}

/// A stage that delivered less than it should have
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageDegradation {
    pub stage: PipelineStage,
    /// Worker or agent id
    pub component: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationReport {
    pub conversation_id: String,
    pub target_id: String,
    pub params: GenerationParams,
    pub approved: bool,
    pub outcome: Outcome,
    /// The last artifact version
    pub artifact: Artifact,
    /// The result that scored `artifact`
    pub validation: ValidationResult,
    /// Every version, oldest first
    pub artifacts: Vec<Artifact>,
    pub validations: Vec<ValidationResult>,
    pub report: SynthesizedReport,
    /// Final analysis round, in worker registration order
    pub fragments: Vec<AnalysisFragment>,
    pub degradations: Vec<StageDegradation>,
    /// Itemized issues: validator findings plus degradations
    pub issues: Vec<String>,
    pub stages: Vec<PipelineStage>,
    pub audit_trail: Vec<Message>,
    pub metrics: RunMetrics,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}
