//! # Artifact Registry
//!
//! Shared payload types passed between pipeline stages and recorded on the
//! message bus: analysis fragments, the synthesized report, versioned
//! artifacts and their validation results.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use assay_core::skills::artifact_registry::{AnalysisFragment, WorkerKind};
//!
//! let fragment = AnalysisFragment::degraded(
//!     WorkerKind::Dependency,
//!     DegradationReason::Timeout { after_ms: 120_000 },
//! );
//! assert_eq!(fragment.confidence, 0.0);
//! ```

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

// ============================================================================
// Analysis Fragments
// ============================================================================

/// The registered analysis worker variants, in registration order
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum WorkerKind {
    Structure,
    ChangeHistory,
    DefectHistory,
    Dependency,
}

impl WorkerKind {
    pub fn all() -> [WorkerKind; 4] {
        [
            WorkerKind::Structure,
            WorkerKind::ChangeHistory,
            WorkerKind::DefectHistory,
            WorkerKind::Dependency,
        ]
    }

    /// Agent id used on the bus and for per-agent model overrides
    pub fn agent_id(&self) -> &'static str {
        match self {
            WorkerKind::Structure => "structure_analyzer",
            WorkerKind::ChangeHistory => "change_history_analyzer",
            WorkerKind::DefectHistory => "defect_history_analyzer",
            WorkerKind::Dependency => "dependency_analyzer",
        }
    }
}

/// Ordinal complexity estimate; `Unknown` sorts lowest
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    #[default]
    Unknown,
    Low,
    Medium,
    High,
}

impl Complexity {
    /// Lenient label parsing for model output ("Medium", "moderate", "HIGH")
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "low" | "simple" | "easy" => Some(Complexity::Low),
            "medium" | "moderate" | "intermediate" => Some(Complexity::Medium),
            "high" | "complex" | "hard" => Some(Complexity::High),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Complexity::Unknown => "unknown",
            Complexity::Low => "low",
            Complexity::Medium => "medium",
            Complexity::High => "high",
        }
    }
}

/// Why a worker's fragment was replaced
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum DegradationReason {
    /// Per-worker timeout elapsed
    Timeout { after_ms: u64 },
    /// The whole-run analysis deadline elapsed before the worker finished
    DeadlineExceeded { after_ms: u64 },
    /// Backend kept failing after retries
    Backend { detail: String },
    /// Response could not be parsed
    Parse { detail: String },
    /// Response parsed but lacked the required envelope
    InvalidEnvelope { detail: String },
    /// Worker task panicked
    Crashed { detail: String },
}

impl DegradationReason {
    pub fn label(&self) -> &'static str {
        match self {
            DegradationReason::Timeout { .. } => "timeout",
            DegradationReason::DeadlineExceeded { .. } => "deadline_exceeded",
            DegradationReason::Backend { .. } => "backend",
            DegradationReason::Parse { .. } => "parse",
            DegradationReason::InvalidEnvelope { .. } => "invalid_envelope",
            DegradationReason::Crashed { .. } => "crashed",
        }
    }
}

/// One worker's structured partial analysis
///
/// The common envelope (`findings`, `confidence`, `suggested_opportunities`,
/// `complexity`) is validated when the response is parsed. Any other
/// top-level keys the worker returned land in `extensions`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisFragment {
    pub worker_id: String,
    pub kind: WorkerKind,
    #[serde(default)]
    pub findings: Map<String, Value>,
    /// 0.0 - 1.0
    pub confidence: f64,
    #[serde(default)]
    pub suggested_opportunities: Vec<String>,
    #[serde(default)]
    pub complexity: Option<Complexity>,
    #[serde(default)]
    pub extensions: Map<String, Value>,
    #[serde(default)]
    pub degraded: Option<DegradationReason>,
}

impl AnalysisFragment {
    /// Placeholder for a worker that failed or timed out
    pub fn degraded(kind: WorkerKind, reason: DegradationReason) -> Self {
        Self {
            worker_id: kind.agent_id().to_string(),
            kind,
            findings: Map::new(),
            confidence: 0.0,
            suggested_opportunities: Vec::new(),
            complexity: None,
            extensions: Map::new(),
            degraded: Some(reason),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.is_some()
    }
}

// ============================================================================
// Synthesis
// ============================================================================

/// Technology summary taken from the dependency worker
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TechSummary {
    #[serde(default)]
    pub frameworks: Vec<String>,
    #[serde(default)]
    pub libraries: Vec<String>,
    #[serde(default)]
    pub runtime: Option<String>,
    #[serde(default)]
    pub build_tools: Vec<String>,
}

impl TechSummary {
    pub fn is_empty(&self) -> bool {
        self.frameworks.is_empty()
            && self.libraries.is_empty()
            && self.runtime.is_none()
            && self.build_tools.is_empty()
    }

    /// Flat list of technologies, frameworks first
    pub fn technologies(&self) -> Vec<String> {
        let mut all: Vec<String> = self.runtime.iter().cloned().collect();
        all.extend(self.frameworks.iter().cloned());
        all.extend(self.libraries.iter().cloned());
        all.extend(self.build_tools.iter().cloned());
        all
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RankedOpportunity {
    /// Title as first seen in registration order
    pub title: String,
    /// Sum of contributing fragments' confidence
    pub score: f64,
    /// Worker ids that suggested it
    pub contributors: Vec<String>,
}

/// Brief identity of the target carried into generation prompts
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TargetProfile {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
}

/// Deterministic merge of all fragments of a run
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SynthesizedReport {
    pub tech_summary: TechSummary,
    pub ranked_opportunities: Vec<RankedOpportunity>,
    pub complexity: Complexity,
    /// Worker ids whose fragments were not degraded, registration order
    #[serde(default)]
    pub contributing_workers: Vec<String>,
    #[serde(default)]
    pub degraded_workers: Vec<String>,
    /// Findings per worker id
    #[serde(default)]
    pub findings: BTreeMap<String, Map<String, Value>>,
    #[serde(default)]
    pub target: Option<TargetProfile>,
}

impl SynthesizedReport {
    pub fn with_target(mut self, target: TargetProfile) -> Self {
        self.target = Some(target);
        self
    }
}

// ============================================================================
// Generation
// ============================================================================

/// Caller-supplied shaping of the generated artifact
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GenerationParams {
    pub difficulty: String,
    pub category: Option<String>,
    pub time_box_minutes: Option<u32>,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            difficulty: "intermediate".to_string(),
            category: None,
            time_box_minutes: None,
        }
    }
}

/// A file handed to the candidate as a starting point
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct StarterFile {
    pub filename: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct RubricCriterion {
    pub criterion: String,
    pub points: u32,
    #[serde(default)]
    pub description: String,
}

/// Generated problem statement (the artifact body)
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct ProblemStatement {
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub business_context: String,
    #[serde(default)]
    pub requirements: Vec<String>,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    #[serde(default)]
    pub starter_code: Vec<StarterFile>,
    #[serde(default)]
    pub hints: Vec<String>,
    /// Free text, e.g. "2-3 hours"
    #[serde(default)]
    pub estimated_time: String,
    #[serde(default)]
    pub difficulty: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub tech_stack: Vec<String>,
    #[serde(default)]
    pub evaluation_rubric: Vec<RubricCriterion>,
}

/// Fields a refinement must keep unless validation flags them
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IdentityField {
    Title,
    Category,
    TechStack,
}

impl IdentityField {
    pub fn all() -> [IdentityField; 3] {
        [
            IdentityField::Title,
            IdentityField::Category,
            IdentityField::TechStack,
        ]
    }

    fn keywords(&self) -> &'static [&'static str] {
        match self {
            IdentityField::Title => &["title"],
            IdentityField::Category => &["category"],
            IdentityField::TechStack => &["tech stack", "tech_stack", "tech-stack", "technology stack"],
        }
    }

    /// Whether an issue text names this field
    pub fn flagged_by(&self, issue: &str) -> bool {
        let lowered = issue.to_ascii_lowercase();
        self.keywords().iter().any(|k| lowered.contains(k))
    }

    /// Identity fields named by any of `issues`
    pub fn flagged_in(issues: &[String]) -> Vec<IdentityField> {
        Self::all()
            .into_iter()
            .filter(|field| issues.iter().any(|issue| field.flagged_by(issue)))
            .collect()
    }
}

impl ProblemStatement {
    /// Copy identity fields from `prior` unless listed in `unlocked`.
    ///
    /// Returns the fields that had drifted and were put back.
    pub fn restore_identity(
        &mut self,
        prior: &ProblemStatement,
        unlocked: &[IdentityField],
    ) -> Vec<IdentityField> {
        let mut restored = Vec::new();
        for field in IdentityField::all() {
            if unlocked.contains(&field) {
                continue;
            }
            let drifted = match field {
                IdentityField::Title => self.title != prior.title,
                IdentityField::Category => self.category != prior.category,
                IdentityField::TechStack => self.tech_stack != prior.tech_stack,
            };
            if drifted {
                match field {
                    IdentityField::Title => self.title = prior.title.clone(),
                    IdentityField::Category => self.category = prior.category.clone(),
                    IdentityField::TechStack => self.tech_stack = prior.tech_stack.clone(),
                }
                restored.push(field);
            }
        }
        restored
    }

    /// Fraction of top-level fields that differ from `prior` (0.0 - 1.0).
    ///
    /// Refinements are meant to be minimal edits; this is the yardstick
    /// reported alongside each refined version.
    pub fn change_ratio(&self, prior: &ProblemStatement) -> f64 {
        let (Ok(Value::Object(next)), Ok(Value::Object(before))) =
            (serde_json::to_value(self), serde_json::to_value(prior))
        else {
            return 1.0;
        };
        if next.is_empty() {
            return 0.0;
        }
        let changed = next
            .iter()
            .filter(|(key, value)| before.get(key.as_str()) != Some(value))
            .count();
        changed as f64 / next.len() as f64
    }
}

/// How an artifact version came to be
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GenerationMode {
    Create,
    Refine,
}

/// One immutable version of the generated document
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Artifact {
    /// 0 = creation, k = k-th refinement
    pub version: u32,
    pub conversation_id: String,
    pub mode: GenerationMode,
    pub created_at: DateTime<Utc>,
    pub body: ProblemStatement,
    /// Identity fields put back after the model changed them
    #[serde(default)]
    pub restored_fields: Vec<IdentityField>,
    /// Share of fields changed relative to the previous version
    #[serde(default)]
    pub change_ratio: Option<f64>,
}

// ============================================================================
// Validation
// ============================================================================

/// The fixed scoring dimensions
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ValidationDimension {
    Feasibility,
    Clarity,
    TechnicalFit,
    EducationalValue,
}

impl ValidationDimension {
    pub fn all() -> [ValidationDimension; 4] {
        [
            ValidationDimension::Feasibility,
            ValidationDimension::Clarity,
            ValidationDimension::TechnicalFit,
            ValidationDimension::EducationalValue,
        ]
    }

    pub fn key(&self) -> &'static str {
        match self {
            ValidationDimension::Feasibility => "feasibility",
            ValidationDimension::Clarity => "clarity",
            ValidationDimension::TechnicalFit => "technical_fit",
            ValidationDimension::EducationalValue => "educational_value",
        }
    }

    /// Alternative keys models commonly use for this dimension
    pub fn aliases(&self) -> &'static [&'static str] {
        match self {
            ValidationDimension::Feasibility => &["feasibility_score"],
            ValidationDimension::Clarity => &["quality", "quality_score", "clarity_score"],
            ValidationDimension::TechnicalFit => &["technical", "technical_score", "technical_fit_score"],
            ValidationDimension::EducationalValue => &["educational", "educational_score", "educational_value_score"],
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ValidationFeedback {
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub weaknesses: Vec<String>,
    #[serde(default)]
    pub improvements: Vec<String>,
}

/// Issue marker carried by results the validator could not produce
pub const VALIDATION_FAILED: &str = "validation_failed";

/// Score of exactly one artifact version
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationResult {
    pub artifact_version: u32,
    pub approved: bool,
    pub overall_score: f64,
    /// Dimension key -> 0-100
    pub dimension_scores: BTreeMap<String, f64>,
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default)]
    pub suggestions: Vec<String>,
    #[serde(default)]
    pub feedback: ValidationFeedback,
    /// True when the validator could not score at all
    #[serde(default)]
    pub failed: bool,
}

impl ValidationResult {
    /// Arithmetic mean of the scores, 0.0 for none
    pub fn mean(scores: &BTreeMap<String, f64>) -> f64 {
        if scores.is_empty() {
            return 0.0;
        }
        scores.values().sum::<f64>() / scores.len() as f64
    }

    pub fn from_scores(
        artifact_version: u32,
        dimension_scores: BTreeMap<String, f64>,
        threshold: f64,
    ) -> Self {
        let overall_score = Self::mean(&dimension_scores);
        Self {
            artifact_version,
            approved: overall_score >= threshold,
            overall_score,
            dimension_scores,
            issues: Vec::new(),
            suggestions: Vec::new(),
            feedback: ValidationFeedback::default(),
            failed: false,
        }
    }

    /// The "couldn't score" result: zero everywhere, never approved
    pub fn validation_failed(artifact_version: u32) -> Self {
        let dimension_scores = ValidationDimension::all()
            .iter()
            .map(|d| (d.key().to_string(), 0.0))
            .collect();
        Self {
            artifact_version,
            approved: false,
            overall_score: 0.0,
            dimension_scores,
            issues: vec![VALIDATION_FAILED.to_string()],
            suggestions: Vec::new(),
            feedback: ValidationFeedback::default(),
            failed: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn statement() -> ProblemStatement {
        ProblemStatement {
            title: "Build a token bucket".into(),
            description: "Implement rate limiting".into(),
            business_context: String::new(),
            requirements: vec!["Thread safe".into()],
            acceptance_criteria: vec![],
            starter_code: vec![],
            hints: vec![],
            estimated_time: "2 hours".into(),
            difficulty: "intermediate".into(),
            category: "backend".into(),
            tech_stack: vec!["rust".into(), "tokio".into()],
            evaluation_rubric: vec![],
        }
    }

    #[test]
    fn test_complexity_ordering_and_labels() {
        assert!(Complexity::High > Complexity::Medium);
        assert!(Complexity::Low > Complexity::Unknown);
        assert_eq!(Complexity::from_label(" Moderate "), Some(Complexity::Medium));
        assert_eq!(Complexity::from_label("n/a"), None);
    }

    #[test]
    fn test_degraded_fragment() {
        let fragment = AnalysisFragment::degraded(
            WorkerKind::ChangeHistory,
            DegradationReason::Timeout { after_ms: 50 },
        );
        assert_eq!(fragment.worker_id, "change_history_analyzer");
        assert_eq!(fragment.confidence, 0.0);
        assert!(fragment.findings.is_empty());
        assert!(fragment.is_degraded());
        let json = serde_json::to_value(&fragment).unwrap();
        assert_eq!(json["degraded"]["reason"], "timeout");
    }

    #[test]
    fn test_identity_flags_and_restore() {
        let prior = statement();
        let mut next = statement();
        next.title = "Something else".into();
        next.tech_stack = vec!["go".into()];
        next.description = "Implement rate limiting with bursts".into();

        let issues = vec!["The tech stack does not match the repository".to_string()];
        let unlocked = IdentityField::flagged_in(&issues);
        assert_eq!(unlocked, vec![IdentityField::TechStack]);

        let restored = next.restore_identity(&prior, &unlocked);
        assert_eq!(restored, vec![IdentityField::Title]);
        assert_eq!(next.title, prior.title);
        assert_eq!(next.tech_stack, vec!["go".to_string()]);
    }

    #[test]
    fn test_change_ratio() {
        let prior = statement();
        assert_eq!(prior.change_ratio(&prior), 0.0);

        let mut next = statement();
        next.hints.push("Use a monotonic clock".into());
        let ratio = next.change_ratio(&prior);
        assert!(ratio > 0.0 && ratio < 0.2, "ratio was {}", ratio);
    }

    #[test]
    fn test_validation_failed_shape() {
        let result = ValidationResult::validation_failed(3);
        assert_eq!(result.artifact_version, 3);
        assert!(!result.approved);
        assert!(result.failed);
        assert_eq!(result.overall_score, 0.0);
        assert_eq!(result.issues, vec![VALIDATION_FAILED.to_string()]);
        assert_eq!(result.dimension_scores.len(), 4);
    }

    #[test]
    fn test_from_scores_threshold_is_inclusive() {
        let scores: BTreeMap<String, f64> = [("a", 80.0), ("b", 90.0)]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        let result = ValidationResult::from_scores(0, scores, 85.0);
        assert_eq!(result.overall_score, 85.0);
        assert!(result.approved);
    }
}
