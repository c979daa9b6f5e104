//! # Assay Skills
//!
//! Every unit that calls the generative backend.
//!
//! ```text
//! SkillContext (backend, bus, model, retry, timeout)
//!   ├── AnalysisWorker × 4  → AnalysisFragment
//!   ├── GeneratorSkill      → Artifact (create / refine)
//!   └── ValidatorSkill      → ValidationResult
//! ```
//!
//! **Analysis workers** (run concurrently, never fail):
//! - `StructureWorker` - Layout, size and complexity of the codebase
//! - `ChangeHistoryWorker` - Pull requests and commits
//! - `DefectHistoryWorker` - Issues and recurring defects
//! - `DependencyWorker` - Manifests and the technology stack
//!
//! **Generation loop:**
//! - `GeneratorSkill` - Create and refine the artifact
//! - `ValidatorSkill` - Score an artifact on four dimensions

pub mod llm_helpers;
pub mod prompts;

// Shared payload types
pub mod artifact_registry;

// Analysis
pub mod analysis_worker;
pub mod change_history_skill;
pub mod defect_history_skill;
pub mod dependency_skill;
pub mod structure_skill;

// Generation loop
pub mod generator_skill;
pub mod validator_skill;

pub use analysis_worker::AnalysisWorker;
pub use change_history_skill::ChangeHistoryWorker;
pub use defect_history_skill::DefectHistoryWorker;
pub use dependency_skill::DependencyWorker;
pub use generator_skill::GeneratorSkill;
pub use llm_helpers::{RetryPolicy, SkillContext};
pub use structure_skill::StructureWorker;
pub use validator_skill::ValidatorSkill;
