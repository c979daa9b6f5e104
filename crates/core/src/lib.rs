//! # Assay Core
//!
//! Orchestration engine that turns a code repository into a validated,
//! repository-grounded problem statement.
//!
//! ## Architecture
//!
//! - `tools/` - Collectors, structured output parsing, synthesis
//! - `skills/` - Analysis workers, generator and validator
//! - `swarm/` - Message bus, pipeline state machine, orchestrator
//! - `state/` - Snapshot model, run store, transcripts
//! - `models` / `backend` - LLM provider configuration and HTTP backend
//!
//! ## Usage
//!
//! ```rust,ignore
//! use assay_core::swarm::{GenerationRequest, Orchestrator, OrchestratorConfig};
//!
//! let config = OrchestratorConfig::load(None)?;
//! let backend = Arc::new(HttpBackend::new());
//! let collector = collector_for("acme/widgets", std::env::var("GITHUB_TOKEN").ok())?;
//! let orchestrator = Orchestrator::new(config, collector, backend);
//! let report = orchestrator.generate(GenerationRequest::new("acme/widgets")).await?;
//! ```

pub mod backend;
pub mod error;
pub mod models;
pub mod skills;
pub mod state;
pub mod swarm;
pub mod tools;

#[cfg(test)]
mod test_support;
