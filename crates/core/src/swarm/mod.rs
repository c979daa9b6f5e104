//! # Swarm Orchestration
//!
//! Runs the generation pipeline and records everything on the message bus.
//!
//! ## Pipeline Flow
//!
//! ```text
//! Collector → [Structure | ChangeHistory | DefectHistory | Dependency] → Synthesizer
//!           → Generator → Validator ⟷ Generator (refine) → Report
//! ```

pub mod config;
pub mod coordinator;
pub mod events;
pub mod fan_out;
pub mod message_bus;
pub mod metrics;
pub mod pipeline;
pub mod report;

pub use config::OrchestratorConfig;
pub use coordinator::{default_workers, Orchestrator};
pub use events::{Envelope, Message, MessageKind, BROADCAST};
pub use message_bus::{ConversationStats, MessageBus};
pub use metrics::RunMetrics;
pub use pipeline::{Pipeline, PipelineStage};
pub use report::{GenerationReport, GenerationRequest, Outcome, StageDegradation};
