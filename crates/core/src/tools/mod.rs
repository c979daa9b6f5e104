//! # Deterministic Tools
//!
//! Code that never talks to the generative backend.
//!
//! ## Modules
//!
//! - `structured_output` - Extract one JSON object from free-form model text
//! - `synthesizer` - Merge analysis fragments into one report
//! - `collector` - `DataCollector` trait, static snapshots, target dispatch
//! - `github` - GitHub REST collector
//! - `local_repo` - Checkout-on-disk collector (ignore + git2)

pub mod collector;
pub mod github;
pub mod local_repo;
pub mod structured_output;
pub mod synthesizer;

pub use collector::{collector_for, DataCollector, StaticCollector};
pub use github::GithubCollector;
pub use local_repo::LocalRepoCollector;
