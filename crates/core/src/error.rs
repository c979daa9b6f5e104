//! # Error Taxonomy
//!
//! Typed errors for the conditions a run can hit. Only [`CollectionError`]
//! and an exhausted [`GenerationFailure`] ever reach the caller as
//! [`PipelineError`]; worker degradation and validation failure are
//! recorded on the message bus and folded into the report instead.

use std::time::Duration;
use thiserror::Error;

/// Failure of the external data collector. Always fatal for the run.
#[derive(Debug, Error)]
pub enum CollectionError {
    #[error("target not found: {0}")]
    NotFound(String),
    #[error("rate limited by upstream{}", .retry_after.map(|s| format!(" (retry after {}s)", s)).unwrap_or_default())]
    RateLimited { retry_after: Option<u64> },
    #[error("authentication failed: {0}")]
    AuthFailure(String),
    #[error("collector unavailable: {0}")]
    Unavailable(String),
}

/// Failure of a single generative backend call.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum BackendError {
    #[error("backend call timed out after {0:?}")]
    Timeout(Duration),
    #[error("backend quota exceeded: {0}")]
    QuotaExceeded(String),
    #[error("backend service error{}: {message}", .status.map(|s| format!(" ({})", s)).unwrap_or_default())]
    ServiceError { status: Option<u16>, message: String },
}

impl BackendError {
    pub fn service(message: impl Into<String>) -> Self {
        BackendError::ServiceError {
            status: None,
            message: message.into(),
        }
    }

    /// Transient errors are eligible for retry with backoff.
    ///
    /// Timeouts are terminal for the attempt, quota errors will not clear
    /// within a backoff window, and 4xx responses are caller mistakes.
    pub fn is_transient(&self) -> bool {
        match self {
            BackendError::ServiceError { status, .. } => match status {
                None => true,
                Some(code) => *code >= 500,
            },
            BackendError::Timeout(_) | BackendError::QuotaExceeded(_) => false,
        }
    }
}

/// Structured output could not be recovered from a raw response.
#[derive(Debug, Clone, Error)]
#[error("could not parse structured output: {reason}")]
pub struct ParseFailure {
    pub reason: String,
    /// Raw response, kept so callers can degrade with context
    pub raw: String,
}

/// The generator exhausted its retry budget.
#[derive(Debug, Clone, Error)]
#[error("generation failed after {attempts} attempt(s): {reason}")]
pub struct GenerationFailure {
    pub attempts: u32,
    pub reason: String,
}

/// Hard failures returned from [`crate::swarm::Orchestrator::generate`].
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("collection failed for '{target_id}': {source}")]
    Collection {
        target_id: String,
        #[source]
        source: CollectionError,
    },
    #[error(transparent)]
    Generation(#[from] GenerationFailure),
}

impl PipelineError {
    /// Stable short label used in audit messages and persisted failures.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Collection { .. } => "collection_error",
            PipelineError::Generation(_) => "generation_failure",
        }
    }
}
