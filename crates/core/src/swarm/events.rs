//! # Bus Messages
//!
//! Message types recorded on the [`MessageBus`](super::message_bus::MessageBus).
//! Payloads are opaque JSON; the bus never inspects them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Kind of bus message
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// A component asks another to do work
    Request,
    /// Reply to a request
    Response,
    /// Informational note (backend call completed, retry scheduled...)
    Notification,
    /// One-to-many announcement (synthesized report)
    Broadcast,
    /// Orchestrator moved between pipeline stages
    StageTransition,
    /// Generator produced an artifact version
    ArtifactProduced,
    /// Validator scored an artifact version
    ValidationRecorded,
    /// An analysis worker was replaced by a degraded fragment
    WorkerDegradation,
    /// The validator could not score an artifact
    ValidationFailure,
    /// Run lifecycle
    RunStarted,
    RunCompleted,
    RunFailed,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Request => "request",
            MessageKind::Response => "response",
            MessageKind::Notification => "notification",
            MessageKind::Broadcast => "broadcast",
            MessageKind::StageTransition => "stage_transition",
            MessageKind::ArtifactProduced => "artifact_produced",
            MessageKind::ValidationRecorded => "validation_recorded",
            MessageKind::WorkerDegradation => "worker_degradation",
            MessageKind::ValidationFailure => "validation_failure",
            MessageKind::RunStarted => "run_started",
            MessageKind::RunCompleted => "run_completed",
            MessageKind::RunFailed => "run_failed",
        }
    }

    /// Kinds that mark a stage as degraded in the final report
    pub fn is_degradation(&self) -> bool {
        matches!(
            self,
            MessageKind::WorkerDegradation | MessageKind::ValidationFailure
        )
    }
}

/// Recipient used for one-to-many messages
pub const BROADCAST: &str = "*";

/// A recorded inter-component message
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    /// Unique message ID (`msg_<ulid>`)
    pub id: String,
    /// Position in the conversation, starting at 0
    pub sequence: u64,
    pub sender: String,
    pub recipient: String,
    pub kind: MessageKind,
    #[serde(default)]
    pub payload: serde_json::Value,
    pub conversation_id: String,
    pub timestamp: DateTime<Utc>,
    /// Request this message answers, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_response_to: Option<String>,
}

/// Fields a caller supplies; the bus fills in id, sequence and timestamp.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub sender: String,
    pub recipient: String,
    pub kind: MessageKind,
    pub payload: serde_json::Value,
    pub in_response_to: Option<String>,
}

impl Envelope {
    pub fn new(sender: &str, recipient: &str, kind: MessageKind) -> Self {
        Self {
            sender: sender.to_string(),
            recipient: recipient.to_string(),
            kind,
            payload: serde_json::Value::Null,
            in_response_to: None,
        }
    }

    /// Add payload to the envelope
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// Mark the envelope as a reply to `request_id`
    pub fn replying_to(mut self, request_id: &str) -> Self {
        self.in_response_to = Some(request_id.to_string());
        self
    }
}

/// Generate a message ID
pub fn new_message_id() -> String {
    format!("msg_{}", Ulid::new().to_string().to_lowercase())
}

/// Generate a conversation ID
pub fn new_conversation_id() -> String {
    format!("conv_{}", Ulid::new().to_string().to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_builder() {
        let envelope = Envelope::new("validator", "orchestrator", MessageKind::Response)
            .with_payload(serde_json::json!({"score": 90}))
            .replying_to("msg_01");

        assert_eq!(envelope.sender, "validator");
        assert_eq!(envelope.in_response_to.as_deref(), Some("msg_01"));
        assert_eq!(envelope.payload["score"], 90);
    }

    #[test]
    fn test_ids_are_prefixed_and_unique() {
        let a = new_message_id();
        let b = new_message_id();
        assert!(a.starts_with("msg_"));
        assert!(new_conversation_id().starts_with("conv_"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_kind_serialization() {
        let json = serde_json::to_string(&MessageKind::WorkerDegradation).unwrap();
        assert_eq!(json, "\"worker_degradation\"");
        assert_eq!(MessageKind::WorkerDegradation.as_str(), "worker_degradation");
        assert!(MessageKind::ValidationFailure.is_degradation());
        assert!(!MessageKind::Broadcast.is_degradation());
    }
}
