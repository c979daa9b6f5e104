//! # Message Bus
//!
//! Append-only audit log of every inter-component exchange, owned per
//! conversation. Each conversation is its own ordered arena of messages with
//! an id index, so concurrent runs never share a sequence and a finished run
//! can be released without touching the others.
//!
//! The only mutation is append, guarded by one mutex. A poisoned lock is
//! recovered because an append either completes or leaves the log untouched.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;

use super::events::{new_message_id, Envelope, Message, MessageKind};

/// Capacity of the live feed used by streaming subscribers
const LIVE_FEED_CAPACITY: usize = 1024;

/// Per-conversation log
#[derive(Debug, Default)]
struct ConversationLog {
    messages: Vec<Message>,
    by_id: HashMap<String, usize>,
    closed_at: Option<DateTime<Utc>>,
}

impl ConversationLog {
    fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.messages.last().map(|m| m.timestamp)
    }
}

/// Summary of one conversation
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ConversationStats {
    pub conversation_id: String,
    pub total_messages: usize,
    /// Count per message kind
    pub by_kind: BTreeMap<String, usize>,
    /// Every sender and recipient seen
    pub participants: BTreeSet<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub duration_ms: i64,
    pub closed: bool,
}

/// Conversation-keyed append-only message log
pub struct MessageBus {
    conversations: Mutex<HashMap<String, ConversationLog>>,
    live: Option<broadcast::Sender<Message>>,
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageBus {
    /// Create a bus without a live feed
    pub fn new() -> Self {
        Self {
            conversations: Mutex::new(HashMap::new()),
            live: None,
        }
    }

    /// Create a bus that also publishes every appended message to subscribers
    pub fn with_live_feed() -> Self {
        let (tx, _) = broadcast::channel(LIVE_FEED_CAPACITY);
        Self {
            conversations: Mutex::new(HashMap::new()),
            live: Some(tx),
        }
    }

    /// Subscribe to the live feed. `None` when the bus was built without one.
    pub fn subscribe(&self) -> Option<broadcast::Receiver<Message>> {
        self.live.as_ref().map(|tx| tx.subscribe())
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ConversationLog>> {
        self.conversations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Open a conversation. Opening an existing one is a no-op.
    pub fn open_conversation(&self, conversation_id: &str) {
        self.lock()
            .entry(conversation_id.to_string())
            .or_default();
    }

    /// Mark a conversation closed. Its history stays readable.
    pub fn close_conversation(&self, conversation_id: &str) {
        if let Some(log) = self.lock().get_mut(conversation_id) {
            if log.closed_at.is_none() {
                log.closed_at = Some(Utc::now());
            }
        }
    }

    /// Whether the conversation exists and has not been closed
    pub fn is_open(&self, conversation_id: &str) -> bool {
        self.lock()
            .get(conversation_id)
            .map_or(false, |log| log.closed_at.is_none())
    }

    /// Append a message and return it fully populated.
    pub fn record(
        &self,
        sender: &str,
        recipient: &str,
        kind: MessageKind,
        payload: serde_json::Value,
        conversation_id: &str,
    ) -> Message {
        self.record_envelope(
            conversation_id,
            Envelope::new(sender, recipient, kind).with_payload(payload),
        )
    }

    /// Append a prepared envelope.
    ///
    /// Unknown conversations are opened implicitly. Timestamps are clamped so
    /// a conversation's history never goes backwards.
    pub fn record_envelope(&self, conversation_id: &str, envelope: Envelope) -> Message {
        let mut conversations = self.lock();
        let log = conversations
            .entry(conversation_id.to_string())
            .or_default();

        if log.closed_at.is_some() {
            tracing::warn!(
                conversation_id,
                kind = envelope.kind.as_str(),
                "Recording on a closed conversation"
            );
        }

        let now = Utc::now();
        let timestamp = match log.last_timestamp() {
            Some(last) if last > now => last,
            _ => now,
        };

        let message = Message {
            id: new_message_id(),
            sequence: log.messages.len() as u64,
            sender: envelope.sender,
            recipient: envelope.recipient,
            kind: envelope.kind,
            payload: envelope.payload,
            conversation_id: conversation_id.to_string(),
            timestamp,
            in_response_to: envelope.in_response_to,
        };
        log.by_id.insert(message.id.clone(), log.messages.len());
        log.messages.push(message.clone());

        // Published under the lock so subscribers see append order.
        // No subscribers is fine
        if let Some(tx) = &self.live {
            let _ = tx.send(message.clone());
        }
        message
    }

    /// Full history of a conversation in append order.
    pub fn history(&self, conversation_id: &str) -> Vec<Message> {
        self.lock()
            .get(conversation_id)
            .map(|log| log.messages.clone())
            .unwrap_or_default()
    }

    /// History filtered by kind and/or participant (sender or recipient).
    pub fn history_filtered(
        &self,
        conversation_id: &str,
        kind: Option<MessageKind>,
        participant: Option<&str>,
    ) -> Vec<Message> {
        self.lock()
            .get(conversation_id)
            .map(|log| {
                log.messages
                    .iter()
                    .filter(|m| kind.map_or(true, |k| m.kind == k))
                    .filter(|m| {
                        participant.map_or(true, |p| m.sender == p || m.recipient == p)
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Look up one message by id.
    pub fn get(&self, conversation_id: &str, message_id: &str) -> Option<Message> {
        let conversations = self.lock();
        let log = conversations.get(conversation_id)?;
        log.by_id
            .get(message_id)
            .and_then(|&idx| log.messages.get(idx))
            .cloned()
    }

    pub fn stats(&self, conversation_id: &str) -> Option<ConversationStats> {
        let conversations = self.lock();
        let log = conversations.get(conversation_id)?;

        let mut by_kind = BTreeMap::new();
        let mut participants = BTreeSet::new();
        for message in &log.messages {
            *by_kind.entry(message.kind.as_str().to_string()).or_insert(0) += 1;
            participants.insert(message.sender.clone());
            participants.insert(message.recipient.clone());
        }

        let started_at = log.messages.first().map(|m| m.timestamp);
        let last_message_at = log.last_timestamp();
        let duration_ms = match (started_at, last_message_at) {
            (Some(start), Some(end)) => (end - start).num_milliseconds(),
            _ => 0,
        };

        Some(ConversationStats {
            conversation_id: conversation_id.to_string(),
            total_messages: log.messages.len(),
            by_kind,
            participants,
            started_at,
            last_message_at,
            duration_ms,
            closed: log.closed_at.is_some(),
        })
    }

    /// Ids of all conversations currently held
    pub fn conversations(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Remove a conversation and hand back its history.
    pub fn release(&self, conversation_id: &str) -> Option<Vec<Message>> {
        self.lock()
            .remove(conversation_id)
            .map(|log| log.messages)
    }
}
