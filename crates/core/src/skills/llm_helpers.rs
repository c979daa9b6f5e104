//! # LLM Helpers
//!
//! Shared plumbing every skill uses to talk to the generative backend:
//! per-call timeout, bounded exponential backoff on transient errors, call
//! accounting, and a notification on the message bus for each call.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::backend::{CompletionRequest, GenerativeBackend};
use crate::error::BackendError;
use crate::models::ModelConfig;
use crate::swarm::events::{Envelope, MessageKind};
use crate::swarm::message_bus::MessageBus;

/// Backoff policy for transient backend errors
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            initial_backoff_ms: 500,
            max_backoff_ms: 4_000,
        }
    }
}

impl RetryPolicy {
    /// Delay after the given failed attempt (1-based), doubling and capped
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let millis = self
            .initial_backoff_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_backoff_ms);
        Duration::from_millis(millis)
    }

    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// Everything a skill needs for one run
#[derive(Clone)]
pub struct SkillContext {
    pub backend: Arc<dyn GenerativeBackend>,
    pub bus: Arc<MessageBus>,
    pub conversation_id: String,
    /// Model resolved for the agent holding this context
    pub model: ModelConfig,
    pub retry: RetryPolicy,
    /// Per-call deadline
    pub timeout: Duration,
    /// Shared count of backend calls made in this run
    pub backend_calls: Arc<AtomicU32>,
}

impl SkillContext {
    pub fn new(
        backend: Arc<dyn GenerativeBackend>,
        bus: Arc<MessageBus>,
        conversation_id: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            bus,
            conversation_id: conversation_id.into(),
            model: ModelConfig::default(),
            retry: RetryPolicy::default(),
            timeout: Duration::from_secs(120),
            backend_calls: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Same run, different agent model and deadline
    pub fn for_agent(&self, model: ModelConfig, timeout: Duration) -> Self {
        Self {
            model,
            timeout,
            ..self.clone()
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn calls_made(&self) -> u32 {
        self.backend_calls.load(Ordering::SeqCst)
    }

    /// Record a message from `sender` in this run's conversation
    pub fn notify(&self, sender: &str, kind: MessageKind, payload: serde_json::Value) {
        self.bus.record_envelope(
            &self.conversation_id,
            Envelope::new(sender, "orchestrator", kind).with_payload(payload),
        );
    }
}

/// Successful completion with the attempts it took
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub attempts: u32,
}

/// Final error after the retry budget was spent (or a terminal error)
#[derive(Debug, Clone)]
pub struct CallError {
    pub error: BackendError,
    pub attempts: u32,
}

/// One backend call under the context's timeout.
pub async fn call_backend(
    ctx: &SkillContext,
    caller: &str,
    system: &str,
    prompt: &str,
    temperature: f32,
) -> Result<String, BackendError> {
    let request = CompletionRequest {
        caller: caller.to_string(),
        model: ctx.model.clone(),
        system: system.to_string(),
        prompt: prompt.to_string(),
        temperature,
        timeout: ctx.timeout,
    };

    ctx.backend_calls.fetch_add(1, Ordering::SeqCst);
    let started = std::time::Instant::now();
    let result = match tokio::time::timeout(ctx.timeout, ctx.backend.complete(&request)).await {
        Ok(result) => result,
        Err(_) => Err(BackendError::Timeout(ctx.timeout)),
    };

    let elapsed_ms = started.elapsed().as_millis() as u64;
    match &result {
        Ok(text) => {
            tracing::debug!(caller, elapsed_ms, chars = text.len(), "Backend call completed");
            ctx.notify(
                caller,
                MessageKind::Notification,
                json!({
                    "event": "backend_call",
                    "model": ctx.model.model,
                    "ok": true,
                    "elapsed_ms": elapsed_ms,
                    "response_chars": text.len(),
                }),
            );
        }
        Err(e) => {
            tracing::warn!(caller, elapsed_ms, error = %e, "Backend call failed");
            ctx.notify(
                caller,
                MessageKind::Notification,
                json!({
                    "event": "backend_call",
                    "model": ctx.model.model,
                    "ok": false,
                    "elapsed_ms": elapsed_ms,
                    "error": e.to_string(),
                }),
            );
        }
    }
    result
}

/// Call the backend, retrying transient errors with backoff.
///
/// Timeouts and quota errors end the call immediately.
pub async fn complete_with_retry(
    ctx: &SkillContext,
    caller: &str,
    system: &str,
    prompt: &str,
    temperature: f32,
) -> Result<Completion, CallError> {
    let max = ctx.retry.attempts();
    let mut attempt = 1;
    loop {
        match call_backend(ctx, caller, system, prompt, temperature).await {
            Ok(text) => {
                return Ok(Completion {
                    text,
                    attempts: attempt,
                })
            }
            Err(error) if error.is_transient() && attempt < max => {
                let delay = ctx.retry.backoff(attempt);
                tracing::info!(
                    caller,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying after transient backend error"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(error) => {
                return Err(CallError {
                    error,
                    attempts: attempt,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{Script, ScriptedBackend};

    fn context(backend: ScriptedBackend) -> SkillContext {
        SkillContext::new(Arc::new(backend), Arc::new(MessageBus::new()), "conv_test")
            .for_agent(ModelConfig::default(), Duration::from_secs(5))
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_backoff_ms: 100,
            max_backoff_ms: 350,
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(350));
        assert_eq!(policy.backoff(40), Duration::from_millis(350));
        assert_eq!(RetryPolicy { max_attempts: 0, ..policy }.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_error_retried_once() {
        let backend = ScriptedBackend::new().script(
            "caller",
            vec![Script::Fail(BackendError::service("reset")), Script::Reply("ok".into())],
        );
        let ctx = context(backend);
        let completion = complete_with_retry(&ctx, "caller", "sys", "prompt", 0.3)
            .await
            .unwrap();
        assert_eq!(completion.text, "ok");
        assert_eq!(completion.attempts, 2);
        assert_eq!(ctx.calls_made(), 2);
        assert_eq!(ctx.bus.history("conv_test").len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_budget_is_bounded() {
        let backend = ScriptedBackend::new().script(
            "caller",
            vec![Script::Fail(BackendError::ServiceError {
                status: Some(503),
                message: "down".into(),
            })],
        );
        let ctx = context(backend);
        let err = complete_with_retry(&ctx, "caller", "sys", "prompt", 0.3)
            .await
            .unwrap_err();
        assert_eq!(err.attempts, 2);
        assert_eq!(ctx.calls_made(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_terminal() {
        let backend = ScriptedBackend::new().script("caller", vec![Script::Hang]);
        let ctx = context(backend);
        let err = complete_with_retry(&ctx, "caller", "sys", "prompt", 0.3)
            .await
            .unwrap_err();
        assert_eq!(err.error, BackendError::Timeout(Duration::from_secs(5)));
        assert_eq!(err.attempts, 1);
    }

    #[tokio::test]
    async fn test_quota_is_not_retried() {
        let backend = ScriptedBackend::new().script(
            "caller",
            vec![Script::Fail(BackendError::QuotaExceeded("daily".into()))],
        );
        let ctx = context(backend);
        let err = complete_with_retry(&ctx, "caller", "sys", "prompt", 0.3)
            .await
            .unwrap_err();
        assert_eq!(err.attempts, 1);
    }
}
