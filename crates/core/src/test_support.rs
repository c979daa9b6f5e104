//! Test doubles shared by the unit tests of this crate.

use async_trait::async_trait;
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use crate::backend::{CompletionRequest, GenerativeBackend};
use crate::error::BackendError;
use crate::state::snapshot::{
    DependencyManifest, FileEntry, IssueRecord, Snapshot, TargetMetadata,
};

/// One scripted backend reaction
#[derive(Debug, Clone)]
pub enum Script {
    Reply(String),
    Fail(BackendError),
    /// Never answers; the caller's timeout has to fire
    Hang,
    /// Answer after a delay
    Delayed(Duration, String),
}

/// Backend that replays per-caller scripts. The last step repeats forever.
#[derive(Default)]
pub struct ScriptedBackend {
    scripts: Mutex<HashMap<String, VecDeque<Script>>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(self, caller: &str, steps: Vec<Script>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(caller.to_string(), steps.into());
        self
    }

    pub fn calls_for(&self, caller: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.caller == caller)
            .count()
    }

    pub fn requests_for(&self, caller: &str) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.caller == caller)
            .cloned()
            .collect()
    }

    fn next_step(&self, caller: &str) -> Option<Script> {
        let mut scripts = self.scripts.lock().unwrap();
        let queue = scripts.get_mut(caller)?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

#[async_trait]
impl GenerativeBackend for ScriptedBackend {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, BackendError> {
        self.requests.lock().unwrap().push(request.clone());
        match self.next_step(&request.caller) {
            Some(Script::Reply(text)) => Ok(text),
            Some(Script::Fail(err)) => Err(err),
            Some(Script::Hang) => std::future::pending().await,
            Some(Script::Delayed(delay, text)) => {
                tokio::time::sleep(delay).await;
                Ok(text)
            }
            None => Err(BackendError::ServiceError {
                status: Some(404),
                message: format!("no script for caller '{}'", request.caller),
            }),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// A small but complete snapshot
pub fn sample_snapshot() -> Snapshot {
    let mut snapshot = Snapshot::new(TargetMetadata {
        id: "acme/widgets".into(),
        name: "widgets".into(),
        full_name: "acme/widgets".into(),
        description: Some("Widget inventory service".into()),
        language: Some("Rust".into()),
        ..Default::default()
    });
    snapshot.readme = Some("# Widgets\nTracks widget stock.".into());
    snapshot.files = vec![
        FileEntry {
            path: "src/main.rs".into(),
            size: 1200,
        },
        FileEntry {
            path: "Cargo.toml".into(),
            size: 300,
        },
    ];
    snapshot.dependencies = vec![DependencyManifest {
        file: "Cargo.toml".into(),
        content: "[dependencies]\naxum = \"0.7\"\ntokio = \"1\"".into(),
    }];
    snapshot.issues = vec![IssueRecord {
        id: "12".into(),
        title: "Stock count drifts under load".into(),
        state: "open".into(),
        labels: vec!["bug".into()],
        body: None,
    }];
    snapshot
}

/// Snapshot with every optional sub-collection empty
pub fn bare_snapshot() -> Snapshot {
    Snapshot::new(TargetMetadata {
        id: "acme/empty".into(),
        ..Default::default()
    })
}

/// A well-formed worker reply
pub fn worker_reply(confidence: f64, opportunities: &[&str]) -> String {
    json!({
        "confidence": confidence,
        "findings": {"summary": "looks reasonable"},
        "suggested_opportunities": opportunities,
        "complexity": "medium",
    })
    .to_string()
}

/// A well-formed problem statement reply, fenced like real model output
pub fn problem_reply(title: &str, description: &str) -> String {
    let body = json!({
        "title": title,
        "description": description,
        "business_context": "Inventory accuracy matters",
        "requirements": ["Handle concurrent updates"],
        "acceptance_criteria": ["Counts never go negative"],
        "starter_code": [{"filename": "src/lib.rs", "content": "", "description": "entry"}],
        "hints": ["Think about atomicity"],
        "estimated_time": "2 hours",
        "difficulty": "intermediate",
        "category": "backend",
        "tech_stack": ["rust", "axum"],
        "evaluation_rubric": [{"criterion": "Correctness", "points": 50, "description": ""}],
    });
    format!("Here is the problem:\n```json\n{}\n```", body)
}

/// A validator reply with the same score on every dimension
pub fn validation_reply(score: f64) -> String {
    json!({
        "feasibility": score,
        "clarity": score,
        "technical_fit": score,
        "educational_value": score,
        "issues": ["Requirements are vague"],
        "suggestions": ["Add concrete limits"],
        "feedback": {"strengths": ["Relevant"], "weaknesses": ["Too broad"], "improvements": []},
    })
    .to_string()
}
