//! # Data Collectors
//!
//! Turn a target identifier into a [`Snapshot`]. The orchestrator calls a
//! collector exactly once per run; a collector error is the only way a run
//! fails before analysis starts.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use super::github::GithubCollector;
use super::local_repo::LocalRepoCollector;
use crate::error::CollectionError;
use crate::state::snapshot::Snapshot;

#[async_trait]
pub trait DataCollector: Send + Sync {
    async fn fetch(&self, target_id: &str) -> Result<Snapshot, CollectionError>;

    fn name(&self) -> &str;
}

/// Serves pre-built snapshots
#[derive(Debug, Clone, Default)]
pub struct StaticCollector {
    snapshots: HashMap<String, Snapshot>,
    /// Served for any id not in `snapshots`
    fallback: Option<Snapshot>,
}

impl StaticCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `snapshot` under its own target id
    pub fn with_snapshot(mut self, snapshot: Snapshot) -> Self {
        self.snapshots.insert(snapshot.target.id.clone(), snapshot);
        self
    }

    /// Serve `snapshot` for every target id
    pub fn single(snapshot: Snapshot) -> Self {
        Self {
            snapshots: HashMap::new(),
            fallback: Some(snapshot),
        }
    }

    /// Load a snapshot saved as JSON
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read snapshot {}", path.display()))?;
        let snapshot: Snapshot = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse snapshot {}", path.display()))?;
        Ok(Self::single(snapshot))
    }
}

#[async_trait]
impl DataCollector for StaticCollector {
    async fn fetch(&self, target_id: &str) -> Result<Snapshot, CollectionError> {
        self.snapshots
            .get(target_id)
            .or(self.fallback.as_ref())
            .cloned()
            .ok_or_else(|| CollectionError::NotFound(target_id.to_string()))
    }

    fn name(&self) -> &str {
        "static"
    }
}

/// Pick a collector for a target: an existing directory is read from disk,
/// a `.json` file is a saved snapshot, anything else goes to GitHub.
pub fn collector_for(target: &str, github_token: Option<String>) -> Result<Arc<dyn DataCollector>> {
    let path = Path::new(target);
    if path.is_dir() {
        return Ok(Arc::new(LocalRepoCollector::new()));
    }
    if path.is_file() && path.extension().and_then(|e| e.to_str()) == Some("json") {
        return Ok(Arc::new(StaticCollector::from_file(path)?));
    }
    Ok(Arc::new(GithubCollector::new(github_token)?))
}
