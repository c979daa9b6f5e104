//! # Target Snapshot
//!
//! Immutable description of the analysis target, produced once per run by a
//! [`DataCollector`](crate::tools::collector::DataCollector) and shared
//! read-only (behind an `Arc`) with every worker.
//!
//! Every sub-collection is optional on the wire and defaults to empty.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identity and headline facts about the target
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TargetMetadata {
    /// Identifier the collector was asked for (`owner/repo`, a path...)
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub default_branch: Option<String>,
    #[serde(default)]
    pub stars: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileEntry {
    pub path: String,
    #[serde(default)]
    pub size: u64,
}

/// Raw contents of a dependency manifest (Cargo.toml, package.json...)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DependencyManifest {
    pub file: String,
    pub content: String,
}

/// A proposed change (pull request, patch)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChangeRecord {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IssueRecord {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub body: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommitRecord {
    pub id: String,
    pub summary: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Everything the analysis workers may look at
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Snapshot {
    pub target: TargetMetadata,
    #[serde(default)]
    pub readme: Option<String>,
    #[serde(default)]
    pub files: Vec<FileEntry>,
    #[serde(default)]
    pub dependencies: Vec<DependencyManifest>,
    #[serde(default)]
    pub changes: Vec<ChangeRecord>,
    #[serde(default)]
    pub issues: Vec<IssueRecord>,
    #[serde(default)]
    pub commits: Vec<CommitRecord>,
    #[serde(default = "Utc::now")]
    pub collected_at: DateTime<Utc>,
}

impl Snapshot {
    /// Empty snapshot for a target; collectors fill in what they find
    pub fn new(target: TargetMetadata) -> Self {
        Self {
            target,
            readme: None,
            files: Vec::new(),
            dependencies: Vec::new(),
            changes: Vec::new(),
            issues: Vec::new(),
            commits: Vec::new(),
            collected_at: Utc::now(),
        }
    }

    pub fn display_name(&self) -> &str {
        if !self.target.full_name.is_empty() {
            &self.target.full_name
        } else if !self.target.name.is_empty() {
            &self.target.name
        } else {
            &self.target.id
        }
    }

    /// Counts of each sub-collection, for logs and the run report
    pub fn summary(&self) -> serde_json::Value {
        serde_json::json!({
            "target": self.display_name(),
            "files": self.files.len(),
            "dependency_manifests": self.dependencies.len(),
            "changes": self.changes.len(),
            "issues": self.issues.len(),
            "commits": self.commits.len(),
            "has_readme": self.readme.is_some(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_json_defaults_collections() {
        let snapshot: Snapshot = serde_json::from_str(r#"{"target": {"id": "acme/widgets"}}"#).unwrap();
        assert_eq!(snapshot.target.id, "acme/widgets");
        assert!(snapshot.issues.is_empty());
        assert!(snapshot.changes.is_empty());
        assert!(snapshot.readme.is_none());
        assert_eq!(snapshot.display_name(), "acme/widgets");
    }

    #[test]
    fn test_summary_counts() {
        let mut snapshot = Snapshot::new(TargetMetadata {
            id: "x".into(),
            full_name: "acme/x".into(),
            ..Default::default()
        });
        snapshot.files.push(FileEntry {
            path: "src/main.rs".into(),
            size: 10,
        });
        let summary = snapshot.summary();
        assert_eq!(summary["target"], "acme/x");
        assert_eq!(summary["files"], 1);
        assert_eq!(summary["issues"], 0);
    }
}
