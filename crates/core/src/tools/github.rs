//! # GitHub Collector
//!
//! Builds a snapshot from the GitHub REST API. Repository metadata is
//! mandatory; everything else is best-effort and degrades to an empty
//! collection with a warning.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;

use super::collector::DataCollector;
use super::structured_output::preview;
use crate::error::CollectionError;
use crate::state::snapshot::{
    ChangeRecord, CommitRecord, DependencyManifest, FileEntry, IssueRecord, Snapshot,
    TargetMetadata,
};

const API_BASE: &str = "https://api.github.com";
const API_VERSION: &str = "2022-11-28";
const MAX_TREE_ENTRIES: usize = 500;
const BODY_CHARS: usize = 500;

/// Manifests probed at the repository root
pub const MANIFEST_FILES: &[&str] = &[
    "package.json",
    "requirements.txt",
    "pyproject.toml",
    "Gemfile",
    "pom.xml",
    "build.gradle",
    "go.mod",
    "Cargo.toml",
];

#[derive(Debug, Clone)]
pub struct GithubCollector {
    client: reqwest::Client,
    token: Option<String>,
    api_base: String,
    /// Cap on issues, pull requests and commits
    pub max_items: usize,
}

impl GithubCollector {
    /// Anonymous access when `token` is `None` (lower rate limits)
    pub fn new(token: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("assay/0.1")
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            client,
            token: token.filter(|t| !t.trim().is_empty()),
            api_base: API_BASE.to_string(),
            max_items: 20,
        })
    }

    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into().trim_end_matches('/').to_string();
        self
    }

    fn get(&self, path: &str, accept: &str) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .get(format!("{}{}", self.api_base, path))
            .header("Accept", accept)
            .header("X-GitHub-Api-Version", API_VERSION);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }
        builder
    }

    async fn get_json(&self, path: &str) -> Result<Value, CollectionError> {
        let response = self
            .get(path, "application/vnd.github+json")
            .send()
            .await
            .map_err(|e| CollectionError::Unavailable(e.to_string()))?;
        let response = check_status(response).await?;
        response
            .json()
            .await
            .map_err(|e| CollectionError::Unavailable(format!("invalid JSON from {}: {}", path, e)))
    }

    async fn get_raw(&self, path: &str) -> Result<String, CollectionError> {
        let response = self
            .get(path, "application/vnd.github.raw")
            .send()
            .await
            .map_err(|e| CollectionError::Unavailable(e.to_string()))?;
        let response = check_status(response).await?;
        response
            .text()
            .await
            .map_err(|e| CollectionError::Unavailable(e.to_string()))
    }

    async fn metadata(&self, owner: &str, repo: &str, target_id: &str) -> Result<TargetMetadata, CollectionError> {
        let data = self.get_json(&format!("/repos/{}/{}", owner, repo)).await?;
        Ok(TargetMetadata {
            id: target_id.to_string(),
            name: str_field(&data, "name").unwrap_or_else(|| repo.to_string()),
            full_name: str_field(&data, "full_name").unwrap_or_else(|| format!("{}/{}", owner, repo)),
            description: str_field(&data, "description"),
            language: str_field(&data, "language"),
            url: str_field(&data, "html_url"),
            default_branch: str_field(&data, "default_branch"),
            stars: data["stargazers_count"].as_u64(),
        })
    }

    async fn tree(&self, owner: &str, repo: &str) -> Result<Vec<FileEntry>, CollectionError> {
        let data = self
            .get_json(&format!("/repos/{}/{}/git/trees/HEAD?recursive=1", owner, repo))
            .await?;
        Ok(data["tree"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter(|item| item["type"] == "blob")
                    .take(MAX_TREE_ENTRIES)
                    .filter_map(|item| {
                        Some(FileEntry {
                            path: item["path"].as_str()?.to_string(),
                            size: item["size"].as_u64().unwrap_or(0),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn manifests(&self, owner: &str, repo: &str, files: &[FileEntry]) -> Vec<DependencyManifest> {
        // Only probe what the tree says exists; probe everything without a tree
        let candidates: Vec<&str> = MANIFEST_FILES
            .iter()
            .copied()
            .filter(|name| files.is_empty() || files.iter().any(|f| f.path == *name))
            .collect();

        let mut manifests = Vec::new();
        for file in candidates {
            match self
                .get_raw(&format!("/repos/{}/{}/contents/{}", owner, repo, file))
                .await
            {
                Ok(content) => manifests.push(DependencyManifest {
                    file: file.to_string(),
                    content,
                }),
                Err(e) => tracing::debug!(file, error = %e, "Manifest not fetched"),
            }
        }
        manifests
    }

    async fn issues(&self, owner: &str, repo: &str) -> Result<Vec<IssueRecord>, CollectionError> {
        let data = self
            .get_json(&format!(
                "/repos/{}/{}/issues?state=all&sort=updated&per_page={}",
                owner,
                repo,
                self.per_page()
            ))
            .await?;
        Ok(array(&data)
            .filter(|issue| issue.get("pull_request").is_none())
            .filter_map(|issue| {
                Some(IssueRecord {
                    id: issue["number"].as_u64()?.to_string(),
                    title: str_field(issue, "title")?,
                    state: str_field(issue, "state").unwrap_or_default(),
                    labels: issue["labels"]
                        .as_array()
                        .map(|labels| {
                            labels
                                .iter()
                                .filter_map(|l| l["name"].as_str().map(str::to_string))
                                .collect()
                        })
                        .unwrap_or_default(),
                    body: str_field(issue, "body").map(|b| preview(&b, BODY_CHARS)),
                })
            })
            .take(self.max_items)
            .collect())
    }

    async fn pulls(&self, owner: &str, repo: &str) -> Result<Vec<ChangeRecord>, CollectionError> {
        let data = self
            .get_json(&format!(
                "/repos/{}/{}/pulls?state=all&sort=updated&per_page={}",
                owner,
                repo,
                self.per_page()
            ))
            .await?;
        Ok(array(&data)
            .filter_map(|pr| {
                let state = if pr["merged_at"].is_string() {
                    "merged".to_string()
                } else {
                    str_field(pr, "state").unwrap_or_default()
                };
                Some(ChangeRecord {
                    id: pr["number"].as_u64()?.to_string(),
                    title: str_field(pr, "title")?,
                    state,
                    author: pr["user"]["login"].as_str().map(str::to_string),
                    body: str_field(pr, "body").map(|b| preview(&b, BODY_CHARS)),
                })
            })
            .take(self.max_items)
            .collect())
    }

    async fn commits(&self, owner: &str, repo: &str) -> Result<Vec<CommitRecord>, CollectionError> {
        let data = self
            .get_json(&format!(
                "/repos/{}/{}/commits?per_page={}",
                owner,
                repo,
                self.per_page()
            ))
            .await?;
        Ok(array(&data)
            .filter_map(|commit| {
                let message = commit["commit"]["message"].as_str().unwrap_or_default();
                Some(CommitRecord {
                    id: commit["sha"].as_str()?.to_string(),
                    summary: message.lines().next().unwrap_or_default().to_string(),
                    author: commit["commit"]["author"]["name"].as_str().map(str::to_string),
                    timestamp: commit["commit"]["author"]["date"]
                        .as_str()
                        .and_then(|d| chrono::DateTime::parse_from_rfc3339(d).ok())
                        .map(|d| d.with_timezone(&chrono::Utc)),
                })
            })
            .take(self.max_items)
            .collect())
    }

    fn per_page(&self) -> usize {
        self.max_items.clamp(1, 100)
    }
}

#[async_trait]
impl DataCollector for GithubCollector {
    #[tracing::instrument(skip(self))]
    async fn fetch(&self, target_id: &str) -> Result<Snapshot, CollectionError> {
        let (owner, repo) = parse_repo_id(target_id)
            .ok_or_else(|| CollectionError::NotFound(format!("not a GitHub repository: {}", target_id)))?;

        let target = self.metadata(&owner, &repo, target_id).await?;
        let mut snapshot = Snapshot::new(target);

        let readme_path = format!("/repos/{}/{}/readme", owner, repo);
        let (tree, readme, issues, pulls, commits) = tokio::join!(
            self.tree(&owner, &repo),
            self.get_raw(&readme_path),
            self.issues(&owner, &repo),
            self.pulls(&owner, &repo),
            self.commits(&owner, &repo),
        );

        snapshot.files = best_effort("file tree", tree);
        snapshot.readme = readme
            .map_err(|e| tracing::warn!(error = %e, "README unavailable"))
            .ok();
        snapshot.issues = best_effort("issues", issues);
        snapshot.changes = best_effort("pull requests", pulls);
        snapshot.commits = best_effort("commits", commits);
        snapshot.dependencies = self.manifests(&owner, &repo, &snapshot.files).await;

        tracing::info!(
            target = target_id,
            files = snapshot.files.len(),
            issues = snapshot.issues.len(),
            changes = snapshot.changes.len(),
            commits = snapshot.commits.len(),
            manifests = snapshot.dependencies.len(),
            "Repository collected"
        );
        Ok(snapshot)
    }

    fn name(&self) -> &str {
        "github"
    }
}

/// Accepts `owner/repo`, `github.com/owner/repo` or a full URL
pub fn parse_repo_id(target: &str) -> Option<(String, String)> {
    let trimmed = target.trim().trim_end_matches('/');
    let path = match trimmed.find("github.com/") {
        Some(at) => &trimmed[at + "github.com/".len()..],
        None if trimmed.contains("://") => return None,
        None => trimmed,
    };
    let mut parts = path.split('/').filter(|p| !p.is_empty());
    let owner = parts.next()?;
    let repo = parts.next()?.trim_end_matches(".git");
    if owner.is_empty() || repo.is_empty() {
        return None;
    }
    Some((owner.to_string(), repo.to_string()))
}

/// Map a non-success response to a collection error
pub fn classify_status(status: u16, rate_remaining: Option<u64>, retry_after: Option<u64>, body: &str) -> CollectionError {
    match status {
        404 => CollectionError::NotFound(preview(body, 200)),
        401 => CollectionError::AuthFailure(preview(body, 200)),
        429 => CollectionError::RateLimited { retry_after },
        403 if rate_remaining == Some(0) => CollectionError::RateLimited { retry_after },
        403 => CollectionError::AuthFailure(preview(body, 200)),
        other => CollectionError::Unavailable(format!("HTTP {}: {}", other, preview(body, 200))),
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, CollectionError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let header = |name: &str| {
        response
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
    };
    let remaining = header("x-ratelimit-remaining");
    let retry_after = header("retry-after").or_else(|| {
        header("x-ratelimit-reset")
            .map(|reset| reset.saturating_sub(chrono::Utc::now().timestamp().max(0) as u64))
    });
    let code = status.as_u16();
    let body = if status == StatusCode::NOT_FOUND {
        response.url().path().to_string()
    } else {
        response.text().await.unwrap_or_default()
    };
    Err(classify_status(code, remaining, retry_after, &body))
}

fn best_effort<T>(what: &str, result: Result<Vec<T>, CollectionError>) -> Vec<T> {
    result.unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Could not collect {}; continuing without", what);
        Vec::new()
    })
}

fn array(value: &Value) -> impl Iterator<Item = &Value> {
    value.as_array().into_iter().flatten()
}

fn str_field(value: &Value, key: &str) -> Option<String> {
    value[key].as_str().map(str::to_string)
}
