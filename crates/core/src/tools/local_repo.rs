//! # Local Repository Collector
//!
//! Snapshot of a checkout on disk: files honoring `.gitignore`, the README,
//! root dependency manifests and, when the directory is a git repository,
//! recent commits. Issues and pull requests stay empty.

use async_trait::async_trait;
use git2::Repository;
use std::path::{Path, PathBuf};

use super::collector::DataCollector;
use super::github::MANIFEST_FILES;
use crate::error::CollectionError;
use crate::state::snapshot::{
    CommitRecord, DependencyManifest, FileEntry, Snapshot, TargetMetadata,
};

const MAX_FILES: usize = 500;
const MAX_MANIFEST_BYTES: u64 = 64 * 1024;

#[derive(Debug, Clone)]
pub struct LocalRepoCollector {
    pub max_commits: usize,
}

impl Default for LocalRepoCollector {
    fn default() -> Self {
        Self { max_commits: 20 }
    }
}

impl LocalRepoCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocking collection; `fetch` runs this on the blocking pool
    pub fn collect(&self, root: &Path) -> Result<Snapshot, CollectionError> {
        if !root.is_dir() {
            return Err(CollectionError::NotFound(root.display().to_string()));
        }
        let root = root
            .canonicalize()
            .map_err(|e| CollectionError::Unavailable(format!("{}: {}", root.display(), e)))?;

        let name = root
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| root.display().to_string());
        let mut snapshot = Snapshot::new(TargetMetadata {
            id: root.display().to_string(),
            name: name.clone(),
            full_name: name,
            ..Default::default()
        });

        snapshot.files = walk_files(&root);
        snapshot.readme = read_readme(&root);
        snapshot.dependencies = read_manifests(&root);
        snapshot.target.language = dominant_language(&snapshot.files);

        match Repository::open(&root) {
            Ok(repo) => {
                snapshot.target.default_branch = repo
                    .head()
                    .ok()
                    .and_then(|head| head.shorthand().map(str::to_string));
                snapshot.commits = recent_commits(&repo, self.max_commits).unwrap_or_else(|e| {
                    tracing::warn!(error = %e, "Could not read commit history");
                    Vec::new()
                });
            }
            Err(_) => tracing::debug!(root = %root.display(), "Not a git repository"),
        }

        Ok(snapshot)
    }
}

#[async_trait]
impl DataCollector for LocalRepoCollector {
    async fn fetch(&self, target_id: &str) -> Result<Snapshot, CollectionError> {
        let collector = self.clone();
        let root = PathBuf::from(target_id);
        tokio::task::spawn_blocking(move || collector.collect(&root))
            .await
            .map_err(|e| CollectionError::Unavailable(format!("collector task failed: {}", e)))?
    }

    fn name(&self) -> &str {
        "local"
    }
}

fn walk_files(root: &Path) -> Vec<FileEntry> {
    let walker = ignore::WalkBuilder::new(root)
        .hidden(true)
        .git_ignore(true)
        .build();

    let mut files = Vec::new();
    for entry in walker.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Ok(relative) = path.strip_prefix(root) else {
            continue;
        };
        files.push(FileEntry {
            path: relative.to_string_lossy().replace('\\', "/"),
            size: entry.metadata().map(|m| m.len()).unwrap_or(0),
        });
        if files.len() >= MAX_FILES {
            break;
        }
    }
    files.sort_by(|a, b| a.path.cmp(&b.path));
    files
}

fn read_readme(root: &Path) -> Option<String> {
    let entries = std::fs::read_dir(root).ok()?;
    let mut candidates: Vec<PathBuf> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| {
            p.is_file()
                && p.file_stem()
                    .map(|s| s.to_string_lossy().eq_ignore_ascii_case("readme"))
                    .unwrap_or(false)
        })
        .collect();
    candidates.sort();
    candidates
        .into_iter()
        .find_map(|p| std::fs::read_to_string(p).ok())
}

fn read_manifests(root: &Path) -> Vec<DependencyManifest> {
    MANIFEST_FILES
        .iter()
        .filter_map(|file| {
            let path = root.join(file);
            let size = std::fs::metadata(&path).ok()?.len();
            if size > MAX_MANIFEST_BYTES {
                tracing::debug!(file, size, "Skipping oversized manifest");
                return None;
            }
            let content = std::fs::read_to_string(&path).ok()?;
            Some(DependencyManifest {
                file: file.to_string(),
                content,
            })
        })
        .collect()
}

fn recent_commits(repo: &Repository, max: usize) -> Result<Vec<CommitRecord>, git2::Error> {
    let mut walk = repo.revwalk()?;
    walk.push_head()?;

    let mut commits = Vec::new();
    for oid in walk.take(max) {
        let commit = repo.find_commit(oid?)?;
        commits.push(CommitRecord {
            id: commit.id().to_string(),
            summary: commit.summary().unwrap_or_default().to_string(),
            author: commit.author().name().map(str::to_string),
            timestamp: chrono::DateTime::from_timestamp(commit.time().seconds(), 0),
        });
    }
    Ok(commits)
}

/// Most common source language by file extension
fn dominant_language(files: &[FileEntry]) -> Option<String> {
    let mut counts: std::collections::BTreeMap<&'static str, usize> = Default::default();
    for file in files {
        let ext = Path::new(&file.path).extension().and_then(|e| e.to_str());
        let language = match ext {
            Some("rs") => "Rust",
            Some("py") => "Python",
            Some("ts") | Some("tsx") => "TypeScript",
            Some("js") | Some("jsx") => "JavaScript",
            Some("go") => "Go",
            Some("java") => "Java",
            Some("rb") => "Ruby",
            Some("c") | Some("h") => "C",
            Some("cpp") | Some("cc") | Some("hpp") => "C++",
            _ => continue,
        };
        *counts.entry(language).or_default() += 1;
    }
    counts
        .into_iter()
        .max_by_key(|(_, count)| *count)
        .map(|(language, _)| language.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(root: &Path, relative: &str, content: &str) {
        let path = root.join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn test_collects_files_readme_and_manifests() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "README.md", "# Widgets");
        write(dir.path(), "Cargo.toml", "[dependencies]\nserde = \"1\"");
        write(dir.path(), "src/main.rs", "fn main() {}");
        write(dir.path(), "src/lib.rs", "");

        let snapshot = LocalRepoCollector::new().collect(dir.path()).unwrap();
        let paths: Vec<&str> = snapshot.files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["Cargo.toml", "README.md", "src/lib.rs", "src/main.rs"]);
        assert_eq!(snapshot.readme.as_deref(), Some("# Widgets"));
        assert_eq!(snapshot.dependencies.len(), 1);
        assert_eq!(snapshot.target.language.as_deref(), Some("Rust"));
        assert!(snapshot.commits.is_empty());
    }

    #[test]
    fn test_reads_git_history() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "main.py", "print('hi')");

        let repo = Repository::init(dir.path()).unwrap();
        let mut index = repo.index().unwrap();
        index.add_path(Path::new("main.py")).unwrap();
        index.write().unwrap();
        let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
        let signature = git2::Signature::now("Dana", "dana@example.com").unwrap();
        repo.commit(Some("HEAD"), &signature, &signature, "Initial commit\n\nbody", &tree, &[])
            .unwrap();

        let snapshot = LocalRepoCollector::new().collect(dir.path()).unwrap();
        assert_eq!(snapshot.commits.len(), 1);
        assert_eq!(snapshot.commits[0].summary, "Initial commit");
        assert_eq!(snapshot.commits[0].author.as_deref(), Some("Dana"));
    }

    #[tokio::test]
    async fn test_missing_directory_is_not_found() {
        let err = LocalRepoCollector::new()
            .fetch("/definitely/not/here")
            .await
            .unwrap_err();
        assert!(matches!(err, CollectionError::NotFound(_)));
    }
}
