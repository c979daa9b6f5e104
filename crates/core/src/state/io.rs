//! # IO Utilities
//!
//! File system operations for the `.assay` runtime directory, which holds the
//! run database and exported transcripts.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::fs;

/// Environment variable that relocates the runtime directory
pub const RUNTIME_PATH_ENV: &str = "ASSAY_RUNTIME_PATH";

/// Get the runtime directory path (.assay)
pub fn get_runtime_path() -> PathBuf {
    if let Ok(path) = std::env::var(RUNTIME_PATH_ENV) {
        return PathBuf::from(path);
    }

    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(".assay")
}

/// Write `content` to `path`, creating parent directories
pub async fn write_file(path: impl AsRef<Path>, content: &str) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }

    fs::write(path, content)
        .await
        .with_context(|| format!("Failed to write file: {:?}", path))
}

/// Write a file relative to the runtime directory; returns the full path
pub async fn write_runtime_file(relative_path: impl AsRef<Path>, content: &str) -> Result<PathBuf> {
    let path = get_runtime_path().join(relative_path);
    write_file(&path, content).await?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_runtime_path() {
        if std::env::var(RUNTIME_PATH_ENV).is_err() {
            assert!(get_runtime_path().ends_with(".assay"));
        }
    }

    #[tokio::test]
    async fn test_write_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("transcripts").join("run.md");

        write_file(&nested, "first").await.unwrap();
        write_file(&nested, "second").await.unwrap();

        let content = fs::read_to_string(&nested).await.unwrap();
        assert_eq!(content, "second");
    }
}
