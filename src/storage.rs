//! File storage for uploaded resumes.
//!
//! Keys look like `resumes/<uuid>-<sanitized filename>` and are relative to
//! the configured upload directory.

use anyhow::{bail, Context, Result};
use std::path::{Component, Path, PathBuf};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ResumeStore {
    root: PathBuf,
}

impl ResumeStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Write `bytes` and return the storage key.
    pub async fn save(&self, filename: &str, bytes: &[u8]) -> Result<String> {
        let key = format!("resumes/{}-{}", Uuid::new_v4(), sanitize_filename(filename));
        let path = self.root.join(&key);

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create upload directory: {}", parent.display()))?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("Failed to write upload: {}", path.display()))?;

        Ok(key)
    }

    /// Absolute path for a key returned by [`save`](Self::save).
    pub fn path_for(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            bail!("invalid storage key: {}", key);
        }
        Ok(self.root.join(relative))
    }

    /// Delete a previously saved upload.
    pub async fn remove(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        tokio::fs::remove_file(&path)
            .await
            .with_context(|| format!("Failed to remove upload: {}", path.display()))
    }
}

/// Keep ASCII letters, digits, `.`, `-`, `_`; everything else becomes `_`.
pub fn sanitize_filename(filename: &str) -> String {
    let base = Path::new(filename)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();

    let cleaned = cleaned.trim_start_matches('.').to_string();
    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned
    }
}
