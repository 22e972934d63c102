//! Storage for `media` uploads.

use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

/// Longest file name kept after sanitizing.
const MAX_FILE_NAME_LEN: usize = 128;

/// Errors from saving an upload.
#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("Invalid base64 content: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("Failed to write {path}: {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },
}

/// A stored upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedMedia {
    pub file_name: String,
    pub content_type: String,
    pub bytes: usize,
    pub path: PathBuf,
}

/// Writes decoded uploads under one directory.
#[derive(Debug, Clone)]
pub struct MediaStore {
    dir: PathBuf,
}

impl MediaStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Decode `content` and write it as `<unique>-<file_name>`.
    pub async fn save(
        &self,
        file_name: &str,
        content_type: &str,
        content: &str,
    ) -> Result<SavedMedia, MediaError> {
        let data = STANDARD.decode(content.trim())?;
        let file_name = sanitize_file_name(file_name);
        let unique = uuid::Uuid::new_v4().simple().to_string();
        let path = self.dir.join(format!("{}-{}", &unique[..8], file_name));

        let write_err = |source| MediaError::Write {
            path: path.display().to_string(),
            source,
        };
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(write_err)?;
        tokio::fs::write(&path, &data).await.map_err(write_err)?;

        tracing::info!(
            path = %path.display(),
            bytes = data.len(),
            content_type,
            "Saved media upload"
        );

        Ok(SavedMedia {
            file_name,
            content_type: content_type.to_string(),
            bytes: data.len(),
            path,
        })
    }
}

/// Keep the last path component and only `[A-Za-z0-9._-]`.
pub fn sanitize_file_name(raw: &str) -> String {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or(raw);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .take(MAX_FILE_NAME_LEN)
        .collect();
    let cleaned = cleaned.trim_start_matches('.');

    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned.to_string()
    }
}
