//! Directory-backed artifact store
//!
//! Layout: `<root>/<owner>/<name>-<timestamp>.<ext>` plus a `.json` sidecar
//! and, for video, a `.png` thumbnail next to it.

use super::{ArtifactStore, StorageError, StoredMedia};
use crate::config::{RecordingMode, StudioConfig};
use crate::recorder::{MediaFormat, RecordingArtifact};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};

/// Sidecar written next to every recording
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingMeta {
    pub owner_id: String,
    pub mime_type: String,
    pub duration_secs: f64,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
    pub thumbnail: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LocalDirectoryStore {
    root: PathBuf,
    max_bytes: u64,
}

impl LocalDirectoryStore {
    pub fn new(root: impl Into<PathBuf>, max_bytes: u64) -> Self {
        Self {
            root: root.into(),
            max_bytes,
        }
    }

    pub fn from_config(config: &StudioConfig) -> Self {
        Self::new(&config.storage_dir, config.max_upload_bytes)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn check(&self, artifact: &RecordingArtifact, owner_id: &str, mode: RecordingMode) -> Result<(), StorageError> {
        if owner_id.is_empty() || !owner_id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
            return Err(StorageError::InvalidOwner(owner_id.to_string()));
        }

        let family = mode.mime_family();
        if !artifact.mime_type().starts_with(family) {
            return Err(StorageError::WrongMediaType {
                expected: family.to_string(),
                actual: artifact.mime_type().to_string(),
            });
        }

        let size = artifact.size_bytes() as u64;
        if size > self.max_bytes {
            return Err(StorageError::TooLarge {
                size,
                limit: self.max_bytes,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ArtifactStore for LocalDirectoryStore {
    async fn save(
        &self,
        artifact: &RecordingArtifact,
        owner_id: &str,
        suggested_name: &str,
        mode: RecordingMode,
    ) -> Result<StoredMedia, StorageError> {
        self.check(artifact, owner_id, mode)?;

        let dir = self.root.join(owner_id);
        tokio::fs::create_dir_all(&dir).await?;

        let extension = MediaFormat::parse(artifact.mime_type())
            .map(|f| f.extension())
            .unwrap_or("bin");
        let stem = format!(
            "{}-{}",
            slugify(suggested_name),
            artifact.created_at().format("%Y%m%d-%H%M%S%3f")
        );

        let path = dir.join(format!("{}.{}", stem, extension));
        tokio::fs::write(&path, artifact.data().as_ref()).await?;

        let thumbnail_path = match artifact.thumbnail() {
            Some(thumbnail) => {
                let thumb = dir.join(format!("{}.png", stem));
                tokio::fs::write(&thumb, &thumbnail.data).await?;
                Some(thumb)
            }
            None => None,
        };

        let meta = RecordingMeta {
            owner_id: owner_id.to_string(),
            mime_type: artifact.mime_type().to_string(),
            duration_secs: artifact.duration_secs(),
            size_bytes: artifact.size_bytes() as u64,
            created_at: artifact.created_at(),
            thumbnail: thumbnail_path
                .as_ref()
                .and_then(|p| p.file_name())
                .map(|n| n.to_string_lossy().into_owned()),
        };
        tokio::fs::write(dir.join(format!("{}.json", stem)), serde_json::to_vec_pretty(&meta)?).await?;

        tracing::info!("Saved recording for {} to {:?}", owner_id, path);

        Ok(StoredMedia {
            url: file_url(&path),
            path,
            size_bytes: meta.size_bytes,
            thumbnail_path,
        })
    }
}

/// Lowercase ASCII words joined by `-`
fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let slug = slug.trim_end_matches('-');
    if slug.is_empty() {
        "recording".to_string()
    } else {
        slug.to_string()
    }
}

/// `file://` URL with each path segment percent-encoded
fn file_url(path: &Path) -> String {
    let segments: Vec<String> = path
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(urlencoding::encode(&part.to_string_lossy()).into_owned()),
            _ => None,
        })
        .collect();
    format!("file:///{}", segments.join("/"))
}
