//! Artifact persistence
//!
//! The studio hands finished recordings to an [`ArtifactStore`]; where the
//! bytes end up is the store's business.

mod local;

pub use local::LocalDirectoryStore;

use crate::config::RecordingMode;
use crate::recorder::RecordingArtifact;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Expected {expected}* media, got {actual}")]
    WrongMediaType { expected: String, actual: String },

    #[error("Recording is {size} bytes, the limit is {limit}")]
    TooLarge { size: u64, limit: u64 },

    #[error("Invalid owner id: {0:?}")]
    InvalidOwner(String),
}

/// Where a saved recording landed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMedia {
    pub url: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub thumbnail_path: Option<PathBuf>,
}

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn save(
        &self,
        artifact: &RecordingArtifact,
        owner_id: &str,
        suggested_name: &str,
        mode: RecordingMode,
    ) -> Result<StoredMedia, StorageError>;
}
