//! Background image loading
//!
//! Resolves a background URI to bytes and decodes them. Runs off the render
//! loop; the compositor only ever draws already-decoded frames.

use super::error::CompositorError;
use crate::ffmpeg;
use crate::media::image::{decode_png, is_png};
use crate::media::{ObjectUrlRegistry, VideoFrame};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

const FETCH_TIMEOUT_SECS: u64 = 15;

/// Turns a background URI into a decoded bitmap
#[async_trait]
pub trait ImageLoader: Send + Sync {
    async fn load(&self, uri: &str) -> Result<VideoFrame, CompositorError>;
}

/// Loads `http(s)://`, `file://`, object URLs and plain paths
pub struct DefaultImageLoader {
    client: reqwest::Client,
    object_urls: Arc<ObjectUrlRegistry>,
}

impl DefaultImageLoader {
    pub fn new(object_urls: Arc<ObjectUrlRegistry>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(FETCH_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self { client, object_urls }
    }

    async fn fetch(&self, uri: &str) -> Result<Vec<u8>, String> {
        if uri.starts_with("http://") || uri.starts_with("https://") {
            let response = self
                .client
                .get(uri)
                .send()
                .await
                .and_then(|r| r.error_for_status())
                .map_err(|e| e.to_string())?;
            let bytes = response.bytes().await.map_err(|e| e.to_string())?;
            return Ok(bytes.to_vec());
        }

        if ObjectUrlRegistry::is_object_url(uri) {
            return self
                .object_urls
                .resolve(uri)
                .map(|entry| entry.data.to_vec())
                .ok_or_else(|| "object URL was revoked".to_string());
        }

        tokio::fs::read(local_path(uri)?).await.map_err(|e| e.to_string())
    }
}

/// Map `file://` URIs (percent-encoded) and bare paths to a filesystem path
fn local_path(uri: &str) -> Result<PathBuf, String> {
    match uri.strip_prefix("file://") {
        Some(encoded) => urlencoding::decode(encoded)
            .map(|decoded| PathBuf::from(decoded.into_owned()))
            .map_err(|e| e.to_string()),
        None if uri.contains("://") => Err(format!("unsupported scheme in {}", uri)),
        None => Ok(PathBuf::from(uri)),
    }
}

#[async_trait]
impl ImageLoader for DefaultImageLoader {
    async fn load(&self, uri: &str) -> Result<VideoFrame, CompositorError> {
        let image_error = |reason: String| CompositorError::ImageLoad {
            uri: uri.to_string(),
            reason,
        };

        let bytes = self.fetch(uri).await.map_err(image_error)?;
        tracing::debug!("Fetched background image {} ({} bytes)", uri, bytes.len());

        if is_png(&bytes) {
            return decode_png(&bytes).map_err(|e| image_error(e.to_string()));
        }
        ffmpeg::decode_image(&bytes)
            .await
            .map_err(|e| image_error(e.to_string()))
    }
}
