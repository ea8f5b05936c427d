//! Transient object URLs
//!
//! Finished recordings and user-picked background files are exposed to the UI
//! as `blob:` URLs. Each URL must be revoked exactly once; the registry keeps
//! counters so that pairing can be checked.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

pub const OBJECT_URL_PREFIX: &str = "blob:vox-operis/";

/// Bytes behind an object URL
#[derive(Debug, Clone)]
pub struct BlobEntry {
    pub data: Arc<[u8]>,
    pub mime_type: String,
}

#[derive(Debug, Default)]
pub struct ObjectUrlRegistry {
    entries: Mutex<HashMap<String, BlobEntry>>,
    created: AtomicU64,
    revoked: AtomicU64,
}

impl ObjectUrlRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, data: Arc<[u8]>, mime_type: impl Into<String>) -> String {
        let url = format!("{}{}", OBJECT_URL_PREFIX, Uuid::new_v4());
        self.entries.lock().insert(
            url.clone(),
            BlobEntry {
                data,
                mime_type: mime_type.into(),
            },
        );
        self.created.fetch_add(1, Ordering::Relaxed);
        url
    }

    pub fn resolve(&self, url: &str) -> Option<BlobEntry> {
        self.entries.lock().get(url).cloned()
    }

    /// Revoke a URL. Returns `false` if it was unknown or already revoked.
    pub fn revoke(&self, url: &str) -> bool {
        let removed = self.entries.lock().remove(url).is_some();
        if removed {
            self.revoked.fetch_add(1, Ordering::Relaxed);
        } else {
            tracing::warn!("Attempted to revoke unknown object URL {}", url);
        }
        removed
    }

    pub fn is_object_url(uri: &str) -> bool {
        uri.starts_with(OBJECT_URL_PREFIX)
    }

    pub fn live_count(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn created_count(&self) -> u64 {
        self.created.load(Ordering::Relaxed)
    }

    pub fn revoked_count(&self) -> u64 {
        self.revoked.load(Ordering::Relaxed)
    }
}
