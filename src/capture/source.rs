//! Capture source
//!
//! Owns the live device stream between a successful `initialize` and the
//! matching `release`. Exactly one device lease is held in between.

use super::error::CaptureError;
use super::traits::{AcquiredDevice, CaptureBackend, CaptureConstraints};
use crate::media::MediaStream;
use crate::utils::ErrorSlot;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub struct CaptureSource {
    backend: Arc<dyn CaptureBackend>,
    device: Mutex<Option<AcquiredDevice>>,
    acquiring: AtomicBool,
    error: ErrorSlot<CaptureError>,
}

/// Clears the in-flight flag even if the acquiring future is dropped
struct AcquiringGuard<'a>(&'a AtomicBool);

impl Drop for AcquiringGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl CaptureSource {
    pub fn new(backend: Arc<dyn CaptureBackend>) -> Self {
        Self {
            backend,
            device: Mutex::new(None),
            acquiring: AtomicBool::new(false),
            error: ErrorSlot::new(),
        }
    }

    pub fn backend(&self) -> &Arc<dyn CaptureBackend> {
        &self.backend
    }

    /// Acquire the devices described by `constraints`.
    ///
    /// Returns the existing stream if already ready. Fails with
    /// [`CaptureError::ErrorNotCleared`] while a previous error is pending and
    /// with [`CaptureError::AcquisitionPending`] while another request is in
    /// flight. Failures are stored in the error slot and never retried.
    pub async fn initialize(&self, constraints: &CaptureConstraints) -> Result<MediaStream, CaptureError> {
        if self.error.is_set() {
            return Err(CaptureError::ErrorNotCleared);
        }

        if let Some(device) = self.device.lock().as_ref() {
            return Ok(device.stream.clone());
        }

        if !self.backend.capabilities().media_devices {
            tracing::warn!("Capture backend {} cannot acquire devices", self.backend.name());
            self.error.set(CaptureError::NotSupported);
            return Err(CaptureError::NotSupported);
        }

        if self.acquiring.swap(true, Ordering::SeqCst) {
            return Err(CaptureError::AcquisitionPending);
        }
        let _guard = AcquiringGuard(&self.acquiring);

        tracing::info!("Requesting devices from {} backend", self.backend.name());
        match self.backend.acquire(constraints).await {
            Ok(device) => {
                let stream = device.stream.clone();
                tracing::info!(
                    "Capture ready: {} video, {} audio track(s)",
                    stream.video_tracks().len(),
                    stream.audio_tracks().len()
                );
                *self.device.lock() = Some(device);
                Ok(stream)
            }
            Err(e) => {
                tracing::warn!("Device acquisition failed: {}", e);
                self.error.set(e.clone());
                Err(e)
            }
        }
    }

    /// Stop every track and drop the device lease.
    ///
    /// Safe to call at any time. Returns `true` only when a device was held.
    pub fn release(&self) -> bool {
        let Some(mut device) = self.device.lock().take() else {
            return false;
        };
        let stopped = device.stream.stop_all();
        device.lease.release();
        tracing::info!("Capture released ({} live track(s) stopped)", stopped);
        true
    }

    pub fn is_ready(&self) -> bool {
        self.device.lock().is_some()
    }

    pub fn is_acquiring(&self) -> bool {
        self.acquiring.load(Ordering::SeqCst)
    }

    pub fn stream(&self) -> Option<MediaStream> {
        self.device.lock().as_ref().map(|d| d.stream.clone())
    }

    pub fn error(&self) -> Option<CaptureError> {
        self.error.get()
    }

    pub fn clear_error(&self) -> Option<CaptureError> {
        self.error.clear()
    }
}

impl Drop for CaptureSource {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::SyntheticBackend;
    use crate::config::{RecordingMode, StudioConfig};
    use std::time::Duration;

    fn constraints() -> CaptureConstraints {
        CaptureConstraints::for_mode(&StudioConfig::default(), RecordingMode::Video)
    }

    #[tokio::test]
    async fn test_initialize_and_release_pair_device_locks() {
        let backend = SyntheticBackend::new();
        let source = CaptureSource::new(Arc::new(backend.clone()));

        let stream = source.initialize(&constraints()).await.unwrap();
        assert!(source.is_ready());
        assert_eq!(stream.video_tracks().len(), 1);
        assert_eq!(stream.audio_tracks().len(), 1);
        assert_eq!(backend.active_locks(), 1);

        // Ready already: same stream, no second lock
        let again = source.initialize(&constraints()).await.unwrap();
        assert_eq!(again.id(), stream.id());
        assert_eq!(backend.acquisitions(), 1);

        assert!(source.release());
        assert!(!source.release());
        assert!(!stream.is_live());
        assert_eq!(backend.active_locks(), 0);
    }

    #[tokio::test]
    async fn test_release_without_initialize_is_noop() {
        let source = CaptureSource::new(Arc::new(SyntheticBackend::new()));
        assert!(!source.release());
        assert!(!source.is_ready());
    }

    #[tokio::test]
    async fn test_failure_goes_to_slot_and_gates_retry() {
        let backend = SyntheticBackend::new();
        backend.fail_next(CaptureError::PermissionDenied);
        let source = CaptureSource::new(Arc::new(backend.clone()));

        let err = source.initialize(&constraints()).await.unwrap_err();
        assert_eq!(err, CaptureError::PermissionDenied);
        assert_eq!(source.error(), Some(CaptureError::PermissionDenied));

        // Not retried until the error is dismissed
        assert_eq!(
            source.initialize(&constraints()).await.unwrap_err(),
            CaptureError::ErrorNotCleared
        );
        assert_eq!(backend.acquisitions(), 0);

        source.clear_error();
        source.initialize(&constraints()).await.unwrap();
        assert_eq!(backend.active_locks(), 1);
    }

    #[tokio::test]
    async fn test_unsupported_host_is_persistent() {
        let backend = SyntheticBackend::new();
        backend.set_available(false);
        let source = CaptureSource::new(Arc::new(backend));

        let err = source.initialize(&constraints()).await.unwrap_err();
        assert!(err.is_capability_error());
        assert_eq!(source.error(), Some(CaptureError::NotSupported));
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_request_while_pending_is_rejected() {
        let backend = SyntheticBackend::new();
        backend.set_acquire_delay(Duration::from_millis(500));
        let source = Arc::new(CaptureSource::new(Arc::new(backend.clone())));

        let first = {
            let source = source.clone();
            tokio::spawn(async move { source.initialize(&constraints()).await })
        };
        tokio::task::yield_now().await;
        assert!(source.is_acquiring());

        assert_eq!(
            source.initialize(&constraints()).await.unwrap_err(),
            CaptureError::AcquisitionPending
        );
        // Pending rejection does not occupy the error slot
        assert!(source.error().is_none());

        first.await.unwrap().unwrap();
        assert!(!source.is_acquiring());
        assert_eq!(backend.acquisitions(), 1);
        assert_eq!(backend.active_locks(), 1);
    }

    #[tokio::test]
    async fn test_drop_releases_device() {
        let backend = SyntheticBackend::new();
        {
            let source = CaptureSource::new(Arc::new(backend.clone()));
            source.initialize(&constraints()).await.unwrap();
            assert_eq!(backend.active_locks(), 1);
        }
        assert_eq!(backend.active_locks(), 0);
    }
}
