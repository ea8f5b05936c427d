//! Studio facade
//!
//! Wires capture, compositing and recording together behind the calls the UI
//! makes. Holds no pipeline logic of its own beyond deciding which stream is
//! recorded and when the compositor runs.

use crate::capture::{CaptureBackend, CaptureConstraints, CaptureSource};
use crate::compositor::{
    background_transition, BackgroundSpec, BackgroundTransition, BackgroundUpdate, CompositorOptions,
    DefaultImageLoader, FrameCompositor, ImageLoader,
};
use crate::config::{RecordingMode, StudioConfig};
use crate::media::{Capabilities, MediaStream, ObjectUrlRegistry};
use crate::recorder::{
    EncoderBackend, FfmpegEncoderBackend, FfmpegThumbnailer, RecordingArtifact, RecordingSession, RecordingState,
    SessionEvent, SessionOptions, ThumbnailExtractor,
};
use crate::storage::{ArtifactStore, LocalDirectoryStore, StoredMedia};
use crate::utils::{AppError, AppResult, ErrorResponse};
use crate::waveform::{self, WaveformData, DEFAULT_PEAKS_PER_SECOND};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;

/// Collaborators a studio is built from
pub struct StudioParts {
    pub capture: Arc<dyn CaptureBackend>,
    pub encoder: Arc<dyn EncoderBackend>,
    pub thumbnailer: Arc<dyn ThumbnailExtractor>,
    pub image_loader: Arc<dyn ImageLoader>,
    pub store: Arc<dyn ArtifactStore>,
    pub object_urls: Arc<ObjectUrlRegistry>,
}

/// Everything the UI renders from
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudioSnapshot {
    pub mode: RecordingMode,
    pub camera_ready: bool,
    pub acquiring: bool,
    pub background: BackgroundSpec,
    pub requested_background: BackgroundSpec,
    pub compositing: bool,
    pub state: RecordingState,
    pub elapsed_secs: f64,
    pub max_duration_secs: f64,
    pub chunks: usize,
    pub recording_url: Option<String>,
    pub thumbnail_url: Option<String>,
    pub recording_mime_type: Option<String>,
    pub recording_duration_secs: Option<f64>,
    pub capture_error: Option<ErrorResponse>,
    pub compositor_error: Option<ErrorResponse>,
    pub recorder_error: Option<ErrorResponse>,
}

pub struct MediaStudio {
    mode: RecordingMode,
    constraints: CaptureConstraints,
    encoder: Arc<dyn EncoderBackend>,
    capture: CaptureSource,
    compositor: Arc<FrameCompositor>,
    session: RecordingSession,
    store: Arc<dyn ArtifactStore>,
    object_urls: Arc<ObjectUrlRegistry>,
    /// Last selected background, compared against the next selection
    background: Arc<Mutex<BackgroundSpec>>,
    uploaded_backgrounds: Mutex<Vec<String>>,
}

impl MediaStudio {
    pub fn new(config: &StudioConfig, mode: RecordingMode, parts: StudioParts) -> Self {
        tracing::info!("Creating {:?} studio with {} capture backend", mode, parts.capture.name());
        let compositor = Arc::new(FrameCompositor::new(
            CompositorOptions::from_config(config),
            parts.image_loader,
        ));
        let session = RecordingSession::new(
            SessionOptions::from_config(config, mode),
            parts.encoder.clone(),
            parts.thumbnailer,
            parts.object_urls.clone(),
        );
        let background = Arc::new(Mutex::new(BackgroundSpec::None));

        // Takes can end on their own (max duration, device loss)
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(release_compositor_after_takes(
                session.subscribe(),
                Arc::downgrade(&compositor),
                Arc::downgrade(&background),
            ));
        }

        Self {
            mode,
            constraints: CaptureConstraints::for_mode(config, mode),
            encoder: parts.encoder,
            capture: CaptureSource::new(parts.capture),
            compositor,
            session,
            store: parts.store,
            object_urls: parts.object_urls,
            background,
            uploaded_backgrounds: Mutex::new(Vec::new()),
        }
    }

    /// Studio with the ffmpeg encoder, the default image loader and the local
    /// directory store
    pub async fn with_defaults(
        config: &StudioConfig,
        mode: RecordingMode,
        capture: Arc<dyn CaptureBackend>,
    ) -> AppResult<Self> {
        let object_urls = Arc::new(ObjectUrlRegistry::new());
        let encoder = FfmpegEncoderBackend::probe().await?;
        let parts = StudioParts {
            capture,
            encoder: Arc::new(encoder),
            thumbnailer: Arc::new(FfmpegThumbnailer::new()),
            image_loader: Arc::new(DefaultImageLoader::new(object_urls.clone())),
            store: Arc::new(LocalDirectoryStore::from_config(config)),
            object_urls,
        };
        Ok(Self::new(config, mode, parts))
    }

    pub fn mode(&self) -> RecordingMode {
        self.mode
    }

    /// Combined capture and recording capabilities
    pub fn capabilities(&self) -> Capabilities {
        self.capture
            .backend()
            .capabilities()
            .merge(self.encoder.capabilities())
    }

    /// Acquire the devices for the current mode.
    ///
    /// Starts compositing straight away if a background was picked earlier.
    pub async fn setup_camera(&self) -> AppResult<MediaStream> {
        let stream = self.capture.initialize(&self.constraints).await?;
        self.sync_compositor()?;
        Ok(stream)
    }

    /// Run the compositor exactly when a background is selected and no take
    /// is in progress
    fn sync_compositor(&self) -> AppResult<()> {
        if self.mode != RecordingMode::Video || self.session.state() != RecordingState::Idle {
            return Ok(());
        }
        let wanted = !self.background.lock().is_none();
        match (wanted, self.compositor.is_active(), self.capture.stream()) {
            (true, false, Some(stream)) => {
                self.compositor.start(&stream)?;
            }
            (false, true, _) => {
                self.compositor.stop();
            }
            _ => {}
        }
        Ok(())
    }

    /// Switch backgrounds without touching the capture devices.
    ///
    /// While a take is running the recorded stream cannot change, so a switch
    /// to `None` keeps the compositor running as a passthrough and a switch
    /// away from `None` takes effect with the next take.
    pub fn select_background(&self, spec: BackgroundSpec) -> AppResult<BackgroundUpdate> {
        let mut current = self.background.lock();
        let transition = background_transition(&current, &spec);
        let recording = self.session.state() != RecordingState::Idle;
        tracing::debug!("Background {:?} -> {:?}: {:?}", *current, spec, transition);

        let update = match transition {
            BackgroundTransition::Unchanged => BackgroundUpdate::Unchanged,
            BackgroundTransition::Update => self.compositor.set_background(spec.clone())?,
            BackgroundTransition::Start => {
                let update = self.compositor.set_background(spec.clone())?;
                if let (RecordingMode::Video, Some(stream), false) = (self.mode, self.capture.stream(), recording) {
                    self.compositor.start(&stream)?;
                }
                update
            }
            BackgroundTransition::Stop => {
                let update = self.compositor.set_background(BackgroundSpec::None)?;
                if !recording {
                    self.compositor.stop();
                }
                update
            }
        };

        *current = spec;
        Ok(update)
    }

    /// Expose user-picked image bytes as an object URL usable as an
    /// [`BackgroundSpec::Image`] source. Revoked on teardown.
    pub fn upload_background(&self, data: Vec<u8>, mime_type: &str) -> String {
        let url = self.object_urls.create(Arc::from(data), mime_type);
        self.uploaded_backgrounds.lock().push(url.clone());
        url
    }

    /// The stream a take records: composited when compositing, raw otherwise
    pub fn recording_stream(&self) -> Option<MediaStream> {
        self.compositor.output_stream().or_else(|| self.capture.stream())
    }

    pub async fn start_recording(&self) -> AppResult<()> {
        self.sync_compositor()?;
        let stream = self.recording_stream().ok_or(AppError::CameraNotReady)?;
        self.session.start(&stream).await?;
        Ok(())
    }

    pub fn pause_recording(&self) -> bool {
        self.session.pause()
    }

    pub fn resume_recording(&self) -> bool {
        self.session.resume()
    }

    pub async fn stop_recording(&self) -> AppResult<Option<RecordingArtifact>> {
        let stopped = self.session.stop().await;
        self.sync_compositor()?;
        Ok(stopped?)
    }

    pub fn clear_recording(&self) -> bool {
        self.session.clear()
    }

    pub fn recording(&self) -> Option<RecordingArtifact> {
        self.session.artifact()
    }

    /// Hand the finished take to the store
    pub async fn save_recording(&self, owner_id: &str, name: &str) -> AppResult<StoredMedia> {
        let artifact = self.session.artifact().ok_or(AppError::NoRecording)?;
        Ok(self.store.save(&artifact, owner_id, name, self.mode).await?)
    }

    /// Peaks of the finished take
    pub async fn waveform(&self) -> AppResult<WaveformData> {
        let artifact = self.session.artifact().ok_or(AppError::NoRecording)?;
        let extension = crate::recorder::MediaFormat::parse(artifact.mime_type())
            .map(|f| f.extension())
            .unwrap_or("webm");
        Ok(waveform::extract_waveform(artifact.data(), extension, DEFAULT_PEAKS_PER_SECOND).await?)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.session.subscribe()
    }

    pub fn snapshot(&self) -> StudioSnapshot {
        let status = self.session.status();
        let artifact = self.session.artifact();
        let response = |e: AppError| ErrorResponse::from(e);

        StudioSnapshot {
            mode: self.mode,
            camera_ready: self.capture.is_ready(),
            acquiring: self.capture.is_acquiring(),
            background: self.compositor.active_background(),
            requested_background: self.background.lock().clone(),
            compositing: self.compositor.is_active(),
            state: status.state,
            elapsed_secs: status.elapsed_secs,
            max_duration_secs: status.max_duration_secs,
            chunks: status.chunks,
            recording_url: self.session.artifact_url(),
            thumbnail_url: self.session.thumbnail_url(),
            recording_mime_type: artifact.as_ref().map(|a| a.mime_type().to_string()),
            recording_duration_secs: artifact.as_ref().map(|a| a.duration_secs()),
            capture_error: self.capture.error().map(|e| response(e.into())),
            compositor_error: self.compositor.error().map(|e| response(e.into())),
            recorder_error: status.error.map(|e| response(e.into())),
        }
    }

    /// Dismiss every component's current error
    pub fn clear_errors(&self) {
        self.capture.clear_error();
        self.compositor.clear_error();
        self.session.clear_error();
    }

    /// Stop everything and give back every device and URL
    pub async fn teardown(&self) {
        self.session.teardown().await;
        self.compositor.stop();
        self.capture.release();
        for url in self.uploaded_backgrounds.lock().drain(..) {
            self.object_urls.revoke(&url);
        }
        tracing::info!("Studio torn down");
    }
}

/// Stop a compositor left running as a passthrough once the take that
/// pinned it ends
async fn release_compositor_after_takes(
    mut events: broadcast::Receiver<SessionEvent>,
    compositor: Weak<FrameCompositor>,
    background: Weak<Mutex<BackgroundSpec>>,
) {
    loop {
        match events.recv().await {
            Ok(SessionEvent::Stopped { .. }) | Err(broadcast::error::RecvError::Lagged(_)) => {}
            Ok(_) => continue,
            Err(broadcast::error::RecvError::Closed) => break,
        }
        let (Some(compositor), Some(background)) = (compositor.upgrade(), background.upgrade()) else {
            break;
        };
        let background = background.lock();
        if background.is_none() && compositor.stop() {
            tracing::debug!("Passthrough compositor released after the take");
        }
    }
}
