//! Test doubles shared by the unit tests

use crate::compositor::{CompositorError, ImageLoader};
use crate::media::{Capabilities, MediaEvent, VideoFrame};
use crate::recorder::{ActiveEncoder, EncoderBackend, EncoderSettings, RecorderError, Thumbnail, ThumbnailExtractor};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};

/// Image loader serving in-memory frames, optionally held until released
pub struct StaticImageLoader {
    images: Mutex<HashMap<String, VideoFrame>>,
    gate: Option<Semaphore>,
    loads: AtomicUsize,
}

impl StaticImageLoader {
    pub fn new() -> Self {
        Self {
            images: Mutex::new(HashMap::new()),
            gate: None,
            loads: AtomicUsize::new(0),
        }
    }

    /// Every load waits for a [`StaticImageLoader::release`]
    pub fn gated() -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::new()
        }
    }

    pub fn with_image(self, uri: &str, frame: VideoFrame) -> Self {
        self.images.lock().insert(uri.to_string(), frame);
        self
    }

    pub fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(1);
        }
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageLoader for StaticImageLoader {
    async fn load(&self, uri: &str) -> Result<VideoFrame, CompositorError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        self.images
            .lock()
            .get(uri)
            .cloned()
            .ok_or_else(|| CompositorError::ImageLoad {
                uri: uri.to_string(),
                reason: "not found".to_string(),
            })
    }
}

#[derive(Debug, Default)]
struct FakeEncoderState {
    mime_types: Vec<String>,
    block_start: Mutex<Option<RecorderError>>,
    fail_on_stop: AtomicBool,
    started: AtomicUsize,
    frames: AtomicUsize,
    audio_chunks: AtomicUsize,
    last_settings: Mutex<Option<EncoderSettings>>,
}

/// Encoder that emits one byte chunk per received frame or audio chunk
#[derive(Debug, Clone)]
pub struct FakeEncoderBackend {
    state: Arc<FakeEncoderState>,
}

impl FakeEncoderBackend {
    pub fn new(mime_types: &[&str]) -> Self {
        Self {
            state: Arc::new(FakeEncoderState {
                mime_types: mime_types.iter().map(|m| m.to_string()).collect(),
                ..Default::default()
            }),
        }
    }

    /// Supports the default webm preferences of both modes
    pub fn webm() -> Self {
        Self::new(&["video/webm;codecs=vp9,opus", "video/webm", "audio/webm;codecs=opus", "audio/webm"])
    }

    pub fn fail_start(&self, error: RecorderError) {
        *self.state.block_start.lock() = Some(error);
    }

    pub fn fail_on_stop(&self) {
        self.state.fail_on_stop.store(true, Ordering::SeqCst);
    }

    pub fn started(&self) -> usize {
        self.state.started.load(Ordering::SeqCst)
    }

    pub fn frames(&self) -> usize {
        self.state.frames.load(Ordering::SeqCst)
    }

    pub fn audio_chunks(&self) -> usize {
        self.state.audio_chunks.load(Ordering::SeqCst)
    }

    pub fn last_settings(&self) -> Option<EncoderSettings> {
        self.state.last_settings.lock().clone()
    }
}

#[async_trait]
impl EncoderBackend for FakeEncoderBackend {
    fn name(&self) -> &str {
        "fake"
    }

    fn capabilities(&self) -> Capabilities {
        self.state.mime_types.iter().fold(
            Capabilities {
                media_recorder: true,
                canvas_capture: true,
                ..Default::default()
            },
            |caps, mime| caps.with_mime_type(mime),
        )
    }

    async fn start(
        &self,
        settings: &EncoderSettings,
        events: mpsc::UnboundedSender<MediaEvent>,
    ) -> Result<Box<dyn ActiveEncoder>, RecorderError> {
        if let Some(error) = self.state.block_start.lock().take() {
            return Err(error);
        }
        self.state.started.fetch_add(1, Ordering::SeqCst);
        *self.state.last_settings.lock() = Some(settings.clone());
        Ok(Box::new(FakeActiveEncoder {
            state: self.state.clone(),
            events,
            paused: false,
        }))
    }
}

struct FakeActiveEncoder {
    state: Arc<FakeEncoderState>,
    events: mpsc::UnboundedSender<MediaEvent>,
    paused: bool,
}

#[async_trait]
impl ActiveEncoder for FakeActiveEncoder {
    fn push_frame(&mut self, _frame: &VideoFrame) -> Result<(), RecorderError> {
        if !self.paused {
            self.state.frames.fetch_add(1, Ordering::SeqCst);
            let _ = self.events.send(MediaEvent::EncoderChunk(vec![b'v']));
        }
        Ok(())
    }

    fn push_audio(&mut self, _samples: &[f32], _sample_rate: u32, _channels: u16) -> Result<(), RecorderError> {
        if !self.paused {
            self.state.audio_chunks.fetch_add(1, Ordering::SeqCst);
            let _ = self.events.send(MediaEvent::EncoderChunk(vec![b'a']));
        }
        Ok(())
    }

    fn pause(&mut self) {
        self.paused = true;
    }

    fn resume(&mut self) {
        self.paused = false;
    }

    async fn finish(self: Box<Self>) -> Result<(), RecorderError> {
        if self.state.fail_on_stop.load(Ordering::SeqCst) {
            let _ = self.events.send(MediaEvent::EncoderFailed("fake encoder crashed".to_string()));
            return Err(RecorderError::RecordingFailed("fake encoder crashed".to_string()));
        }
        let _ = self.events.send(MediaEvent::Finalized);
        Ok(())
    }
}

/// Thumbnailer returning a fixed PNG, or failing on demand
#[derive(Debug, Default)]
pub struct FakeThumbnailer {
    fail: AtomicBool,
    panic: AtomicBool,
    calls: AtomicUsize,
}

impl FakeThumbnailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        let thumbnailer = Self::default();
        thumbnailer.fail.store(true, Ordering::SeqCst);
        thumbnailer
    }

    /// Panics inside the recording task
    pub fn panicking() -> Self {
        let thumbnailer = Self::default();
        thumbnailer.panic.store(true, Ordering::SeqCst);
        thumbnailer
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ThumbnailExtractor for FakeThumbnailer {
    async fn extract(&self, _data: &[u8], _mime_type: &str, duration_secs: f64) -> Result<Thumbnail, RecorderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.panic.load(Ordering::SeqCst) {
            panic!("thumbnailer crashed");
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(RecorderError::Thumbnail("no decodable frame".to_string()));
        }
        Ok(Thumbnail {
            data: vec![0x89, b'P', b'N', b'G'],
            mime_type: "image/png".to_string(),
            at_secs: (duration_secs / 2.0).min(1.0),
        })
    }
}
