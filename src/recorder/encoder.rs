//! Encoder seams
//!
//! An [`EncoderBackend`] opens an [`ActiveEncoder`] per recording. Encoded
//! container fragments come back as [`MediaEvent::EncoderChunk`] on the
//! channel handed to `start`, followed by [`MediaEvent::Finalized`] or
//! [`MediaEvent::EncoderFailed`].

use super::error::RecorderError;
use super::format::MediaFormat;
use super::state::Thumbnail;
use crate::media::{Capabilities, MediaEvent, VideoFrame};
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoInput {
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioInput {
    pub sample_rate: u32,
    pub channels: u16,
}

/// Everything an encoder needs to know up front
#[derive(Debug, Clone, PartialEq)]
pub struct EncoderSettings {
    pub format: MediaFormat,
    pub video: Option<VideoInput>,
    pub audio: Option<AudioInput>,
    /// Best effort; encoders may ignore them
    pub video_bitrate: Option<u32>,
    pub audio_bitrate: Option<u32>,
    /// How often buffered output is flushed as a chunk
    pub timeslice: Duration,
}

#[async_trait]
pub trait EncoderBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Formats this backend can produce
    fn capabilities(&self) -> Capabilities;

    async fn start(
        &self,
        settings: &EncoderSettings,
        events: mpsc::UnboundedSender<MediaEvent>,
    ) -> Result<Box<dyn ActiveEncoder>, RecorderError>;
}

/// A running encode
#[async_trait]
pub trait ActiveEncoder: Send {
    fn push_frame(&mut self, frame: &VideoFrame) -> Result<(), RecorderError>;

    fn push_audio(&mut self, samples: &[f32], sample_rate: u32, channels: u16) -> Result<(), RecorderError>;

    /// Stop consuming input until resumed
    fn pause(&mut self);

    fn resume(&mut self);

    /// Flush and close. All remaining chunks are sent before this returns.
    async fn finish(self: Box<Self>) -> Result<(), RecorderError>;
}

/// Derives a still image from a finished recording
#[async_trait]
pub trait ThumbnailExtractor: Send + Sync {
    async fn extract(&self, data: &[u8], mime_type: &str, duration_secs: f64) -> Result<Thumbnail, RecorderError>;
}
