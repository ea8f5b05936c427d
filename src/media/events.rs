//! Media events
//!
//! Frames, audio, device loss and encoder output all travel as explicit
//! messages so every consumer can be driven by injected events in tests.

use super::frame::VideoFrame;
use super::stream::TrackId;
use std::sync::Arc;

/// Interleaved f32 PCM produced by an audio track
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<f32>,
}

impl AudioChunk {
    /// Duration of this chunk in seconds
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 || self.channels == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.channels as f64 / self.sample_rate as f64
    }
}

#[derive(Debug, Clone)]
pub enum MediaEvent {
    /// A video track produced a decodable frame
    FrameReady {
        track: TrackId,
        frame: Arc<VideoFrame>,
    },
    /// An audio track produced samples
    AudioReady {
        track: TrackId,
        chunk: Arc<AudioChunk>,
    },
    /// The device behind a track disappeared; the track has ended
    DeviceLost { track: TrackId },
    /// The encoder emitted a container fragment
    EncoderChunk(Vec<u8>),
    /// The encoder flushed its last fragment
    Finalized,
    /// The encoder died before finalizing
    EncoderFailed(String),
}
