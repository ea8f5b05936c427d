//! Stream recorder
//!
//! Feeds the frames and samples of one live stream into an encoder and
//! collects the container fragments it emits. Finalizing concatenates the
//! fragments into one blob.

use super::encoder::{ActiveEncoder, AudioInput, EncoderBackend, EncoderSettings, VideoInput};
use super::error::RecorderError;
use super::format::{negotiate, MediaFormat};
use crate::media::{MediaEvent, MediaStream, TrackId, TrackSettings};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Encoder knobs that come from configuration
#[derive(Debug, Clone, PartialEq)]
pub struct RecorderOptions {
    pub video_bitrate: Option<u32>,
    pub audio_bitrate: Option<u32>,
    pub timeslice: Duration,
}

/// Ordered encoder output
#[derive(Debug, Default)]
struct ChunkLog {
    chunks: Vec<Vec<u8>>,
    bytes: usize,
}

impl ChunkLog {
    fn push(&mut self, chunk: Vec<u8>) {
        if chunk.is_empty() {
            return;
        }
        self.bytes += chunk.len();
        self.chunks.push(chunk);
    }

    fn concat(self) -> Vec<u8> {
        let mut blob = Vec::with_capacity(self.bytes);
        for chunk in self.chunks {
            blob.extend_from_slice(&chunk);
        }
        blob
    }
}

struct ActiveRecording {
    encoder: Box<dyn ActiveEncoder>,
    format: MediaFormat,
    video_track: Option<TrackId>,
    audio_track: Option<TrackId>,
    chunks: ChunkLog,
    paused: bool,
}

pub struct StreamRecorder {
    backend: Arc<dyn EncoderBackend>,
    active: Option<ActiveRecording>,
}

impl StreamRecorder {
    pub fn new(backend: Arc<dyn EncoderBackend>) -> Self {
        Self { backend, active: None }
    }

    /// Negotiate a format and start encoding `stream`.
    ///
    /// Returns the receiver the encoder reports chunks on; every event from
    /// it must be passed back through [`StreamRecorder::handle_event`] until
    /// [`StreamRecorder::stop`] takes over.
    pub async fn start(
        &mut self,
        stream: &MediaStream,
        preferences: &[String],
        options: &RecorderOptions,
    ) -> Result<mpsc::UnboundedReceiver<MediaEvent>, RecorderError> {
        if self.active.is_some() {
            return Err(RecorderError::AlreadyRecording);
        }

        let capabilities = self.backend.capabilities();
        if !capabilities.media_recorder {
            return Err(RecorderError::NotSupported);
        }
        let format = negotiate(preferences, &capabilities)?;

        let video = stream.video_tracks().into_iter().find(|t| t.is_live());
        let audio = stream.audio_tracks().into_iter().find(|t| t.is_live());

        let video_input = match (&video, format.is_video()) {
            (Some(track), true) => match track.settings() {
                TrackSettings::Video {
                    width,
                    height,
                    frame_rate,
                } => Some(VideoInput {
                    width,
                    height,
                    frame_rate,
                }),
                TrackSettings::Audio { .. } => None,
            },
            (None, true) => {
                return Err(RecorderError::RecordingFailed("stream has no live video track".to_string()));
            }
            (_, false) => None,
        };
        let audio_input = audio.as_ref().and_then(|track| match track.settings() {
            TrackSettings::Audio { sample_rate, channels } => Some(AudioInput { sample_rate, channels }),
            TrackSettings::Video { .. } => None,
        });
        if video_input.is_none() && audio_input.is_none() {
            return Err(RecorderError::RecordingFailed("stream has no live tracks".to_string()));
        }

        let settings = EncoderSettings {
            format: format.clone(),
            video: video_input,
            audio: audio_input,
            video_bitrate: options.video_bitrate,
            audio_bitrate: options.audio_bitrate,
            timeslice: options.timeslice,
        };

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let encoder = self.backend.start(&settings, events_tx).await?;
        tracing::info!(
            "Recorder started with {} backend: {} (video: {}, audio: {})",
            self.backend.name(),
            format.mime_type,
            video_input.is_some(),
            audio_input.is_some()
        );

        self.active = Some(ActiveRecording {
            encoder,
            format,
            video_track: video_input.and(video.map(|t| t.id())),
            audio_track: audio_input.and(audio.map(|t| t.id())),
            chunks: ChunkLog::default(),
            paused: false,
        });
        Ok(events_rx)
    }

    /// Route a stream or encoder event. Input is dropped while paused.
    pub fn handle_event(&mut self, event: &MediaEvent) -> Result<(), RecorderError> {
        let Some(active) = self.active.as_mut() else {
            return Ok(());
        };

        match event {
            MediaEvent::FrameReady { track, frame } if Some(*track) == active.video_track => {
                if !active.paused {
                    active.encoder.push_frame(frame)?;
                }
            }
            MediaEvent::AudioReady { track, chunk } if Some(*track) == active.audio_track => {
                if !active.paused {
                    active.encoder.push_audio(&chunk.samples, chunk.sample_rate, chunk.channels)?;
                }
            }
            MediaEvent::EncoderChunk(bytes) => active.chunks.push(bytes.clone()),
            _ => {}
        }
        Ok(())
    }

    /// Returns `false` when not recording or already paused
    pub fn pause(&mut self) -> bool {
        match self.active.as_mut() {
            Some(active) if !active.paused => {
                active.paused = true;
                active.encoder.pause();
                true
            }
            _ => false,
        }
    }

    /// Returns `false` when not recording or not paused
    pub fn resume(&mut self) -> bool {
        match self.active.as_mut() {
            Some(active) if active.paused => {
                active.paused = false;
                active.encoder.resume();
                true
            }
            _ => false,
        }
    }

    pub fn is_recording(&self) -> bool {
        self.active.is_some()
    }

    pub fn is_paused(&self) -> bool {
        self.active.as_ref().is_some_and(|a| a.paused)
    }

    /// Whether `track` feeds the current recording
    pub fn uses_track(&self, track: TrackId) -> bool {
        self.active
            .as_ref()
            .is_some_and(|a| a.video_track == Some(track) || a.audio_track == Some(track))
    }

    pub fn chunk_count(&self) -> usize {
        self.active.as_ref().map(|a| a.chunks.chunks.len()).unwrap_or(0)
    }

    pub fn format(&self) -> Option<&MediaFormat> {
        self.active.as_ref().map(|a| &a.format)
    }

    /// Finish the encoder and collect what is left on `events`.
    ///
    /// Returns `Ok(None)` when nothing was recording.
    pub async fn stop(
        &mut self,
        events: &mut mpsc::UnboundedReceiver<MediaEvent>,
    ) -> Result<Option<(Vec<u8>, MediaFormat)>, RecorderError> {
        let Some(mut active) = self.active.take() else {
            return Ok(None);
        };

        let finished = active.encoder.finish().await;

        let mut failure = None;
        while let Some(event) = events.recv().await {
            match event {
                MediaEvent::EncoderChunk(bytes) => active.chunks.push(bytes),
                MediaEvent::Finalized => break,
                MediaEvent::EncoderFailed(reason) => {
                    failure = Some(reason);
                    break;
                }
                _ => {}
            }
        }

        finished?;
        if let Some(reason) = failure {
            return Err(RecorderError::RecordingFailed(reason));
        }

        tracing::info!(
            "Recorder finalized {} chunk(s), {} bytes",
            active.chunks.chunks.len(),
            active.chunks.bytes
        );
        Ok(Some((active.chunks.concat(), active.format)))
    }
}
