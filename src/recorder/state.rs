//! Recording state management
//!
//! Defines the recording state machine, the session clock and the finished
//! artifact.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Current state of a recording session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingState {
    /// Not recording; may hold a finished artifact
    #[default]
    Idle,
    /// Currently recording
    Recording,
    /// Recording is paused
    Paused,
}

/// Why a recording ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StopReason {
    Manual,
    MaxDuration,
    DeviceLost,
    EncoderFailed,
    Teardown,
}

/// One uninterrupted stretch of recording.
///
/// A new segment starts each time recording is resumed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    pub index: usize,
    pub started_at: DateTime<Utc>,
    pub duration_ms: f64,
}

/// Elapsed time that only advances while recording
#[derive(Debug, Clone, Default)]
pub struct SessionClock {
    accumulated: Duration,
    running_since: Option<Instant>,
    segments: Vec<Segment>,
}

impl SessionClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset and start running
    pub fn start(&mut self, now: Instant) {
        self.reset();
        self.open_segment(now);
    }

    /// Freeze elapsed time. Returns `false` if it was not running.
    pub fn pause(&mut self, now: Instant) -> bool {
        let Some(since) = self.running_since.take() else {
            return false;
        };
        let span = now.saturating_duration_since(since);
        self.accumulated += span;
        if let Some(segment) = self.segments.last_mut() {
            segment.duration_ms = span.as_secs_f64() * 1000.0;
        }
        true
    }

    /// Continue after a pause. Returns `false` if running or never started.
    pub fn resume(&mut self, now: Instant) -> bool {
        if self.running_since.is_some() || self.segments.is_empty() {
            return false;
        }
        self.open_segment(now);
        true
    }

    /// Stop for good and return the total
    pub fn stop(&mut self, now: Instant) -> Duration {
        self.pause(now);
        self.accumulated
    }

    pub fn elapsed(&self, now: Instant) -> Duration {
        let running = self
            .running_since
            .map(|since| now.saturating_duration_since(since))
            .unwrap_or_default();
        self.accumulated + running
    }

    pub fn is_running(&self) -> bool {
        self.running_since.is_some()
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn reset(&mut self) {
        self.accumulated = Duration::ZERO;
        self.running_since = None;
        self.segments.clear();
    }

    fn open_segment(&mut self, now: Instant) {
        self.running_since = Some(now);
        self.segments.push(Segment {
            index: self.segments.len(),
            started_at: Utc::now(),
            duration_ms: 0.0,
        });
    }
}

/// Still frame derived from a video recording
#[derive(Debug, Clone, PartialEq)]
pub struct Thumbnail {
    pub data: Vec<u8>,
    pub mime_type: String,
    /// Position of the frame in the recording
    pub at_secs: f64,
}

/// A finished recording. Immutable once built.
#[derive(Debug, Clone)]
pub struct RecordingArtifact {
    data: Arc<[u8]>,
    mime_type: String,
    duration_secs: f64,
    created_at: DateTime<Utc>,
    thumbnail: Option<Thumbnail>,
}

impl RecordingArtifact {
    pub fn new(data: Vec<u8>, mime_type: impl Into<String>, duration_secs: f64, thumbnail: Option<Thumbnail>) -> Self {
        Self {
            data: Arc::from(data),
            mime_type: mime_type.into(),
            duration_secs,
            created_at: Utc::now(),
            thumbnail,
        }
    }

    pub fn data(&self) -> &Arc<[u8]> {
        &self.data
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn duration_secs(&self) -> f64 {
        self.duration_secs
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn thumbnail(&self) -> Option<&Thumbnail> {
        self.thumbnail.as_ref()
    }

    pub fn size_bytes(&self) -> usize {
        self.data.len()
    }

    pub fn is_video(&self) -> bool {
        self.mime_type.starts_with("video/")
    }
}
