//! Media streams and tracks
//!
//! A [`MediaStream`] is a handle: cloning it shares the same tracks and event
//! bus. Producing a *new* track from an existing one goes through
//! [`MediaStream::clone_track_into`], which leaves the source untouched.

use super::events::{AudioChunk, MediaEvent};
use super::frame::VideoFrame;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use uuid::Uuid;

pub type TrackId = Uuid;

/// Capacity of a stream's event bus. Slow consumers lag and drop frames.
const BUS_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

/// Negotiated settings of a live track
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum TrackSettings {
    #[serde(rename_all = "camelCase")]
    Video {
        width: u32,
        height: u32,
        frame_rate: u32,
    },
    #[serde(rename_all = "camelCase")]
    Audio { sample_rate: u32, channels: u16 },
}

impl TrackSettings {
    pub fn kind(&self) -> TrackKind {
        match self {
            TrackSettings::Video { .. } => TrackKind::Video,
            TrackSettings::Audio { .. } => TrackKind::Audio,
        }
    }
}

#[derive(Debug)]
struct TrackShared {
    ended: watch::Sender<bool>,
}

/// One audio or video track
#[derive(Debug, Clone)]
pub struct MediaTrack {
    id: TrackId,
    label: String,
    settings: TrackSettings,
    shared: Arc<TrackShared>,
}

impl MediaTrack {
    fn new(label: impl Into<String>, settings: TrackSettings) -> Self {
        let (ended, _) = watch::channel(false);
        Self {
            id: Uuid::new_v4(),
            label: label.into(),
            settings,
            shared: Arc::new(TrackShared { ended }),
        }
    }

    pub fn id(&self) -> TrackId {
        self.id
    }

    pub fn kind(&self) -> TrackKind {
        self.settings.kind()
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn settings(&self) -> TrackSettings {
        self.settings
    }

    pub fn is_live(&self) -> bool {
        !*self.shared.ended.borrow()
    }

    /// End the track. Returns `true` only for the call that ended it.
    pub fn stop(&self) -> bool {
        let was_ended = self.shared.ended.send_replace(true);
        if !was_ended {
            tracing::debug!("Track {} ({}) stopped", self.label, self.id);
        }
        !was_ended
    }

    /// Resolves once the track has ended
    pub async fn ended(&self) {
        let mut rx = self.shared.ended.subscribe();
        loop {
            let ended = *rx.borrow_and_update();
            if ended {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Producer side of a track: publishes onto the owning stream's bus
#[derive(Debug, Clone)]
pub struct TrackWriter {
    track: MediaTrack,
    bus: broadcast::Sender<MediaEvent>,
}

impl TrackWriter {
    pub fn track(&self) -> &MediaTrack {
        &self.track
    }

    pub fn is_live(&self) -> bool {
        self.track.is_live()
    }

    /// Publish a frame. Returns `false` once the track has ended.
    pub fn publish_frame(&self, frame: Arc<VideoFrame>) -> bool {
        if !self.track.is_live() {
            return false;
        }
        // No subscribers is not an error; nobody is watching yet
        let _ = self.bus.send(MediaEvent::FrameReady {
            track: self.track.id,
            frame,
        });
        true
    }

    /// Publish PCM. Returns `false` once the track has ended.
    pub fn publish_audio(&self, chunk: AudioChunk) -> bool {
        if !self.track.is_live() {
            return false;
        }
        let _ = self.bus.send(MediaEvent::AudioReady {
            track: self.track.id,
            chunk: Arc::new(chunk),
        });
        true
    }

    /// Signal that the device behind this track went away
    pub fn device_lost(&self) {
        if self.track.stop() {
            tracing::warn!("Device lost for track {} ({})", self.track.label, self.track.id);
            let _ = self.bus.send(MediaEvent::DeviceLost {
                track: self.track.id,
            });
        }
    }
}

/// A set of live tracks sharing one event bus
#[derive(Debug, Clone)]
pub struct MediaStream {
    id: Uuid,
    tracks: Vec<MediaTrack>,
    bus: broadcast::Sender<MediaEvent>,
}

impl MediaStream {
    pub fn new() -> Self {
        let (bus, _) = broadcast::channel(BUS_CAPACITY);
        Self {
            id: Uuid::new_v4(),
            tracks: Vec::new(),
            bus,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Add a new track and return its producer handle
    pub fn add_track(&mut self, label: impl Into<String>, settings: TrackSettings) -> TrackWriter {
        let track = MediaTrack::new(label, settings);
        self.tracks.push(track.clone());
        TrackWriter {
            track,
            bus: self.bus.clone(),
        }
    }

    pub fn tracks(&self) -> &[MediaTrack] {
        &self.tracks
    }

    pub fn track(&self, id: TrackId) -> Option<&MediaTrack> {
        self.tracks.iter().find(|t| t.id == id)
    }

    pub fn video_tracks(&self) -> Vec<MediaTrack> {
        self.tracks_of(TrackKind::Video)
    }

    pub fn audio_tracks(&self) -> Vec<MediaTrack> {
        self.tracks_of(TrackKind::Audio)
    }

    fn tracks_of(&self, kind: TrackKind) -> Vec<MediaTrack> {
        self.tracks.iter().filter(|t| t.kind() == kind).cloned().collect()
    }

    pub fn has_video(&self) -> bool {
        self.tracks.iter().any(|t| t.kind() == TrackKind::Video)
    }

    /// A stream is live while any of its tracks is
    pub fn is_live(&self) -> bool {
        self.tracks.iter().any(MediaTrack::is_live)
    }

    /// Listen to frames, audio and device events
    pub fn subscribe(&self) -> broadcast::Receiver<MediaEvent> {
        self.bus.subscribe()
    }

    /// Stop every track. Returns how many were still live.
    pub fn stop_all(&self) -> usize {
        self.tracks.iter().filter(|t| t.stop()).count()
    }

    /// Clone `source` (a track of this stream) into `target` as a new,
    /// independently stoppable track. Samples and frames are forwarded until
    /// the clone is stopped or the source device is lost.
    ///
    /// Must be called from within a tokio runtime.
    pub fn clone_track_into(&self, source: &MediaTrack, target: &mut MediaStream) -> MediaTrack {
        let writer = target.add_track(format!("{} (clone)", source.label()), source.settings());
        let clone = writer.track().clone();
        let source_id = source.id();
        let mut rx = self.bus.subscribe();

        tokio::spawn(async move {
            let clone_track = writer.track().clone();
            loop {
                tokio::select! {
                    _ = clone_track.ended() => break,
                    event = rx.recv() => match event {
                        Ok(MediaEvent::AudioReady { track, chunk }) if track == source_id => {
                            if !writer.publish_audio(chunk.as_ref().clone()) {
                                break;
                            }
                        }
                        Ok(MediaEvent::FrameReady { track, frame }) if track == source_id => {
                            if !writer.publish_frame(frame) {
                                break;
                            }
                        }
                        Ok(MediaEvent::DeviceLost { track }) if track == source_id => {
                            writer.device_lost();
                            break;
                        }
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::debug!("Track clone lagged, dropped {} events", skipped);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        });

        clone
    }
}

impl Default for MediaStream {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn audio_settings() -> TrackSettings {
        TrackSettings::Audio {
            sample_rate: 48_000,
            channels: 1,
        }
    }

    #[test]
    fn test_stop_is_idempotent() {
        let mut stream = MediaStream::new();
        let writer = stream.add_track(
            "cam",
            TrackSettings::Video {
                width: 4,
                height: 4,
                frame_rate: 30,
            },
        );
        assert!(stream.is_live());
        assert_eq!(stream.stop_all(), 1);
        assert_eq!(stream.stop_all(), 0);
        assert!(!stream.is_live());
        assert!(!writer.publish_frame(Arc::new(VideoFrame::new(4, 4))));
    }

    #[tokio::test]
    async fn test_clone_forwards_audio_and_stops_independently() {
        let mut source = MediaStream::new();
        let mic = source.add_track("mic", audio_settings());

        let mut target = MediaStream::new();
        let clone = source.clone_track_into(mic.track(), &mut target);
        let mut target_rx = target.subscribe();

        // Let the forwarder subscribe before publishing
        tokio::task::yield_now().await;
        mic.publish_audio(AudioChunk {
            sample_rate: 48_000,
            channels: 1,
            samples: vec![0.25; 480],
        });

        let event = tokio::time::timeout(Duration::from_secs(1), target_rx.recv())
            .await
            .unwrap()
            .unwrap();
        match event {
            MediaEvent::AudioReady { track, chunk } => {
                assert_eq!(track, clone.id());
                assert_eq!(chunk.samples.len(), 480);
            }
            other => panic!("unexpected event {other:?}"),
        }

        // Stopping the clone leaves the source running
        assert!(clone.stop());
        assert!(mic.is_live());
        assert!(target.audio_tracks()[0].id() == clone.id());
    }

    #[tokio::test]
    async fn test_device_lost_propagates_to_clone() {
        let mut source = MediaStream::new();
        let mic = source.add_track("mic", audio_settings());
        let mut target = MediaStream::new();
        let clone = source.clone_track_into(mic.track(), &mut target);
        tokio::task::yield_now().await;

        mic.device_lost();
        tokio::time::timeout(Duration::from_secs(1), clone.ended())
            .await
            .unwrap();
        assert!(!clone.is_live());
    }
}
