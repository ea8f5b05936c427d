//! Capture trait definitions
//!
//! Platform-agnostic device types and the backend seam the capture source
//! talks to.

use super::error::CaptureError;
use crate::config::{RecordingMode, StudioConfig};
use crate::media::{Capabilities, MediaStream};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Information about an audio device
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioDeviceInfo {
    /// Unique device ID
    pub id: String,

    /// Device name
    pub name: String,

    /// Whether this is the default device
    pub is_default: bool,
}

/// Information about a camera/webcam
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraInfo {
    /// Unique device ID
    pub id: String,

    /// Device name
    pub name: String,

    /// Supported resolutions
    pub supported_resolutions: Vec<Resolution>,
}

/// Video resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

/// Ideal video parameters; backends pick the closest they can deliver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoConstraints {
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
    pub device_id: Option<String>,
}

/// Ideal audio parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioConstraints {
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub sample_rate: u32,
    pub channels: u16,
    pub device_id: Option<String>,
}

/// What to acquire from the devices
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureConstraints {
    pub video: Option<VideoConstraints>,
    pub audio: Option<AudioConstraints>,
}

impl CaptureConstraints {
    /// Constraints for a recording mode: microphone always, camera for video
    pub fn for_mode(config: &StudioConfig, mode: RecordingMode) -> Self {
        let audio = Some(AudioConstraints {
            echo_cancellation: config.echo_cancellation,
            noise_suppression: config.noise_suppression,
            sample_rate: 48_000,
            channels: 1,
            device_id: None,
        });

        let video = match mode {
            RecordingMode::Video => Some(VideoConstraints {
                width: config.width,
                height: config.height,
                frame_rate: config.frame_rate,
                device_id: None,
            }),
            RecordingMode::Audio => None,
        };

        Self { video, audio }
    }
}

/// Releases the OS-level device lock when dropped or released
pub trait DeviceLease: Send + Sync {
    fn release(&mut self);
}

/// A freshly acquired device stream plus the lock that keeps it open
pub struct AcquiredDevice {
    pub stream: MediaStream,
    pub lease: Box<dyn DeviceLease>,
}

/// Source of live device streams
#[async_trait]
pub trait CaptureBackend: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &str;

    /// Whether device capture works at all on this host
    fn capabilities(&self) -> Capabilities;

    /// Enumerate cameras
    fn cameras(&self) -> Vec<CameraInfo>;

    /// Enumerate microphones
    fn microphones(&self) -> Vec<AudioDeviceInfo>;

    /// Open the devices described by `constraints`
    async fn acquire(&self, constraints: &CaptureConstraints) -> Result<AcquiredDevice, CaptureError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constraints_follow_mode() {
        let config = StudioConfig::default();

        let video = CaptureConstraints::for_mode(&config, RecordingMode::Video);
        let v = video.video.unwrap();
        assert_eq!((v.width, v.height, v.frame_rate), (640, 480, 30));
        assert!(video.audio.unwrap().echo_cancellation);

        let audio = CaptureConstraints::for_mode(&config, RecordingMode::Audio);
        assert!(audio.video.is_none());
        assert!(audio.audio.is_some());
    }
}
