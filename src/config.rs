//! Studio configuration
//!
//! Every field has a default so a partial JSON file (or none at all) yields a
//! working configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Environment variable pointing at a JSON config file.
pub const CONFIG_ENV_VAR: &str = "VOX_OPERIS_CONFIG";

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config value: {0}")]
    Invalid(String),
}

/// Whether the studio records a voice-over (audio only) or a video take
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RecordingMode {
    Audio,
    #[default]
    Video,
}

impl RecordingMode {
    /// Mime family accepted for uploads in this mode
    pub fn mime_family(&self) -> &'static str {
        match self {
            RecordingMode::Audio => "audio/",
            RecordingMode::Video => "video/",
        }
    }
}

/// Tunables consumed by the capture, compositing and recording pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StudioConfig {
    /// Recording cap in seconds
    pub max_duration_secs: u32,

    /// Capture and compositing surface width
    pub width: u32,

    /// Capture and compositing surface height
    pub height: u32,

    /// Output frame rate of the composited stream
    pub frame_rate: u32,

    /// Rate of the per-frame render callback (display refresh)
    pub animation_fps: u32,

    /// Opacity of the camera frame drawn over color/image backgrounds
    pub overlay_opacity: f32,

    /// Best-effort encoder bitrates (ignored when the encoder rejects them)
    pub video_bitrate: Option<u32>,
    pub audio_bitrate: Option<u32>,

    /// Interval at which encoded fragments are collected
    pub timeslice_ms: u64,

    /// Duration tick granularity
    pub tick_ms: u64,

    pub echo_cancellation: bool,
    pub noise_suppression: bool,

    /// Ordered container/codec preferences for video recordings
    pub video_mime_types: Vec<String>,

    /// Ordered container/codec preferences for audio recordings
    pub audio_mime_types: Vec<String>,

    /// Upload size ceiling enforced by the local store
    pub max_upload_bytes: u64,

    /// Root directory for the local artifact store
    pub storage_dir: PathBuf,
}

impl Default for StudioConfig {
    fn default() -> Self {
        Self {
            max_duration_secs: 120,
            width: 640,
            height: 480,
            frame_rate: 30,
            animation_fps: 60,
            overlay_opacity: 0.8,
            video_bitrate: Some(2_500_000),
            audio_bitrate: Some(128_000),
            timeslice_ms: 100,
            tick_ms: 100,
            echo_cancellation: true,
            noise_suppression: true,
            video_mime_types: vec![
                "video/webm;codecs=vp9,opus".to_string(),
                "video/webm;codecs=vp8,opus".to_string(),
                "video/webm".to_string(),
            ],
            audio_mime_types: vec![
                "audio/webm;codecs=opus".to_string(),
                "audio/ogg;codecs=opus".to_string(),
                "audio/webm".to_string(),
            ],
            max_upload_bytes: 100 * 1024 * 1024,
            storage_dir: std::env::temp_dir().join("vox-operis"),
        }
    }
}

impl StudioConfig {
    /// Load and validate a config file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_json(&content)?;
        tracing::debug!("Loaded studio config from {:?}", path);
        Ok(config)
    }

    /// Parse and validate a JSON document
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let config: StudioConfig = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `VOX_OPERIS_CONFIG` if set, defaults otherwise
    pub fn from_env() -> Result<Self, ConfigError> {
        match std::env::var_os(CONFIG_ENV_VAR) {
            Some(path) => Self::load(Path::new(&path)),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.width == 0 || self.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "surface must be non-empty, got {}x{}",
                self.width, self.height
            )));
        }
        if self.frame_rate == 0 || self.animation_fps == 0 {
            return Err(ConfigError::Invalid("frame rates must be positive".to_string()));
        }
        if self.max_duration_secs == 0 {
            return Err(ConfigError::Invalid("maxDurationSecs must be positive".to_string()));
        }
        if self.timeslice_ms == 0 || self.tick_ms == 0 {
            return Err(ConfigError::Invalid("timesliceMs and tickMs must be positive".to_string()));
        }
        if !(0.0..=1.0).contains(&self.overlay_opacity) {
            return Err(ConfigError::Invalid(format!(
                "overlayOpacity must be within 0..=1, got {}",
                self.overlay_opacity
            )));
        }
        if self.video_mime_types.is_empty() || self.audio_mime_types.is_empty() {
            return Err(ConfigError::Invalid("mime preference lists must not be empty".to_string()));
        }
        Ok(())
    }

    /// Mime preferences for the given mode
    pub fn mime_preferences(&self, mode: RecordingMode) -> &[String] {
        match mode {
            RecordingMode::Audio => &self.audio_mime_types,
            RecordingMode::Video => &self.video_mime_types,
        }
    }
}
