//! Container and codec negotiation

use super::error::RecorderError;
use crate::media::capabilities::normalize_mime;
use crate::media::Capabilities;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Container {
    WebM,
    Ogg,
    Mp4,
}

impl Container {
    /// ffmpeg muxer name
    pub fn muxer(&self) -> &'static str {
        match self {
            Container::WebM => "webm",
            Container::Ogg => "ogg",
            Container::Mp4 => "mp4",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Container::WebM => "webm",
            Container::Ogg => "ogg",
            Container::Mp4 => "mp4",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    Vp8,
    Vp9,
    H264,
}

impl VideoCodec {
    pub fn ffmpeg_encoder(&self) -> &'static str {
        match self {
            VideoCodec::Vp8 => "libvpx",
            VideoCodec::Vp9 => "libvpx-vp9",
            VideoCodec::H264 => "libx264",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioCodec {
    Opus,
    Vorbis,
    Aac,
}

impl AudioCodec {
    pub fn ffmpeg_encoder(&self) -> &'static str {
        match self {
            AudioCodec::Opus => "libopus",
            AudioCodec::Vorbis => "libvorbis",
            AudioCodec::Aac => "aac",
        }
    }
}

/// A parsed `type/subtype;codecs=...` recording format
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaFormat {
    pub mime_type: String,
    pub container: Container,
    pub video_codec: Option<VideoCodec>,
    pub audio_codec: AudioCodec,
}

impl MediaFormat {
    /// Parse a mime type. Unknown containers or codecs yield `None`.
    ///
    /// Without a `codecs` parameter the container default applies: VP8/Opus
    /// for WebM video, Opus for WebM and Ogg audio, H.264/AAC for MP4.
    pub fn parse(mime_type: &str) -> Option<Self> {
        let normalized = normalize_mime(mime_type);
        let mut parts = normalized.split(';');
        let base = parts.next()?;
        let codecs: Vec<&str> = parts
            .filter_map(|param| param.strip_prefix("codecs="))
            .flat_map(|list| list.split(','))
            .filter(|c| !c.is_empty())
            .collect();

        let (family, subtype) = base.split_once('/')?;
        let is_video = match family {
            "video" => true,
            "audio" => false,
            _ => return None,
        };
        let container = match subtype {
            "webm" => Container::WebM,
            "ogg" if !is_video => Container::Ogg,
            "mp4" => Container::Mp4,
            _ => return None,
        };

        let mut video_codec = None;
        let mut audio_codec = None;
        for codec in codecs {
            match codec {
                "vp8" => video_codec = Some(VideoCodec::Vp8),
                "vp9" | "vp09" => video_codec = Some(VideoCodec::Vp9),
                c if c == "h264" || c.starts_with("avc1") => video_codec = Some(VideoCodec::H264),
                "opus" => audio_codec = Some(AudioCodec::Opus),
                "vorbis" => audio_codec = Some(AudioCodec::Vorbis),
                c if c == "aac" || c.starts_with("mp4a") => audio_codec = Some(AudioCodec::Aac),
                _ => return None,
            }
        }

        let (default_video, default_audio) = match container {
            Container::WebM => (VideoCodec::Vp8, AudioCodec::Opus),
            Container::Ogg => (VideoCodec::Vp8, AudioCodec::Opus),
            Container::Mp4 => (VideoCodec::H264, AudioCodec::Aac),
        };

        if !is_video && video_codec.is_some() {
            return None;
        }

        Some(Self {
            mime_type: normalized.clone(),
            container,
            video_codec: if is_video {
                Some(video_codec.unwrap_or(default_video))
            } else {
                None
            },
            audio_codec: audio_codec.unwrap_or(default_audio),
        })
    }

    pub fn is_video(&self) -> bool {
        self.video_codec.is_some()
    }

    pub fn extension(&self) -> &'static str {
        self.container.extension()
    }
}

/// Pick the first preference the host can record
pub fn negotiate(preferences: &[String], capabilities: &Capabilities) -> Result<MediaFormat, RecorderError> {
    for preference in preferences {
        if !capabilities.is_type_supported(preference) {
            tracing::debug!("Recording format {} not supported", preference);
            continue;
        }
        if let Some(format) = MediaFormat::parse(preference) {
            tracing::info!("Negotiated recording format {}", format.mime_type);
            return Ok(format);
        }
    }
    Err(RecorderError::UnsupportedFormat)
}
