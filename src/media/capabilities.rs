//! Normalized host capability set
//!
//! Backends report what they can do through this one type instead of callers
//! probing the environment themselves.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    /// Camera/microphone acquisition is possible
    pub media_devices: bool,
    /// Live streams can be encoded
    pub media_recorder: bool,
    /// Composited output can be captured as a stream
    pub canvas_capture: bool,
    /// Normalized mime types the recorder accepts
    pub mime_types: BTreeSet<String>,
}

impl Capabilities {
    pub fn is_type_supported(&self, mime_type: &str) -> bool {
        self.mime_types.contains(&normalize_mime(mime_type))
    }

    pub fn with_mime_type(mut self, mime_type: &str) -> Self {
        self.mime_types.insert(normalize_mime(mime_type));
        self
    }

    /// Union of two partial capability reports
    pub fn merge(mut self, other: Capabilities) -> Self {
        self.media_devices |= other.media_devices;
        self.media_recorder |= other.media_recorder;
        self.canvas_capture |= other.canvas_capture;
        self.mime_types.extend(other.mime_types);
        self
    }
}

/// Lowercase and strip whitespace so `video/webm; codecs="vp9, opus"` and
/// `video/webm;codecs=vp9,opus` compare equal.
pub fn normalize_mime(mime_type: &str) -> String {
    mime_type
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '"')
        .collect::<String>()
        .to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mime_lookup_is_normalized() {
        let caps = Capabilities::default().with_mime_type("video/webm;codecs=vp9,opus");
        assert!(caps.is_type_supported("Video/WebM; codecs=\"vp9, opus\""));
        assert!(!caps.is_type_supported("video/webm;codecs=vp8,opus"));
    }

    #[test]
    fn test_merge_combines_reports() {
        let capture = Capabilities {
            media_devices: true,
            ..Default::default()
        };
        let recorder = Capabilities {
            media_recorder: true,
            ..Default::default()
        }
        .with_mime_type("audio/webm");

        let merged = capture.merge(recorder);
        assert!(merged.media_devices);
        assert!(merged.media_recorder);
        assert!(!merged.canvas_capture);
        assert!(merged.is_type_supported("audio/webm"));
    }
}
