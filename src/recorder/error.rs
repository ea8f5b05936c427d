//! Recorder errors

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecorderError {
    #[error("None of the preferred recording formats is supported")]
    UnsupportedFormat,

    #[error("Recording is not supported on this host")]
    NotSupported,

    #[error("Recording was blocked by the host: {0}")]
    SecurityBlocked(String),

    #[error("Recording failed: {0}")]
    RecordingFailed(String),

    #[error("A recording is already in progress")]
    AlreadyRecording,

    #[error("No recording in progress")]
    NotRecording,

    #[error("The recording device was disconnected")]
    DeviceLost,

    #[error("Thumbnail generation failed: {0}")]
    Thumbnail(String),

    #[error("The previous recording error has not been dismissed")]
    ErrorNotCleared,
}

impl RecorderError {
    pub fn code(&self) -> &'static str {
        match self {
            RecorderError::UnsupportedFormat => "UNSUPPORTED_FORMAT",
            RecorderError::NotSupported => "RECORDING_NOT_SUPPORTED",
            RecorderError::SecurityBlocked(_) => "SECURITY_BLOCKED",
            RecorderError::RecordingFailed(_) => "RECORDING_FAILED",
            RecorderError::AlreadyRecording => "ALREADY_RECORDING",
            RecorderError::NotRecording => "NOT_RECORDING",
            RecorderError::DeviceLost => "DEVICE_LOST",
            RecorderError::Thumbnail(_) => "THUMBNAIL_FAILED",
            RecorderError::ErrorNotCleared => "ERROR_NOT_CLEARED",
        }
    }

    /// Map an encoder start failure to the closest category
    pub fn from_start_failure(message: &str) -> Self {
        let lower = message.to_ascii_lowercase();
        if lower.contains("permission denied") || lower.contains("operation not permitted") {
            RecorderError::SecurityBlocked(message.to_string())
        } else {
            RecorderError::RecordingFailed(message.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_failure_classification() {
        assert!(matches!(
            RecorderError::from_start_failure("Permission denied (os error 13)"),
            RecorderError::SecurityBlocked(_)
        ));
        assert!(matches!(
            RecorderError::from_start_failure("No such file or directory"),
            RecorderError::RecordingFailed(_)
        ));
        assert_eq!(RecorderError::UnsupportedFormat.code(), "UNSUPPORTED_FORMAT");
    }
}
