//! Error types and handling
//!
//! Common error types used across the studio, plus the single-slot error
//! holder each component exposes to the UI glue.

use crate::capture::CaptureError;
use crate::compositor::CompositorError;
use crate::config::ConfigError;
use crate::ffmpeg::FfmpegError;
use crate::recorder::RecorderError;
use crate::storage::StorageError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Studio-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Compositor(#[from] CompositorError),

    #[error(transparent)]
    Recorder(#[from] RecorderError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Ffmpeg(#[from] FfmpegError),

    #[error("Camera is not ready")]
    CameraNotReady,

    #[error("No finished recording available")]
    NoRecording,
}

/// Error response for the UI layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl From<&AppError> for ErrorResponse {
    fn from(error: &AppError) -> Self {
        let code = match error {
            AppError::Io(_) => "IO_ERROR",
            AppError::Serialization(_) => "SERIALIZATION_ERROR",
            AppError::Config(_) => "CONFIG_ERROR",
            AppError::Capture(e) => e.code(),
            AppError::Compositor(_) => "COMPOSITOR_ERROR",
            AppError::Recorder(e) => e.code(),
            AppError::Storage(_) => "STORAGE_ERROR",
            AppError::Ffmpeg(_) => "FFMPEG_ERROR",
            AppError::CameraNotReady => "CAMERA_NOT_READY",
            AppError::NoRecording => "NO_RECORDING",
        };

        let message = match error {
            AppError::Capture(e) => e.user_message(),
            other => other.to_string(),
        };

        ErrorResponse {
            code: code.to_string(),
            message,
        }
    }
}

impl From<AppError> for ErrorResponse {
    fn from(error: AppError) -> Self {
        ErrorResponse::from(&error)
    }
}

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;

/// Holds at most one current error for a component.
///
/// Setting a new error replaces the previous one. Nothing is accumulated;
/// callers clear the slot before retrying anything gated on it being empty.
#[derive(Debug)]
pub struct ErrorSlot<E> {
    current: Mutex<Option<E>>,
}

impl<E: Clone> ErrorSlot<E> {
    pub fn new() -> Self {
        Self {
            current: Mutex::new(None),
        }
    }

    /// Store `error`, returning whatever it replaced.
    pub fn set(&self, error: E) -> Option<E> {
        self.current.lock().replace(error)
    }

    pub fn get(&self) -> Option<E> {
        self.current.lock().clone()
    }

    pub fn is_set(&self) -> bool {
        self.current.lock().is_some()
    }

    /// Reset the slot, returning the error that was present.
    pub fn clear(&self) -> Option<E> {
        self.current.lock().take()
    }
}

impl<E: Clone> Default for ErrorSlot<E> {
    fn default() -> Self {
        Self::new()
    }
}
