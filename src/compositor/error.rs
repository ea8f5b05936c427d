//! Compositor errors

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompositorError {
    #[error("Compositor requires a running tokio runtime")]
    NoRuntime,

    #[error("Input stream has no video track")]
    NoVideoTrack,

    #[error("Invalid background color {0:?}")]
    InvalidColor(String),

    #[error("Failed to load background image {uri}: {reason}")]
    ImageLoad { uri: String, reason: String },

    #[error("Background image {0} is not decoded yet")]
    ImageNotReady(String),
}
