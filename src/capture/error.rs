//! Capture errors
//!
//! None of these are retried automatically; the user decides when to try
//! again.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("Permission to use the camera or microphone was denied")]
    PermissionDenied,

    #[error("No camera or microphone was found")]
    DeviceNotFound,

    #[error("The camera or microphone is in use by another application")]
    DeviceBusy,

    #[error("Media capture is not supported on this host")]
    NotSupported,

    #[error("A device request is already in progress")]
    AcquisitionPending,

    #[error("The previous capture error has not been dismissed")]
    ErrorNotCleared,

    #[error("Capture backend error: {0}")]
    Backend(String),
}

impl CaptureError {
    /// Stable code for the UI layer
    pub fn code(&self) -> &'static str {
        match self {
            CaptureError::PermissionDenied => "PERMISSION_DENIED",
            CaptureError::DeviceNotFound => "DEVICE_NOT_FOUND",
            CaptureError::DeviceBusy => "DEVICE_BUSY",
            CaptureError::NotSupported => "NOT_SUPPORTED",
            CaptureError::AcquisitionPending => "ACQUISITION_PENDING",
            CaptureError::ErrorNotCleared => "ERROR_NOT_CLEARED",
            CaptureError::Backend(_) => "CAPTURE_ERROR",
        }
    }

    /// Message shown to the user
    pub fn user_message(&self) -> String {
        match self {
            CaptureError::PermissionDenied => {
                "Camera or microphone access was denied. Allow access in your system settings and try again.".to_string()
            }
            CaptureError::DeviceNotFound => {
                "No camera or microphone was found. Connect a device and try again.".to_string()
            }
            CaptureError::DeviceBusy => {
                "Your camera or microphone is being used by another application. Close it and try again.".to_string()
            }
            CaptureError::NotSupported => {
                "Recording is not supported here. You can upload a file instead.".to_string()
            }
            CaptureError::AcquisitionPending => "Still waiting for the device, please hold on.".to_string(),
            CaptureError::ErrorNotCleared => "Dismiss the previous error before trying again.".to_string(),
            CaptureError::Backend(detail) => format!("Could not start the camera or microphone: {}", detail),
        }
    }

    /// Whether this is the persistent "host cannot capture" condition
    pub fn is_capability_error(&self) -> bool {
        matches!(self, CaptureError::NotSupported)
    }
}

/// Classify a backend's free-form error text
pub fn classify_device_error(message: &str) -> CaptureError {
    let lower = message.to_ascii_lowercase();

    if ["permission", "denied", "not allowed", "unauthorized", "not authorized"]
        .iter()
        .any(|needle| lower.contains(needle))
    {
        return CaptureError::PermissionDenied;
    }
    if ["not found", "no device", "no camera", "no such device", "unavailable"]
        .iter()
        .any(|needle| lower.contains(needle))
    {
        return CaptureError::DeviceNotFound;
    }
    if ["busy", "in use", "could not start", "not readable"]
        .iter()
        .any(|needle| lower.contains(needle))
    {
        return CaptureError::DeviceBusy;
    }

    CaptureError::Backend(message.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_device_errors() {
        assert_eq!(classify_device_error("NotAllowedError: Permission denied"), CaptureError::PermissionDenied);
        assert_eq!(classify_device_error("Could not find camera: No such device"), CaptureError::DeviceNotFound);
        assert_eq!(classify_device_error("Device or resource busy"), CaptureError::DeviceBusy);
        assert_eq!(
            classify_device_error("weird failure"),
            CaptureError::Backend("weird failure".to_string())
        );
    }

    #[test]
    fn test_user_messages_are_human_readable() {
        for error in [
            CaptureError::PermissionDenied,
            CaptureError::DeviceNotFound,
            CaptureError::DeviceBusy,
        ] {
            let message = error.user_message();
            assert!(message.ends_with("try again."), "{message}");
        }
        assert!(CaptureError::NotSupported.is_capability_error());
        assert!(!CaptureError::DeviceBusy.is_capability_error());
    }
}
