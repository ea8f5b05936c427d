//! Device capture
//!
//! [`CaptureSource`] owns the live camera/microphone stream. Devices come from a
//! [`CaptureBackend`]: the synthetic backend always, the native one behind the
//! `native-capture` feature.

pub mod error;
pub mod source;
pub mod synthetic;
pub mod traits;

#[cfg(feature = "native-capture")]
pub mod native;

pub use error::{classify_device_error, CaptureError};
pub use source::CaptureSource;
pub use synthetic::SyntheticBackend;
pub use traits::{
    AcquiredDevice, AudioConstraints, AudioDeviceInfo, CameraInfo, CaptureBackend, CaptureConstraints, DeviceLease,
    Resolution, VideoConstraints,
};

#[cfg(feature = "native-capture")]
pub use native::NativeBackend;
