//! Media primitives shared by capture, compositing and recording
//!
//! - [`MediaStream`] / [`MediaTrack`]: live tracks and their event bus
//! - [`VideoFrame`]: RGBA frames and raster operations
//! - [`MediaEvent`]: the messages every stage consumes
//! - [`Capabilities`]: what the host can do
//! - [`ObjectUrlRegistry`]: transient `blob:` URLs

pub mod capabilities;
pub mod events;
pub mod frame;
pub mod image;
pub mod object_url;
pub mod stream;

pub use capabilities::Capabilities;
pub use events::{AudioChunk, MediaEvent};
pub use frame::{FrameError, VideoFrame};
pub use object_url::ObjectUrlRegistry;
pub use stream::{MediaStream, MediaTrack, TrackId, TrackKind, TrackSettings, TrackWriter};
