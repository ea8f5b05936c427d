//! Background replacement
//!
//! [`FrameCompositor`] turns the capture stream plus a [`BackgroundSpec`] into
//! a composited output stream. There is no subject segmentation: color and
//! image backgrounds show the camera frame on top at reduced opacity.

pub mod background;
pub mod engine;
pub mod error;
pub mod image_loader;

pub use background::{background_transition, parse_hex_color, presets, BackgroundKind, BackgroundPreset, BackgroundSpec, BackgroundTransition};
pub use engine::{BackgroundUpdate, CompositorOptions, CompositorStats, FrameCompositor};
pub use error::CompositorError;
pub use image_loader::{DefaultImageLoader, ImageLoader};
