//! Recording
//!
//! - [`StreamRecorder`]: feeds one live stream into an encoder and collects
//!   its container fragments
//! - [`RecordingSession`]: the Idle/Recording/Paused state machine with the
//!   duration clock, auto-stop and artifact publishing
//! - [`FfmpegEncoderBackend`] / [`FfmpegThumbnailer`]: the ffmpeg-backed
//!   encoder and thumbnail seams

pub mod encoder;
pub mod error;
pub mod ffmpeg_encoder;
pub mod format;
pub mod session;
pub mod state;
pub mod stream_recorder;

pub use encoder::{ActiveEncoder, AudioInput, EncoderBackend, EncoderSettings, ThumbnailExtractor, VideoInput};
pub use error::RecorderError;
pub use ffmpeg_encoder::{FfmpegEncoderBackend, FfmpegThumbnailer};
pub use format::{negotiate, AudioCodec, Container, MediaFormat, VideoCodec};
pub use session::{RecordingSession, SessionEvent, SessionOptions, SessionStatus};
pub use state::{RecordingArtifact, RecordingState, Segment, SessionClock, StopReason, Thumbnail};
pub use stream_recorder::{RecorderOptions, StreamRecorder};
