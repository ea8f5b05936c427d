//! Waveform extraction
//!
//! Peaks of a finished recording for the audio preview.

mod extractor;

pub use extractor::{compute_peaks, extract_waveform, WaveformData, DEFAULT_PEAKS_PER_SECOND};
