//! FFmpeg-based waveform extraction
//!
//! Decodes a recording to mono PCM and keeps the loudest sample per bucket.

use crate::ffmpeg::{self, FfmpegError};
use serde::{Deserialize, Serialize};

/// Peaks per second used by the studio preview
pub const DEFAULT_PEAKS_PER_SECOND: u32 = 50;

/// Decode rate; plenty for peak detection
const SOURCE_SAMPLE_RATE: u32 = 8000;

/// Waveform of one recording
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaveformData {
    /// Peaks normalized to 0.0-1.0 range
    pub peaks: Vec<f32>,
    /// Duration of the decoded audio in milliseconds
    pub duration_ms: u64,
    pub samples_per_second: u32,
}

/// Extract peaks from an encoded recording held in memory
pub async fn extract_waveform(
    data: &[u8],
    extension: &str,
    samples_per_second: u32,
) -> Result<WaveformData, FfmpegError> {
    let file = tempfile::Builder::new()
        .suffix(&format!(".{}", extension))
        .tempfile()?;
    tokio::fs::write(file.path(), data).await?;

    let samples = ffmpeg::decode_mono_pcm(file.path(), SOURCE_SAMPLE_RATE).await?;

    // Streamed containers often lack a duration header, so count samples
    let duration_ms = samples.len() as u64 * 1000 / SOURCE_SAMPLE_RATE as u64;
    let total_peaks = (samples.len() as u64 * samples_per_second as u64).div_ceil(SOURCE_SAMPLE_RATE as u64) as usize;
    let peaks = compute_peaks(&samples, SOURCE_SAMPLE_RATE, samples_per_second, total_peaks);

    tracing::debug!("Extracted {} waveform peaks over {} ms", peaks.len(), duration_ms);
    Ok(WaveformData {
        peaks,
        duration_ms,
        samples_per_second,
    })
}

/// Maximum absolute amplitude per bucket, padded or trimmed to `total_peaks`
pub fn compute_peaks(
    samples: &[i16],
    source_sample_rate: u32,
    target_samples_per_second: u32,
    total_peaks: usize,
) -> Vec<f32> {
    if samples.is_empty() || target_samples_per_second == 0 {
        return vec![0.0; total_peaks];
    }

    let samples_per_peak = (source_sample_rate / target_samples_per_second).max(1) as usize;

    let mut peaks: Vec<f32> = samples
        .chunks(samples_per_peak)
        .map(|chunk| {
            let max_amplitude = chunk.iter().map(|&s| s.unsigned_abs()).max().unwrap_or(0);
            (max_amplitude as f32 / i16::MAX as f32).min(1.0)
        })
        .collect();

    peaks.resize(total_peaks, 0.0);
    peaks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_peaks_empty() {
        let peaks = compute_peaks(&[], 8000, 50, 10);
        assert_eq!(peaks.len(), 10);
        assert!(peaks.iter().all(|&p| p == 0.0));
    }

    #[test]
    fn test_compute_peaks_rises_with_amplitude() {
        // One second of a ramp at 8kHz
        let samples: Vec<i16> = (0..8000).map(|i| ((i as f32 / 8000.0) * 16000.0) as i16).collect();

        let peaks = compute_peaks(&samples, 8000, 50, 50);

        assert_eq!(peaks.len(), 50);
        assert!(peaks.iter().all(|&p| (0.0..=1.0).contains(&p)));
        assert!(peaks[45] > peaks[5]);
    }

    #[test]
    fn test_compute_peaks_normalization() {
        let samples = vec![i16::MIN; 160];
        let peaks = compute_peaks(&samples, 8000, 50, 1);

        assert_eq!(peaks.len(), 1);
        assert!((peaks[0] - 1.0).abs() < 0.01);
    }
}
