//! Synthetic capture backend
//!
//! A test-pattern camera and a sine-tone microphone running on tokio tasks.
//! Failures, acquisition latency and device loss can be injected, and device
//! locks are counted so lease pairing can be asserted.

use super::error::CaptureError;
use super::traits::{
    AcquiredDevice, AudioDeviceInfo, CameraInfo, CaptureBackend, CaptureConstraints, DeviceLease, Resolution,
};
use crate::media::{AudioChunk, Capabilities, MediaStream, TrackSettings, TrackWriter, VideoFrame};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::f32::consts::TAU;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

const TONE_HZ: f32 = 440.0;
const AUDIO_CHUNK_MS: u64 = 20;

#[derive(Debug)]
struct SyntheticState {
    available: AtomicBool,
    producing: AtomicBool,
    fail_next: Mutex<Option<CaptureError>>,
    acquire_delay: Mutex<Duration>,
    active_locks: AtomicUsize,
    acquisitions: AtomicUsize,
    writers: Mutex<Vec<TrackWriter>>,
}

/// Synthetic devices; clones share state
#[derive(Debug, Clone)]
pub struct SyntheticBackend {
    state: Arc<SyntheticState>,
}

impl SyntheticBackend {
    pub fn new() -> Self {
        Self {
            state: Arc::new(SyntheticState {
                available: AtomicBool::new(true),
                producing: AtomicBool::new(true),
                fail_next: Mutex::new(None),
                acquire_delay: Mutex::new(Duration::ZERO),
                active_locks: AtomicUsize::new(0),
                acquisitions: AtomicUsize::new(0),
                writers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Make the next `acquire` fail with `error`
    pub fn fail_next(&self, error: CaptureError) {
        *self.state.fail_next.lock() = Some(error);
    }

    /// Pretend the host has (or lacks) media devices
    pub fn set_available(&self, available: bool) {
        self.state.available.store(available, Ordering::SeqCst);
    }

    /// Disable the background producers; events are then injected through
    /// [`SyntheticBackend::writers`]
    pub fn set_producing(&self, producing: bool) {
        self.state.producing.store(producing, Ordering::SeqCst);
    }

    pub fn set_acquire_delay(&self, delay: Duration) {
        *self.state.acquire_delay.lock() = delay;
    }

    /// Device locks currently held
    pub fn active_locks(&self) -> usize {
        self.state.active_locks.load(Ordering::SeqCst)
    }

    /// Successful acquisitions so far
    pub fn acquisitions(&self) -> usize {
        self.state.acquisitions.load(Ordering::SeqCst)
    }

    /// Producer handles of the most recent acquisition
    pub fn writers(&self) -> Vec<TrackWriter> {
        self.state.writers.lock().clone()
    }

    /// Simulate unplugging every device of the current acquisition
    pub fn lose_device(&self) {
        for writer in self.state.writers.lock().iter() {
            writer.device_lost();
        }
    }
}

impl Default for SyntheticBackend {
    fn default() -> Self {
        Self::new()
    }
}

struct SyntheticLease {
    state: Arc<SyntheticState>,
    released: bool,
}

impl DeviceLease for SyntheticLease {
    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.state.active_locks.fetch_sub(1, Ordering::SeqCst);
            self.state.writers.lock().clear();
        }
    }
}

impl Drop for SyntheticLease {
    fn drop(&mut self) {
        self.release();
    }
}

#[async_trait]
impl CaptureBackend for SyntheticBackend {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            media_devices: self.state.available.load(Ordering::SeqCst),
            ..Default::default()
        }
    }

    fn cameras(&self) -> Vec<CameraInfo> {
        vec![CameraInfo {
            id: "synthetic-camera".to_string(),
            name: "Synthetic Camera".to_string(),
            supported_resolutions: vec![
                Resolution {
                    width: 1280,
                    height: 720,
                },
                Resolution {
                    width: 640,
                    height: 480,
                },
            ],
        }]
    }

    fn microphones(&self) -> Vec<AudioDeviceInfo> {
        vec![AudioDeviceInfo {
            id: "synthetic-microphone".to_string(),
            name: "Synthetic Microphone".to_string(),
            is_default: true,
        }]
    }

    async fn acquire(&self, constraints: &CaptureConstraints) -> Result<AcquiredDevice, CaptureError> {
        let delay = *self.state.acquire_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if let Some(error) = self.state.fail_next.lock().take() {
            return Err(error);
        }
        if self.active_locks() > 0 {
            return Err(CaptureError::DeviceBusy);
        }
        if constraints.video.is_none() && constraints.audio.is_none() {
            return Err(CaptureError::Backend("no tracks requested".to_string()));
        }

        let mut stream = MediaStream::new();
        let mut writers = Vec::new();
        let producing = self.state.producing.load(Ordering::SeqCst);

        if let Some(video) = &constraints.video {
            let writer = stream.add_track(
                "Synthetic Camera",
                TrackSettings::Video {
                    width: video.width,
                    height: video.height,
                    frame_rate: video.frame_rate,
                },
            );
            if producing {
                tokio::spawn(produce_video(writer.clone(), video.width, video.height, video.frame_rate));
            }
            writers.push(writer);
        }

        if let Some(audio) = &constraints.audio {
            let writer = stream.add_track(
                "Synthetic Microphone",
                TrackSettings::Audio {
                    sample_rate: audio.sample_rate,
                    channels: audio.channels,
                },
            );
            if producing {
                tokio::spawn(produce_audio(writer.clone(), audio.sample_rate, audio.channels));
            }
            writers.push(writer);
        }

        *self.state.writers.lock() = writers;
        self.state.active_locks.fetch_add(1, Ordering::SeqCst);
        self.state.acquisitions.fetch_add(1, Ordering::SeqCst);

        Ok(AcquiredDevice {
            stream,
            lease: Box::new(SyntheticLease {
                state: self.state.clone(),
                released: false,
            }),
        })
    }
}

/// Diagonal color bars that drift one pixel per frame
pub fn test_pattern(width: u32, height: u32, tick: u64) -> VideoFrame {
    const BARS: [[u8; 4]; 6] = [
        [235, 235, 235, 255],
        [235, 235, 16, 255],
        [16, 235, 235, 255],
        [16, 235, 16, 255],
        [235, 16, 235, 255],
        [16, 16, 235, 255],
    ];

    let bar_width = (width / BARS.len() as u32).max(1) as u64;
    let mut data = Vec::with_capacity(width as usize * height as usize * 4);
    for y in 0..height as u64 {
        for x in 0..width as u64 {
            let index = ((x + y / 4 + tick) / bar_width) as usize % BARS.len();
            data.extend_from_slice(&BARS[index]);
        }
    }

    VideoFrame::from_rgba(width, height, data).unwrap_or_else(|_| VideoFrame::new(width, height))
}

async fn produce_video(writer: TrackWriter, width: u32, height: u32, frame_rate: u32) {
    let track = writer.track().clone();
    let mut interval = tokio::time::interval(Duration::from_secs(1) / frame_rate.max(1));
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut tick = 0u64;

    loop {
        tokio::select! {
            _ = track.ended() => break,
            _ = interval.tick() => {
                if !writer.publish_frame(Arc::new(test_pattern(width, height, tick))) {
                    break;
                }
                tick += 1;
            }
        }
    }
    tracing::debug!("Synthetic camera stopped after {} frames", tick);
}

async fn produce_audio(writer: TrackWriter, sample_rate: u32, channels: u16) {
    let track = writer.track().clone();
    let mut interval = tokio::time::interval(Duration::from_millis(AUDIO_CHUNK_MS));
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let frames_per_chunk = (sample_rate as u64 * AUDIO_CHUNK_MS / 1000) as usize;
    let channels = channels.max(1);
    let mut phase = 0.0f32;
    let step = TAU * TONE_HZ / sample_rate.max(1) as f32;

    loop {
        tokio::select! {
            _ = track.ended() => break,
            _ = interval.tick() => {
                let mut samples = Vec::with_capacity(frames_per_chunk * channels as usize);
                for _ in 0..frames_per_chunk {
                    let value = 0.2 * phase.sin();
                    phase = (phase + step) % TAU;
                    samples.extend(std::iter::repeat(value).take(channels as usize));
                }
                let chunk = AudioChunk {
                    sample_rate,
                    channels,
                    samples,
                };
                if !writer.publish_audio(chunk) {
                    break;
                }
            }
        }
    }
}
