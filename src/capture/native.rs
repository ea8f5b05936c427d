//! Native device capture
//!
//! Camera frames come from nokhwa and microphone samples from cpal. Neither
//! handle is `Send` on every platform, so each device is opened and driven on
//! its own thread and reports the open result back over a oneshot channel.

use super::error::{classify_device_error, CaptureError};
use super::traits::{
    AcquiredDevice, AudioConstraints, AudioDeviceInfo, CameraInfo, CaptureBackend, CaptureConstraints, DeviceLease,
    Resolution, VideoConstraints,
};
use crate::media::{AudioChunk, Capabilities, MediaStream, TrackSettings, TrackWriter, VideoFrame};
use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use nokhwa::pixel_format::RgbAFormat;
use nokhwa::utils::{ApiBackend, CameraIndex, CameraFormat, FrameFormat, RequestedFormat, RequestedFormatType};
use nokhwa::Camera;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

/// Consecutive failed reads before the camera is considered gone
const MAX_FRAME_FAILURES: u32 = 30;

/// Get list of available cameras
pub fn get_cameras() -> Vec<CameraInfo> {
    match nokhwa::query(ApiBackend::Auto) {
        Ok(cameras) => cameras
            .into_iter()
            .map(|info| {
                let id = match info.index() {
                    CameraIndex::Index(i) => i.to_string(),
                    CameraIndex::String(s) => s.to_string(),
                };
                CameraInfo {
                    id,
                    name: info.human_name().to_string(),
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
                }
            })
            .collect(),
        Err(e) => {
            tracing::warn!("Failed to enumerate cameras: {:?}", e);
            Vec::new()
        }
    }
}

/// Get list of available microphones
pub fn get_microphones() -> Vec<AudioDeviceInfo> {
    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());

    match host.input_devices() {
        Ok(devices) => devices
            .filter_map(|device| device.name().ok())
            .map(|name| AudioDeviceInfo {
                id: name.clone(),
                is_default: default_name.as_deref() == Some(name.as_str()),
                name,
            })
            .collect(),
        Err(e) => {
            tracing::warn!("Failed to enumerate microphones: {}", e);
            Vec::new()
        }
    }
}

fn camera_index(device_id: Option<&str>) -> CameraIndex {
    match device_id {
        Some(id) => match id.parse::<u32>() {
            Ok(idx) => CameraIndex::Index(idx),
            Err(_) => CameraIndex::String(id.to_string()),
        },
        None => CameraIndex::Index(0),
    }
}

/// Camera and microphone of the host
#[derive(Debug, Default, Clone)]
pub struct NativeBackend;

impl NativeBackend {
    pub fn new() -> Self {
        Self
    }
}

struct NativeLease {
    stop: Arc<AtomicBool>,
}

impl DeviceLease for NativeLease {
    fn release(&mut self) {
        // Device threads notice on their next frame or poll and close the devices
        self.stop.store(true, Ordering::SeqCst);
    }
}

impl Drop for NativeLease {
    fn drop(&mut self) {
        self.release();
    }
}

#[async_trait]
impl CaptureBackend for NativeBackend {
    fn name(&self) -> &str {
        "native"
    }

    fn capabilities(&self) -> Capabilities {
        let has_input = cpal::default_host().default_input_device().is_some();
        Capabilities {
            media_devices: has_input || !get_cameras().is_empty(),
            ..Default::default()
        }
    }

    fn cameras(&self) -> Vec<CameraInfo> {
        get_cameras()
    }

    fn microphones(&self) -> Vec<AudioDeviceInfo> {
        get_microphones()
    }

    async fn acquire(&self, constraints: &CaptureConstraints) -> Result<AcquiredDevice, CaptureError> {
        let stop = Arc::new(AtomicBool::new(false));
        let mut stream = MediaStream::new();

        if let Some(video) = &constraints.video {
            open_camera(&mut stream, video.clone(), stop.clone()).await.inspect_err(|_| {
                stop.store(true, Ordering::SeqCst);
            })?;
        }
        if let Some(audio) = &constraints.audio {
            open_microphone(&mut stream, audio.clone(), stop.clone()).await.inspect_err(|_| {
                stop.store(true, Ordering::SeqCst);
                stream.stop_all();
            })?;
        }

        Ok(AcquiredDevice {
            stream,
            lease: Box::new(NativeLease { stop }),
        })
    }
}

async fn open_camera(
    stream: &mut MediaStream,
    constraints: VideoConstraints,
    stop: Arc<AtomicBool>,
) -> Result<(), CaptureError> {
    let (ready_tx, ready_rx) = oneshot::channel::<Result<(u32, u32, u32), CaptureError>>();
    let (writer_tx, writer_rx) = std::sync::mpsc::channel::<TrackWriter>();

    std::thread::spawn(move || {
        let index = camera_index(constraints.device_id.as_deref());
        let format = RequestedFormat::new::<RgbAFormat>(RequestedFormatType::Closest(CameraFormat::new_from(
            constraints.width,
            constraints.height,
            FrameFormat::MJPEG,
            constraints.frame_rate,
        )));

        let mut camera = match Camera::new(index.clone(), format) {
            Ok(c) => c,
            Err(e) => {
                tracing::error!("Failed to open camera {:?}: {}", index, e);
                let _ = ready_tx.send(Err(classify_device_error(&e.to_string())));
                return;
            }
        };
        if let Err(e) = camera.open_stream() {
            tracing::error!("Failed to open camera stream: {}", e);
            let _ = ready_tx.send(Err(classify_device_error(&e.to_string())));
            return;
        }

        let camera_format = camera.camera_format();
        let width = camera_format.resolution().width();
        let height = camera_format.resolution().height();
        let fps = camera_format.frame_rate();
        tracing::info!(
            "Webcam opened: {}x{} @ {}fps (requested {}x{} @ {}fps)",
            width,
            height,
            fps,
            constraints.width,
            constraints.height,
            constraints.frame_rate
        );
        if ready_tx.send(Ok((width, height, fps))).is_err() {
            let _ = camera.stop_stream();
            return;
        }
        let Ok(writer) = writer_rx.recv() else {
            let _ = camera.stop_stream();
            return;
        };

        let mut failures = 0u32;
        let mut frame_count = 0u64;
        while writer.is_live() && !stop.load(Ordering::SeqCst) {
            let decoded = camera
                .frame()
                .and_then(|buffer| buffer.decode_image::<RgbAFormat>());
            match decoded {
                Ok(image) => {
                    failures = 0;
                    let (w, h) = (image.width(), image.height());
                    match VideoFrame::from_rgba(w, h, image.into_raw()) {
                        Ok(frame) => {
                            writer.publish_frame(Arc::new(frame));
                            frame_count += 1;
                        }
                        Err(e) => tracing::debug!("Dropping malformed camera frame: {}", e),
                    }
                }
                Err(e) => {
                    failures += 1;
                    tracing::debug!("Failed to capture frame: {}", e);
                    if failures >= MAX_FRAME_FAILURES {
                        writer.device_lost();
                        break;
                    }
                }
            }
        }

        if let Err(e) = camera.stop_stream() {
            tracing::warn!("Error stopping camera stream: {}", e);
        }
        tracing::info!("Webcam thread stopped after {} frames", frame_count);
    });

    let (width, height, frame_rate) = ready_rx
        .await
        .map_err(|_| CaptureError::Backend("camera thread exited".to_string()))??;
    let writer = stream.add_track("Camera", TrackSettings::Video { width, height, frame_rate });
    writer_tx
        .send(writer)
        .map_err(|_| CaptureError::Backend("camera thread exited".to_string()))
}

async fn open_microphone(
    stream: &mut MediaStream,
    constraints: AudioConstraints,
    stop: Arc<AtomicBool>,
) -> Result<(), CaptureError> {
    let (ready_tx, ready_rx) = oneshot::channel::<Result<(u32, u16), CaptureError>>();
    let (writer_tx, writer_rx) = std::sync::mpsc::channel::<TrackWriter>();

    std::thread::spawn(move || {
        let host = cpal::default_host();
        let device = match &constraints.device_id {
            Some(id) => host
                .input_devices()
                .ok()
                .and_then(|mut devices| devices.find(|d| d.name().ok().as_deref() == Some(id.as_str()))),
            None => host.default_input_device(),
        };
        let Some(device) = device else {
            let _ = ready_tx.send(Err(CaptureError::DeviceNotFound));
            return;
        };

        let supported = match device.default_input_config() {
            Ok(c) => c,
            Err(e) => {
                let _ = ready_tx.send(Err(classify_device_error(&e.to_string())));
                return;
            }
        };
        let sample_rate = supported.sample_rate().0;
        let channels = supported.channels();
        if sample_rate != constraints.sample_rate {
            tracing::debug!(
                "Microphone runs at {} Hz instead of the requested {} Hz",
                sample_rate,
                constraints.sample_rate
            );
        }

        if ready_tx.send(Ok((sample_rate, channels))).is_err() {
            return;
        }
        let Ok(writer) = writer_rx.recv() else {
            return;
        };

        let data_writer = writer.clone();
        let error_writer = writer.clone();
        let config: cpal::StreamConfig = supported.into();
        let input = device.build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                data_writer.publish_audio(AudioChunk {
                    sample_rate,
                    channels,
                    samples: data.to_vec(),
                });
            },
            move |err: cpal::StreamError| {
                tracing::error!("cpal stream error: {}", err);
                if matches!(err, cpal::StreamError::DeviceNotAvailable) {
                    error_writer.device_lost();
                }
            },
            None,
        );

        let input = match input {
            Ok(s) => s,
            Err(e) => {
                tracing::error!("Failed to build microphone stream: {}", e);
                writer.device_lost();
                return;
            }
        };
        if let Err(e) = input.play() {
            tracing::error!("Failed to start microphone: {}", e);
            writer.device_lost();
            return;
        }

        while writer.is_live() && !stop.load(Ordering::SeqCst) {
            std::thread::sleep(Duration::from_millis(50));
        }
        drop(input);
        tracing::info!("Microphone thread stopped");
    });

    let (sample_rate, channels) = ready_rx
        .await
        .map_err(|_| CaptureError::Backend("microphone thread exited".to_string()))??;
    let writer = stream.add_track("Microphone", TrackSettings::Audio { sample_rate, channels });
    writer_tx
        .send(writer)
        .map_err(|_| CaptureError::Backend("microphone thread exited".to_string()))
}
