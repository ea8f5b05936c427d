//! FFmpeg-backed encoder
//!
//! Raw RGBA frames go to ffmpeg's stdin. PCM goes to stdin as well for audio
//! recordings, or over a loopback TCP input when muxed with video. The
//! container comes back on stdout and is flushed as one chunk per timeslice.

use super::encoder::{ActiveEncoder, EncoderBackend, EncoderSettings, ThumbnailExtractor};
use super::error::RecorderError;
use super::format::{Container, MediaFormat};
use super::state::Thumbnail;
use crate::ffmpeg::{self, FfmpegError};
use crate::media::{Capabilities, MediaEvent, VideoFrame};
use async_trait::async_trait;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Formats probed against the local encoder list, in preference order
const CANDIDATE_FORMATS: &[&str] = &[
    "video/webm;codecs=vp9,opus",
    "video/webm;codecs=vp8,opus",
    "video/webm",
    "video/mp4;codecs=avc1,mp4a",
    "video/mp4",
    "audio/webm;codecs=opus",
    "audio/webm",
    "audio/ogg;codecs=opus",
    "audio/ogg;codecs=vorbis",
    "audio/mp4",
];

/// Frames buffered ahead of ffmpeg before new ones are dropped
const VIDEO_QUEUE: usize = 8;
const AUDIO_QUEUE: usize = 64;

const READ_BUFFER: usize = 64 * 1024;
const EXIT_TIMEOUT: Duration = Duration::from_secs(10);
const TCP_ACCEPT_TIMEOUT: Duration = Duration::from_secs(10);

/// Where ffmpeg reads PCM from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioTransport {
    Stdin,
    Tcp(u16),
}

pub struct FfmpegEncoderBackend {
    encoders: Vec<String>,
    capabilities: Capabilities,
}

impl FfmpegEncoderBackend {
    /// Query the local ffmpeg for its encoders
    pub async fn probe() -> Result<Self, FfmpegError> {
        let encoders = ffmpeg::list_encoders().await?;
        let backend = Self::from_encoders(encoders);
        tracing::info!(
            "ffmpeg can record {} format(s): {:?}",
            backend.capabilities.mime_types.len(),
            backend.capabilities.mime_types
        );
        Ok(backend)
    }

    pub fn from_encoders(encoders: Vec<String>) -> Self {
        let has = |name: &str| encoders.iter().any(|e| e == name);
        let mut capabilities = Capabilities::default();
        for mime in CANDIDATE_FORMATS {
            let Some(format) = MediaFormat::parse(mime) else {
                continue;
            };
            let video_ok = format.video_codec.map_or(true, |c| has(c.ffmpeg_encoder()));
            if video_ok && has(format.audio_codec.ffmpeg_encoder()) {
                capabilities = capabilities.with_mime_type(mime);
            }
        }
        capabilities.media_recorder = !capabilities.mime_types.is_empty();
        capabilities.canvas_capture = capabilities.media_recorder;

        Self { encoders, capabilities }
    }

    pub fn encoders(&self) -> &[String] {
        &self.encoders
    }
}

#[async_trait]
impl EncoderBackend for FfmpegEncoderBackend {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities.clone()
    }

    async fn start(
        &self,
        settings: &EncoderSettings,
        events: mpsc::UnboundedSender<MediaEvent>,
    ) -> Result<Box<dyn ActiveEncoder>, RecorderError> {
        if !self.capabilities.is_type_supported(&settings.format.mime_type) {
            return Err(RecorderError::UnsupportedFormat);
        }

        let listener = match (settings.video, settings.audio) {
            (Some(_), Some(_)) => Some(
                TcpListener::bind("127.0.0.1:0")
                    .await
                    .map_err(|e| RecorderError::from_start_failure(&e.to_string()))?,
            ),
            _ => None,
        };
        let transport = match (&listener, settings.audio) {
            (Some(listener), Some(_)) => {
                let port = listener
                    .local_addr()
                    .map_err(|e| RecorderError::RecordingFailed(e.to_string()))?
                    .port();
                Some(AudioTransport::Tcp(port))
            }
            (None, Some(_)) => Some(AudioTransport::Stdin),
            (_, None) => None,
        };

        let args = build_encoder_args(settings, transport);
        tracing::debug!("Starting ffmpeg encoder: ffmpeg {}", args.join(" "));

        let mut child = Command::new("ffmpeg")
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RecorderError::from_start_failure(&e.to_string()))?;

        let missing = |pipe: &str| RecorderError::RecordingFailed(format!("Failed to capture ffmpeg {}", pipe));
        let stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| missing("stderr"))?;

        let mut writers = Vec::new();
        let mut video_tx = None;
        let mut audio_tx = None;

        if settings.video.is_some() {
            let (tx, rx) = mpsc::channel(VIDEO_QUEUE);
            writers.push(spawn_writer(stdin, rx, "video"));
            video_tx = Some(tx);
            if let Some(listener) = listener {
                let (tx, rx) = mpsc::channel(AUDIO_QUEUE);
                writers.push(spawn_tcp_writer(listener, rx));
                audio_tx = Some(tx);
            }
        } else {
            let (tx, rx) = mpsc::channel(AUDIO_QUEUE);
            writers.push(spawn_writer(stdin, rx, "audio"));
            audio_tx = Some(tx);
        }

        let finishing = Arc::new(AtomicBool::new(false));
        let pump = spawn_output_pump(stdout, settings.timeslice, events.clone(), finishing.clone());
        let stderr_tail = tokio::spawn(collect_stderr_tail(stderr));

        tracing::info!("ffmpeg encoder started for {}", settings.format.mime_type);

        Ok(Box::new(FfmpegActiveEncoder {
            child,
            settings: settings.clone(),
            video_tx,
            audio_tx,
            writers,
            pump,
            stderr_tail,
            events,
            finishing,
            paused: false,
            dropped_frames: 0,
        }))
    }
}

struct FfmpegActiveEncoder {
    child: Child,
    settings: EncoderSettings,
    video_tx: Option<mpsc::Sender<Vec<u8>>>,
    audio_tx: Option<mpsc::Sender<Vec<u8>>>,
    writers: Vec<JoinHandle<()>>,
    pump: JoinHandle<()>,
    stderr_tail: JoinHandle<String>,
    events: mpsc::UnboundedSender<MediaEvent>,
    finishing: Arc<AtomicBool>,
    paused: bool,
    dropped_frames: u64,
}

impl FfmpegActiveEncoder {
    fn closed(input: &str) -> RecorderError {
        RecorderError::RecordingFailed(format!("ffmpeg {} input closed", input))
    }
}

#[async_trait]
impl ActiveEncoder for FfmpegActiveEncoder {
    fn push_frame(&mut self, frame: &VideoFrame) -> Result<(), RecorderError> {
        let (Some(tx), Some(video)) = (&self.video_tx, self.settings.video) else {
            return Ok(());
        };
        if self.paused {
            return Ok(());
        }

        let bytes = if frame.dimensions() == (video.width, video.height) {
            frame.data().to_vec()
        } else {
            frame.scaled(video.width, video.height).into_raw()
        };

        match tx.try_send(bytes) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.dropped_frames += 1;
                tracing::debug!("ffmpeg video input is behind, dropped frame {}", self.dropped_frames);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(Self::closed("video")),
        }
    }

    fn push_audio(&mut self, samples: &[f32], sample_rate: u32, channels: u16) -> Result<(), RecorderError> {
        let (Some(tx), Some(audio)) = (&self.audio_tx, self.settings.audio) else {
            return Ok(());
        };
        if self.paused {
            return Ok(());
        }
        if sample_rate != audio.sample_rate || channels != audio.channels {
            tracing::debug!(
                "Dropping audio chunk at {} Hz x{}, encoder expects {} Hz x{}",
                sample_rate,
                channels,
                audio.sample_rate,
                audio.channels
            );
            return Ok(());
        }

        let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        match tx.try_send(bytes) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::debug!("ffmpeg audio input is behind, dropped {} samples", samples.len());
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(Self::closed("audio")),
        }
    }

    fn pause(&mut self) {
        self.paused = true;
    }

    fn resume(&mut self) {
        self.paused = false;
    }

    async fn finish(self: Box<Self>) -> Result<(), RecorderError> {
        let FfmpegActiveEncoder {
            mut child,
            video_tx,
            audio_tx,
            writers,
            pump,
            stderr_tail,
            events,
            finishing,
            dropped_frames,
            ..
        } = *self;
        finishing.store(true, Ordering::SeqCst);

        // Closing the inputs lets ffmpeg flush and exit
        drop(video_tx);
        drop(audio_tx);
        for writer in writers {
            let _ = writer.await;
        }

        let status = match tokio::time::timeout(EXIT_TIMEOUT, child.wait()).await {
            Ok(Ok(status)) => Some(status),
            Ok(Err(e)) => {
                tracing::warn!("Failed to wait for ffmpeg: {}", e);
                None
            }
            Err(_) => {
                tracing::warn!("ffmpeg did not exit in time, killing it");
                let _ = child.kill().await;
                None
            }
        };

        let _ = pump.await;
        let stderr = stderr_tail.await.unwrap_or_default();

        if dropped_frames > 0 {
            tracing::warn!("ffmpeg encoder dropped {} frame(s)", dropped_frames);
        }

        match status {
            Some(status) if status.success() => {
                let _ = events.send(MediaEvent::Finalized);
                tracing::info!("ffmpeg encoder finalized");
                Ok(())
            }
            _ => {
                let reason = if stderr.is_empty() {
                    "ffmpeg exited with an error".to_string()
                } else {
                    stderr
                };
                let _ = events.send(MediaEvent::EncoderFailed(reason.clone()));
                Err(RecorderError::RecordingFailed(reason))
            }
        }
    }
}

fn spawn_writer<W>(mut sink: W, mut rx: mpsc::Receiver<Vec<u8>>, label: &'static str) -> JoinHandle<()>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(buf) = rx.recv().await {
            if let Err(e) = sink.write_all(&buf).await {
                tracing::warn!("ffmpeg {} input failed: {}", label, e);
                break;
            }
        }
        let _ = sink.shutdown().await;
    })
}

fn spawn_tcp_writer(listener: TcpListener, rx: mpsc::Receiver<Vec<u8>>) -> JoinHandle<()> {
    tokio::spawn(async move {
        match tokio::time::timeout(TCP_ACCEPT_TIMEOUT, listener.accept()).await {
            Ok(Ok((socket, _))) => {
                if let Err(e) = spawn_writer(socket, rx, "audio").await {
                    tracing::warn!("ffmpeg audio writer panicked: {}", e);
                }
            }
            Ok(Err(e)) => tracing::warn!("ffmpeg audio input connection failed: {}", e),
            Err(_) => tracing::warn!("ffmpeg never connected to the audio input"),
        }
    })
}

/// Forward stdout as one chunk per timeslice
fn spawn_output_pump<R>(
    mut stdout: R,
    timeslice: Duration,
    events: mpsc::UnboundedSender<MediaEvent>,
    finishing: Arc<AtomicBool>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = vec![0u8; READ_BUFFER];
        let mut pending = Vec::new();
        let mut ticker = tokio::time::interval(timeslice.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                read = stdout.read(&mut buf) => match read {
                    Ok(0) => break,
                    Ok(n) => pending.extend_from_slice(&buf[..n]),
                    Err(e) => {
                        tracing::warn!("Failed to read ffmpeg output: {}", e);
                        break;
                    }
                },
                _ = ticker.tick() => {
                    if !pending.is_empty() {
                        let _ = events.send(MediaEvent::EncoderChunk(std::mem::take(&mut pending)));
                    }
                }
            }
        }

        if !pending.is_empty() {
            let _ = events.send(MediaEvent::EncoderChunk(pending));
        }
        if !finishing.load(Ordering::SeqCst) {
            tracing::warn!("ffmpeg output ended before the recording was stopped");
            let _ = events.send(MediaEvent::EncoderFailed("ffmpeg exited unexpectedly".to_string()));
        }
    })
}

async fn collect_stderr_tail<R>(stderr: R) -> String
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stderr).lines();
    let mut tail: Vec<String> = Vec::new();
    while let Ok(Some(line)) = lines.next_line().await {
        tail.push(line);
        if tail.len() > 4 {
            tail.remove(0);
        }
    }
    tail.join("\n")
}

/// Build the ffmpeg argument list for one recording
pub fn build_encoder_args(settings: &EncoderSettings, audio: Option<AudioTransport>) -> Vec<String> {
    let mut args: Vec<String> = ["-hide_banner", "-loglevel", "error", "-nostdin"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let mut push = |items: &[&str]| args.extend(items.iter().map(|s| s.to_string()));

    let mut input_index = 0;
    let mut video_input = None;
    if let Some(video) = settings.video {
        let size = format!("{}x{}", video.width, video.height);
        let rate = video.frame_rate.to_string();
        push(&["-f", "rawvideo", "-pix_fmt", "rgba", "-s", &size, "-r", &rate, "-i", "pipe:0"]);
        video_input = Some(input_index);
        input_index += 1;
    }

    let mut audio_input = None;
    if let (Some(input), Some(transport)) = (settings.audio, audio) {
        let rate = input.sample_rate.to_string();
        let channels = input.channels.to_string();
        let source = match transport {
            AudioTransport::Stdin => "pipe:0".to_string(),
            AudioTransport::Tcp(port) => format!("tcp://127.0.0.1:{}", port),
        };
        push(&["-f", "f32le", "-ar", &rate, "-ac", &channels, "-i", &source]);
        audio_input = Some(input_index);
    }

    if let Some(index) = video_input {
        push(&["-map", &format!("{}:v", index)]);
    }
    if let Some(index) = audio_input {
        push(&["-map", &format!("{}:a", index)]);
    }

    let format = &settings.format;
    if let (Some(codec), Some(_)) = (format.video_codec, video_input) {
        push(&["-c:v", codec.ffmpeg_encoder(), "-pix_fmt", "yuv420p"]);
        match format.container {
            Container::Mp4 => push(&["-preset", "veryfast", "-tune", "zerolatency"]),
            _ => push(&["-deadline", "realtime", "-cpu-used", "8"]),
        }
        if let Some(bitrate) = settings.video_bitrate {
            push(&["-b:v", &bitrate.to_string()]);
        }
    }
    if audio_input.is_some() {
        push(&["-c:a", format.audio_codec.ffmpeg_encoder()]);
        if let Some(bitrate) = settings.audio_bitrate {
            push(&["-b:a", &bitrate.to_string()]);
        }
    }

    if format.container == Container::Mp4 {
        // Fragmented so the moov atom does not need a seekable output
        push(&["-movflags", "frag_keyframe+empty_moov"]);
    }
    push(&["-f", format.container.muxer(), "pipe:1"]);

    args
}

/// Grabs a PNG from a finished video with ffmpeg
#[derive(Debug, Default)]
pub struct FfmpegThumbnailer;

impl FfmpegThumbnailer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ThumbnailExtractor for FfmpegThumbnailer {
    async fn extract(&self, data: &[u8], mime_type: &str, duration_secs: f64) -> Result<Thumbnail, RecorderError> {
        let extension = MediaFormat::parse(mime_type)
            .map(|f| f.extension())
            .unwrap_or("webm");
        let file = tempfile::Builder::new()
            .suffix(&format!(".{}", extension))
            .tempfile()
            .map_err(|e| RecorderError::Thumbnail(e.to_string()))?;
        tokio::fs::write(file.path(), data)
            .await
            .map_err(|e| RecorderError::Thumbnail(e.to_string()))?;

        let at_secs = (duration_secs / 2.0).clamp(0.0, 1.0);
        let png = match ffmpeg::extract_png_frame(file.path(), at_secs).await {
            Ok(png) => png,
            Err(e) if at_secs > 0.0 => {
                // Streamed containers may lack cues; the first frame still works
                tracing::debug!("Seek to {:.2}s failed ({}), using first frame", at_secs, e);
                ffmpeg::extract_png_frame(file.path(), 0.0)
                    .await
                    .map_err(|e| RecorderError::Thumbnail(e.to_string()))?
            }
            Err(e) => return Err(RecorderError::Thumbnail(e.to_string())),
        };

        Ok(Thumbnail {
            data: png,
            mime_type: "image/png".to_string(),
            at_secs,
        })
    }
}
