//! Recording session
//!
//! Owns the `Idle → Recording ⇄ Paused → Idle` state machine. A driver task
//! exclusively owns the [`StreamRecorder`] for the lifetime of one take: it
//! forwards stream events, collects encoder chunks, ticks the duration clock
//! and runs the stop path, whichever way the take ends.

use super::encoder::{EncoderBackend, ThumbnailExtractor};
use super::error::RecorderError;
use super::state::{RecordingArtifact, RecordingState, Segment, SessionClock, StopReason};
use super::stream_recorder::{RecorderOptions, StreamRecorder};
use crate::config::{RecordingMode, StudioConfig};
use crate::media::{MediaEvent, MediaStream, ObjectUrlRegistry};
use crate::utils::ErrorSlot;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

const EVENT_CAPACITY: usize = 100;

/// Shortest tick or timeslice a timer accepts
const MIN_PERIOD: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, PartialEq)]
pub struct SessionOptions {
    pub max_duration: Duration,
    pub tick: Duration,
    /// Ordered mime preferences
    pub preferences: Vec<String>,
    pub recorder: RecorderOptions,
}

impl SessionOptions {
    pub fn from_config(config: &StudioConfig, mode: RecordingMode) -> Self {
        Self {
            max_duration: Duration::from_secs(config.max_duration_secs as u64),
            tick: Duration::from_millis(config.tick_ms).max(MIN_PERIOD),
            preferences: config.mime_preferences(mode).to_vec(),
            recorder: RecorderOptions {
                video_bitrate: config.video_bitrate,
                audio_bitrate: config.audio_bitrate,
                timeslice: Duration::from_millis(config.timeslice_ms).max(MIN_PERIOD),
            },
        }
    }
}

/// Lifecycle notifications
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Started { mime_type: String },
    Paused,
    Resumed,
    Tick { elapsed_secs: f64 },
    Stopped { reason: StopReason, duration_secs: f64 },
    Failed(RecorderError),
    Cleared,
}

/// Point-in-time view of a session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionStatus {
    pub state: RecordingState,
    pub elapsed_secs: f64,
    pub max_duration_secs: f64,
    pub chunks: usize,
    pub has_artifact: bool,
    pub error: Option<RecorderError>,
}

/// A finished artifact plus the object URLs minted for it.
///
/// The URLs are revoked when this is dropped, so each is revoked once.
struct PublishedArtifact {
    artifact: RecordingArtifact,
    url: String,
    thumbnail_url: Option<String>,
    registry: Arc<ObjectUrlRegistry>,
}

impl PublishedArtifact {
    fn publish(artifact: RecordingArtifact, registry: Arc<ObjectUrlRegistry>) -> Self {
        let url = registry.create(artifact.data().clone(), artifact.mime_type());
        let thumbnail_url = artifact
            .thumbnail()
            .map(|t| registry.create(Arc::from(t.data.clone()), t.mime_type.clone()));
        Self {
            artifact,
            url,
            thumbnail_url,
            registry,
        }
    }
}

impl Drop for PublishedArtifact {
    fn drop(&mut self) {
        self.registry.revoke(&self.url);
        if let Some(url) = &self.thumbnail_url {
            self.registry.revoke(url);
        }
        tracing::debug!("Revoked object URLs of recording {}", self.url);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionCommand {
    Pause,
    Resume,
    Stop(StopReason),
}

type DriverOutcome = Result<Option<RecordingArtifact>, RecorderError>;

struct SessionShared {
    /// Lock order: state, then clock, then artifact
    state: Mutex<RecordingState>,
    clock: Mutex<SessionClock>,
    artifact: Mutex<Option<PublishedArtifact>>,
    error: ErrorSlot<RecorderError>,
    chunks: AtomicUsize,
    /// Set while the stop path runs; pause and resume are ignored
    stopping: AtomicBool,
    events: broadcast::Sender<SessionEvent>,
    registry: Arc<ObjectUrlRegistry>,
}

impl SessionShared {
    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }
}

pub struct RecordingSession {
    shared: Arc<SessionShared>,
    backend: Arc<dyn EncoderBackend>,
    thumbnailer: Arc<dyn ThumbnailExtractor>,
    options: SessionOptions,
    commands: Mutex<Option<mpsc::UnboundedSender<SessionCommand>>>,
    driver: tokio::sync::Mutex<Option<JoinHandle<DriverOutcome>>>,
}

impl RecordingSession {
    pub fn new(
        options: SessionOptions,
        backend: Arc<dyn EncoderBackend>,
        thumbnailer: Arc<dyn ThumbnailExtractor>,
        registry: Arc<ObjectUrlRegistry>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            shared: Arc::new(SessionShared {
                state: Mutex::new(RecordingState::Idle),
                clock: Mutex::new(SessionClock::new()),
                artifact: Mutex::new(None),
                error: ErrorSlot::new(),
                chunks: AtomicUsize::new(0),
                stopping: AtomicBool::new(false),
                events,
                registry,
            }),
            backend,
            thumbnailer,
            options,
            commands: Mutex::new(None),
            driver: tokio::sync::Mutex::new(None),
        }
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Begin recording `stream`.
    ///
    /// A previous artifact is discarded first. If the recorder cannot start
    /// the error lands in the slot and the session stays Idle.
    pub async fn start(&self, stream: &MediaStream) -> Result<(), RecorderError> {
        if self.shared.error.is_set() {
            return Err(RecorderError::ErrorNotCleared);
        }

        let mut driver = self.driver.lock().await;
        if *self.shared.state.lock() != RecordingState::Idle {
            return Err(RecorderError::AlreadyRecording);
        }
        // A take that ended on its own leaves a finished driver behind
        if let Some(handle) = driver.take() {
            let _ = handle.await;
        }

        if self.shared.artifact.lock().take().is_some() {
            tracing::debug!("Discarded previous recording");
        }

        let bus = stream.subscribe();
        let mut recorder = StreamRecorder::new(self.backend.clone());
        let encoder_rx = match recorder
            .start(stream, &self.options.preferences, &self.options.recorder)
            .await
        {
            Ok(rx) => rx,
            Err(e) => {
                tracing::error!("Failed to start recording: {}", e);
                self.shared.error.set(e.clone());
                self.shared.emit(SessionEvent::Failed(e.clone()));
                return Err(e);
            }
        };
        let mime_type = recorder
            .format()
            .map(|f| f.mime_type.clone())
            .unwrap_or_default();

        self.shared.chunks.store(0, Ordering::SeqCst);
        self.shared.stopping.store(false, Ordering::SeqCst);
        {
            let mut state = self.shared.state.lock();
            self.shared.clock.lock().start(Instant::now());
            *state = RecordingState::Recording;
        }

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        *self.commands.lock() = Some(commands_tx);
        *driver = Some(tokio::spawn(drive(Driver {
            shared: self.shared.clone(),
            recorder,
            encoder_rx,
            bus,
            commands: commands_rx,
            thumbnailer: self.thumbnailer.clone(),
            max_duration: self.options.max_duration,
            tick: self.options.tick,
        })));

        tracing::info!("Recording started ({})", mime_type);
        self.shared.emit(SessionEvent::Started { mime_type });
        Ok(())
    }

    /// Returns `false` unless currently recording
    pub fn pause(&self) -> bool {
        self.transition(RecordingState::Recording, RecordingState::Paused, SessionCommand::Pause)
    }

    /// Returns `false` unless currently paused
    pub fn resume(&self) -> bool {
        self.transition(RecordingState::Paused, RecordingState::Recording, SessionCommand::Resume)
    }

    fn transition(&self, from: RecordingState, to: RecordingState, command: SessionCommand) -> bool {
        if self.shared.stopping.load(Ordering::SeqCst) {
            return false;
        }
        {
            let mut state = self.shared.state.lock();
            if *state != from {
                return false;
            }
            let now = Instant::now();
            let mut clock = self.shared.clock.lock();
            match command {
                SessionCommand::Pause => clock.pause(now),
                _ => clock.resume(now),
            };
            *state = to;
        }

        if let Some(commands) = self.commands.lock().as_ref() {
            let _ = commands.send(command);
        }
        let event = match command {
            SessionCommand::Pause => SessionEvent::Paused,
            _ => SessionEvent::Resumed,
        };
        tracing::info!("Recording {:?}", to);
        self.shared.emit(event);
        true
    }

    /// Finish the current take.
    ///
    /// Returns the artifact built by this call, or `None` when nothing was
    /// recording. Safe to call repeatedly.
    pub async fn stop(&self) -> Result<Option<RecordingArtifact>, RecorderError> {
        self.finish(StopReason::Manual).await
    }

    /// Stop without building an artifact and revoke every URL
    pub async fn teardown(&self) {
        let _ = self.finish(StopReason::Teardown).await;
        self.shared.artifact.lock().take();
    }

    async fn finish(&self, reason: StopReason) -> Result<Option<RecordingArtifact>, RecorderError> {
        let mut driver = self.driver.lock().await;
        let Some(handle) = driver.take() else {
            return Ok(None);
        };
        let commands = self.commands.lock().take();

        if *self.shared.state.lock() == RecordingState::Idle {
            // Already ended on its own; just reap the driver
            let _ = handle.await;
            return Ok(None);
        }

        if let Some(commands) = commands {
            let _ = commands.send(SessionCommand::Stop(reason));
        }
        match handle.await {
            Ok(outcome) => outcome,
            Err(e) => {
                // The driver died before reaching Idle; recover here
                let error = RecorderError::RecordingFailed(format!("recording task failed: {}", e));
                tracing::error!("{}", error);
                {
                    let mut state = self.shared.state.lock();
                    self.shared.clock.lock().stop(Instant::now());
                    *state = RecordingState::Idle;
                }
                self.shared.stopping.store(false, Ordering::SeqCst);
                self.shared.error.set(error.clone());
                self.shared.emit(SessionEvent::Failed(error.clone()));
                Err(error)
            }
        }
    }

    /// Drop the finished artifact. Only legal while Idle.
    pub fn clear(&self) -> bool {
        let state = self.shared.state.lock();
        if *state != RecordingState::Idle {
            return false;
        }
        self.shared.clock.lock().reset();
        let had_artifact = self.shared.artifact.lock().take().is_some();
        self.shared.chunks.store(0, Ordering::SeqCst);
        drop(state);

        if had_artifact {
            tracing::info!("Recording cleared");
            self.shared.emit(SessionEvent::Cleared);
        }
        had_artifact
    }

    pub fn state(&self) -> RecordingState {
        *self.shared.state.lock()
    }

    pub fn elapsed(&self) -> Duration {
        self.shared.clock.lock().elapsed(Instant::now())
    }

    pub fn segments(&self) -> Vec<Segment> {
        self.shared.clock.lock().segments().to_vec()
    }

    pub fn artifact(&self) -> Option<RecordingArtifact> {
        self.shared.artifact.lock().as_ref().map(|p| p.artifact.clone())
    }

    pub fn artifact_url(&self) -> Option<String> {
        self.shared.artifact.lock().as_ref().map(|p| p.url.clone())
    }

    pub fn thumbnail_url(&self) -> Option<String> {
        self.shared
            .artifact
            .lock()
            .as_ref()
            .and_then(|p| p.thumbnail_url.clone())
    }

    pub fn status(&self) -> SessionStatus {
        let state = self.shared.state.lock();
        let elapsed = self.shared.clock.lock().elapsed(Instant::now());
        SessionStatus {
            state: *state,
            elapsed_secs: elapsed.as_secs_f64(),
            max_duration_secs: self.options.max_duration.as_secs_f64(),
            chunks: self.shared.chunks.load(Ordering::SeqCst),
            has_artifact: self.shared.artifact.lock().is_some(),
            error: self.shared.error.get(),
        }
    }

    pub fn error(&self) -> Option<RecorderError> {
        self.shared.error.get()
    }

    pub fn clear_error(&self) -> Option<RecorderError> {
        self.shared.error.clear()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events.subscribe()
    }
}

impl Drop for RecordingSession {
    fn drop(&mut self) {
        if let Some(commands) = self.commands.lock().take() {
            let _ = commands.send(SessionCommand::Stop(StopReason::Teardown));
        }
        self.shared.artifact.lock().take();
    }
}

struct Driver {
    shared: Arc<SessionShared>,
    recorder: StreamRecorder,
    encoder_rx: mpsc::UnboundedReceiver<MediaEvent>,
    bus: broadcast::Receiver<MediaEvent>,
    commands: mpsc::UnboundedReceiver<SessionCommand>,
    thumbnailer: Arc<dyn ThumbnailExtractor>,
    max_duration: Duration,
    tick: Duration,
}

async fn drive(mut d: Driver) -> DriverOutcome {
    let tick = d.tick.max(MIN_PERIOD);
    let mut ticker = tokio::time::interval_at(Instant::now() + tick, tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut ticking = true;
    let mut failure: Option<RecorderError> = None;

    let reason = loop {
        tokio::select! {
            biased;

            command = d.commands.recv() => match command {
                Some(SessionCommand::Pause) => {
                    d.recorder.pause();
                    ticking = false;
                }
                Some(SessionCommand::Resume) => {
                    d.recorder.resume();
                    ticking = true;
                    ticker.reset();
                }
                Some(SessionCommand::Stop(reason)) => break reason,
                None => break StopReason::Teardown,
            },

            _ = ticker.tick(), if ticking => {
                let elapsed = d.shared.clock.lock().elapsed(Instant::now());
                d.shared.emit(SessionEvent::Tick { elapsed_secs: elapsed.as_secs_f64() });
                if elapsed >= d.max_duration {
                    tracing::info!("Maximum duration of {:?} reached", d.max_duration);
                    break StopReason::MaxDuration;
                }
            }

            event = d.encoder_rx.recv() => match event {
                Some(MediaEvent::EncoderFailed(reason)) => {
                    failure = Some(RecorderError::RecordingFailed(reason));
                    break StopReason::EncoderFailed;
                }
                Some(event) => {
                    if let Err(e) = d.recorder.handle_event(&event) {
                        failure = Some(e);
                        break StopReason::EncoderFailed;
                    }
                    d.shared.chunks.store(d.recorder.chunk_count(), Ordering::SeqCst);
                }
                None => {
                    failure = Some(RecorderError::RecordingFailed("encoder went away".to_string()));
                    break StopReason::EncoderFailed;
                }
            },

            event = d.bus.recv() => match event {
                Ok(MediaEvent::DeviceLost { track }) if d.recorder.uses_track(track) => {
                    break StopReason::DeviceLost;
                }
                Ok(event) => {
                    if let Err(e) = d.recorder.handle_event(&event) {
                        tracing::warn!("Encoder rejected input: {}", e);
                        failure = Some(e);
                        break StopReason::EncoderFailed;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!("Recorder lagged, dropped {} stream events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break StopReason::DeviceLost,
            },
        }
    };

    finalize(d, reason, failure).await
}

async fn finalize(mut d: Driver, reason: StopReason, failure: Option<RecorderError>) -> DriverOutcome {
    let shared = d.shared.clone();
    shared.stopping.store(true, Ordering::SeqCst);
    let duration = {
        let _state = shared.state.lock();
        shared.clock.lock().stop(Instant::now())
    };
    let duration_secs = duration.as_secs_f64();
    tracing::info!("Stopping recording ({:?}) after {:.2}s", reason, duration_secs);

    let outcome = if reason == StopReason::Teardown {
        // Dropping the recorder drops the encoder with it
        drop(d.recorder);
        Ok(None)
    } else {
        let stopped = d.recorder.stop(&mut d.encoder_rx).await;
        match (failure, stopped) {
            (Some(e), _) | (None, Err(e)) => Err(e),
            (None, Ok(None)) => Ok(None),
            (None, Ok(Some((blob, format)))) => {
                let thumbnail = if format.is_video() {
                    match d.thumbnailer.extract(&blob, &format.mime_type, duration_secs).await {
                        Ok(thumbnail) => Some(thumbnail),
                        Err(e) => {
                            tracing::warn!("Recording saved without thumbnail: {}", e);
                            None
                        }
                    }
                } else {
                    None
                };

                let artifact = RecordingArtifact::new(blob, format.mime_type.clone(), duration_secs, thumbnail);
                tracing::info!(
                    "Recording finished: {} bytes of {} ({:.2}s)",
                    artifact.size_bytes(),
                    artifact.mime_type(),
                    duration_secs
                );
                *shared.artifact.lock() = Some(PublishedArtifact::publish(artifact.clone(), shared.registry.clone()));
                Ok(Some(artifact))
            }
        }
    };

    match &outcome {
        Err(e) => {
            tracing::error!("Recording failed: {}", e);
            shared.error.set(e.clone());
            shared.emit(SessionEvent::Failed(e.clone()));
        }
        Ok(_) if reason == StopReason::DeviceLost => {
            shared.error.set(RecorderError::DeviceLost);
            shared.emit(SessionEvent::Failed(RecorderError::DeviceLost));
        }
        Ok(_) => {}
    }

    *shared.state.lock() = RecordingState::Idle;
    shared.stopping.store(false, Ordering::SeqCst);
    shared.emit(SessionEvent::Stopped { reason, duration_secs });
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{TrackSettings, TrackWriter, VideoFrame};
    use crate::test_support::{FakeEncoderBackend, FakeThumbnailer};

    struct Harness {
        session: RecordingSession,
        backend: FakeEncoderBackend,
        thumbnailer: Arc<FakeThumbnailer>,
        registry: Arc<ObjectUrlRegistry>,
        stream: MediaStream,
        video: TrackWriter,
        audio: TrackWriter,
    }

    fn harness_with(max_secs: u64, mode: RecordingMode, backend: FakeEncoderBackend, thumbnailer: FakeThumbnailer) -> Harness {
        let config = StudioConfig {
            max_duration_secs: max_secs as u32,
            ..Default::default()
        };
        let registry = Arc::new(ObjectUrlRegistry::new());
        let thumbnailer = Arc::new(thumbnailer);
        let session = RecordingSession::new(
            SessionOptions::from_config(&config, mode),
            Arc::new(backend.clone()),
            thumbnailer.clone(),
            registry.clone(),
        );

        let mut stream = MediaStream::new();
        let video = stream.add_track(
            "cam",
            TrackSettings::Video {
                width: 4,
                height: 4,
                frame_rate: 30,
            },
        );
        let audio = stream.add_track(
            "mic",
            TrackSettings::Audio {
                sample_rate: 48_000,
                channels: 1,
            },
        );

        Harness {
            session,
            backend,
            thumbnailer,
            registry,
            stream,
            video,
            audio,
        }
    }

    fn harness(max_secs: u64) -> Harness {
        harness_with(max_secs, RecordingMode::Video, FakeEncoderBackend::webm(), FakeThumbnailer::new())
    }

    async fn publish_frames(writer: &TrackWriter, count: usize) {
        for _ in 0..count {
            writer.publish_frame(Arc::new(VideoFrame::new(4, 4)));
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_records_and_publishes_artifact() {
        let h = harness(120);
        h.session.start(&h.stream).await.unwrap();
        assert_eq!(h.session.state(), RecordingState::Recording);

        publish_frames(&h.video, 3).await;
        tokio::time::sleep(Duration::from_secs(2)).await;

        let artifact = h.session.stop().await.unwrap().unwrap();
        assert_eq!(h.session.state(), RecordingState::Idle);
        assert_eq!(artifact.mime_type(), "video/webm;codecs=vp9,opus");
        assert_eq!(artifact.data().as_ref(), b"vvv");
        assert!((artifact.duration_secs() - 2.0).abs() < 0.01);
        let thumbnail = artifact.thumbnail().unwrap();
        assert_eq!(thumbnail.at_secs, 1.0);
        assert_eq!(h.thumbnailer.calls(), 1);

        assert!(h.session.artifact_url().is_some());
        assert!(h.session.thumbnail_url().is_some());
        assert!(h.session.status().has_artifact);
        assert_eq!(h.registry.live_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duration_is_monotonic_while_recording() {
        let h = harness(120);
        h.session.start(&h.stream).await.unwrap();

        let mut last = Duration::ZERO;
        for _ in 0..10 {
            tokio::time::sleep(Duration::from_millis(250)).await;
            let elapsed = h.session.elapsed();
            assert!(elapsed >= last);
            last = elapsed;
        }
        assert_eq!(last, Duration::from_millis(2500));
        h.session.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_stops_at_max_duration() {
        let h = harness(5);
        let mut events = h.session.subscribe();
        h.session.start(&h.stream).await.unwrap();

        let (reason, duration_secs) = loop {
            match events.recv().await {
                Ok(SessionEvent::Stopped { reason, duration_secs }) => break (reason, duration_secs),
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(e) => panic!("event stream closed: {e}"),
            }
        };
        assert_eq!(reason, StopReason::MaxDuration);
        assert!((duration_secs - 5.0).abs() <= 0.2, "duration {duration_secs}");
        assert_eq!(h.session.state(), RecordingState::Idle);
        assert!(h.session.error().is_none());

        let artifact = h.session.artifact().unwrap();
        assert!((artifact.duration_secs() - 5.0).abs() <= 0.2);
        // Stopping after the auto-stop is a no-op
        assert!(h.session.stop().await.unwrap().is_none());
        assert!(h.session.artifact().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_excludes_paused_interval() {
        let h = harness(120);
        h.session.start(&h.stream).await.unwrap();

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(h.session.pause());
        assert!(!h.session.pause());
        assert_eq!(h.session.state(), RecordingState::Paused);

        publish_frames(&h.video, 2).await;
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(h.session.elapsed(), Duration::from_secs(1));

        assert!(h.session.resume());
        assert!(!h.session.resume());
        tokio::time::sleep(Duration::from_secs(1)).await;

        let artifact = h.session.stop().await.unwrap().unwrap();
        assert!((artifact.duration_secs() - 2.0).abs() < 0.01);
        // Frames published while paused never reach the encoder
        assert_eq!(h.backend.frames(), 0);
        assert_eq!(h.session.segments().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsupported_format_stays_idle() {
        let h = harness_with(120, RecordingMode::Video, FakeEncoderBackend::new(&[]), FakeThumbnailer::new());

        let result = h.session.start(&h.stream).await;
        assert_eq!(result, Err(RecorderError::UnsupportedFormat));
        let status = h.session.status();
        assert_eq!(status.state, RecordingState::Idle);
        assert_eq!(status.chunks, 0);
        assert_eq!(status.error, Some(RecorderError::UnsupportedFormat));
        assert_eq!(h.backend.started(), 0);

        // Gated until the error is dismissed
        assert_eq!(h.session.start(&h.stream).await, Err(RecorderError::ErrorNotCleared));
        h.session.clear_error();
        assert_eq!(h.session.start(&h.stream).await, Err(RecorderError::UnsupportedFormat));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_and_controls_are_safe_when_idle() {
        let h = harness(120);
        assert!(h.session.stop().await.unwrap().is_none());
        assert!(!h.session.pause());
        assert!(!h.session.resume());
        assert!(!h.session.clear());

        h.session.start(&h.stream).await.unwrap();
        assert_eq!(h.session.start(&h.stream).await, Err(RecorderError::AlreadyRecording));
        assert!(!h.session.clear());
        assert!(h.session.stop().await.unwrap().is_some());
        assert!(h.session.stop().await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_object_urls_are_revoked_exactly_once() {
        let h = harness(120);

        h.session.start(&h.stream).await.unwrap();
        h.session.stop().await.unwrap();
        assert_eq!(h.registry.created_count(), 2);

        // A new take discards the previous artifact
        h.session.start(&h.stream).await.unwrap();
        assert_eq!(h.registry.revoked_count(), 2);
        h.session.stop().await.unwrap();

        assert!(h.session.clear());
        assert!(!h.session.clear());
        assert_eq!(h.registry.created_count(), 4);
        assert_eq!(h.registry.revoked_count(), 4);

        h.session.start(&h.stream).await.unwrap();
        h.session.stop().await.unwrap();
        let registry = h.registry.clone();
        drop(h);
        assert_eq!(registry.created_count(), registry.revoked_count());
        assert_eq!(registry.live_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_thumbnail_failure_keeps_artifact() {
        let h = harness_with(120, RecordingMode::Video, FakeEncoderBackend::webm(), FakeThumbnailer::failing());
        h.session.start(&h.stream).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        let artifact = h.session.stop().await.unwrap().unwrap();
        assert!(artifact.thumbnail().is_none());
        assert!(h.session.thumbnail_url().is_none());
        assert!(h.session.error().is_none());
        assert_eq!(h.registry.created_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_audio_mode_skips_thumbnail() {
        let h = harness_with(120, RecordingMode::Audio, FakeEncoderBackend::webm(), FakeThumbnailer::new());
        h.session.start(&h.stream).await.unwrap();
        h.audio.publish_audio(crate::media::AudioChunk {
            sample_rate: 48_000,
            channels: 1,
            samples: vec![0.0; 960],
        });
        tokio::task::yield_now().await;

        let artifact = h.session.stop().await.unwrap().unwrap();
        assert!(!artifact.is_video());
        assert_eq!(h.thumbnailer.calls(), 0);
        assert!(h.backend.last_settings().unwrap().video.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_device_loss_stops_with_artifact() {
        let h = harness(120);
        let mut events = h.session.subscribe();
        h.session.start(&h.stream).await.unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;

        h.video.device_lost();
        loop {
            match events.recv().await {
                Ok(SessionEvent::Stopped { reason, .. }) => {
                    assert_eq!(reason, StopReason::DeviceLost);
                    break;
                }
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(e) => panic!("event stream closed: {e}"),
            }
        }

        assert_eq!(h.session.state(), RecordingState::Idle);
        assert_eq!(h.session.error(), Some(RecorderError::DeviceLost));
        assert!(h.session.artifact().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_encoder_failure_surfaces_on_stop() {
        let backend = FakeEncoderBackend::webm();
        backend.fail_on_stop();
        let h = harness_with(120, RecordingMode::Video, backend, FakeThumbnailer::new());
        h.session.start(&h.stream).await.unwrap();

        assert!(matches!(h.session.stop().await, Err(RecorderError::RecordingFailed(_))));
        assert_eq!(h.session.state(), RecordingState::Idle);
        assert!(h.session.artifact().is_none());
        assert!(matches!(h.session.error(), Some(RecorderError::RecordingFailed(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_tick_config_still_records() {
        let config = StudioConfig {
            tick_ms: 0,
            timeslice_ms: 0,
            ..Default::default()
        };
        let options = SessionOptions::from_config(&config, RecordingMode::Video);
        assert!(options.tick > Duration::ZERO);
        assert!(options.recorder.timeslice > Duration::ZERO);

        let h = harness(120);
        let session = RecordingSession::new(
            SessionOptions {
                tick: Duration::ZERO,
                ..options
            },
            Arc::new(h.backend.clone()),
            h.thumbnailer.clone(),
            h.registry.clone(),
        );
        session.start(&h.stream).await.unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;

        let artifact = session.stop().await.unwrap().unwrap();
        assert!((artifact.duration_secs() - 0.5).abs() < 0.01);
        assert_eq!(session.state(), RecordingState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_crashed_recording_task_returns_to_idle() {
        let h = harness_with(120, RecordingMode::Video, FakeEncoderBackend::webm(), FakeThumbnailer::panicking());
        let mut events = h.session.subscribe();
        h.session.start(&h.stream).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert!(matches!(h.session.stop().await, Err(RecorderError::RecordingFailed(_))));
        assert_eq!(h.session.state(), RecordingState::Idle);
        assert!(matches!(h.session.error(), Some(RecorderError::RecordingFailed(_))));
        let elapsed = h.session.elapsed();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(h.session.elapsed(), elapsed);

        let failed = loop {
            match events.try_recv() {
                Ok(SessionEvent::Failed(e)) => break e,
                Ok(_) => continue,
                Err(e) => panic!("no failure event: {e}"),
            }
        };
        assert!(matches!(failed, RecorderError::RecordingFailed(_)));

        // Gated until the error is cleared, then usable again
        assert_eq!(h.session.start(&h.stream).await, Err(RecorderError::ErrorNotCleared));
        h.session.clear_error();
        h.session.start(&h.stream).await.unwrap();
        assert_eq!(h.session.state(), RecordingState::Recording);
        h.session.teardown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_discards_recording() {
        let h = harness(120);
        h.session.start(&h.stream).await.unwrap();
        publish_frames(&h.video, 2).await;

        h.session.teardown().await;
        assert_eq!(h.session.state(), RecordingState::Idle);
        assert!(h.session.artifact().is_none());
        assert_eq!(h.registry.created_count(), 0);
    }
}
