//! Frame compositor
//!
//! Consumes the capture stream's video track, draws every frame through the
//! active background onto an RGBA surface and publishes the result as the
//! single video track of a new output stream. Audio tracks of the input are
//! cloned into the output so the capture stream stays usable on its own.
//!
//! The render loop ticks at the animation rate and publishes at most once per
//! output frame interval. A tick only draws when a new input frame or a new
//! background arrived since the last publish.

use super::background::{parse_hex_color, BackgroundSpec};
use super::error::CompositorError;
use super::image_loader::ImageLoader;
use crate::config::StudioConfig;
use crate::media::{MediaEvent, MediaStream, MediaTrack, TrackSettings, TrackWriter, VideoFrame};
use crate::utils::ErrorSlot;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Compositor tunables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositorOptions {
    pub width: u32,
    pub height: u32,
    /// Output frame rate
    pub frame_rate: u32,
    /// Render callback rate
    pub animation_fps: u32,
    /// Opacity of the camera frame over color and image backgrounds
    pub overlay_opacity: f32,
    /// Reserved for subject segmentation; not used by the renderer
    pub segmentation_model: Option<String>,
}

impl CompositorOptions {
    pub fn from_config(config: &StudioConfig) -> Self {
        Self {
            width: config.width,
            height: config.height,
            frame_rate: config.frame_rate,
            animation_fps: config.animation_fps,
            overlay_opacity: config.overlay_opacity,
            segmentation_model: None,
        }
    }
}

impl Default for CompositorOptions {
    fn default() -> Self {
        Self::from_config(&StudioConfig::default())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositorStats {
    pub frames_rendered: u64,
    /// Ticks with no decodable input frame
    pub frames_skipped: u64,
    pub draw_errors: u64,
    pub images_decoded: u64,
}

/// Outcome of [`FrameCompositor::set_background`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackgroundUpdate {
    /// Takes effect on the next rendered frame
    Applied,
    /// Image is decoding; the previous background keeps rendering
    Pending,
    /// Same spec as already requested, nothing done
    Unchanged,
}

/// A background resolved to something drawable
#[derive(Debug, Clone)]
enum ResolvedBackground {
    None,
    Blur(f32),
    Color([u8; 4]),
    Image { uri: String, bitmap: Arc<VideoFrame> },
}

struct RenderState {
    surface: VideoFrame,
    latest: Option<Arc<VideoFrame>>,
    spec: BackgroundSpec,
    background: ResolvedBackground,
    opacity: f32,
    dirty: bool,
    last_publish: Option<Instant>,
    publish_interval: Duration,
    /// Half an animation tick, absorbs timer rounding
    slack: Duration,
    stats: CompositorStats,
}

impl RenderState {
    fn new(options: &CompositorOptions) -> Self {
        let animation_interval = Duration::from_secs(1) / options.animation_fps.max(1);
        Self {
            surface: VideoFrame::new(options.width, options.height),
            latest: None,
            spec: BackgroundSpec::None,
            background: ResolvedBackground::None,
            opacity: options.overlay_opacity,
            dirty: false,
            last_publish: None,
            publish_interval: Duration::from_secs(1) / options.frame_rate.max(1),
            slack: animation_interval / 2,
            stats: CompositorStats::default(),
        }
    }

    fn on_input_frame(&mut self, frame: Arc<VideoFrame>) {
        self.latest = Some(frame);
        self.dirty = true;
    }

    fn set_background(&mut self, spec: BackgroundSpec, background: ResolvedBackground) {
        self.spec = spec;
        self.background = background;
        self.dirty = true;
    }

    fn reset(&mut self) {
        self.latest = None;
        self.dirty = false;
        self.last_publish = None;
        self.surface.clear();
    }

    /// One animation-frame callback. Returns the frame to publish, if any.
    fn on_animation_frame(&mut self, now: Instant) -> Result<Option<Arc<VideoFrame>>, CompositorError> {
        let input = match &self.latest {
            Some(frame) if !frame.is_empty() => frame.clone(),
            _ => {
                self.stats.frames_skipped += 1;
                return Ok(None);
            }
        };
        if !self.dirty {
            return Ok(None);
        }
        if let Some(last) = self.last_publish {
            if now.duration_since(last) + self.slack < self.publish_interval {
                return Ok(None);
            }
        }

        self.surface.clear();
        match &self.background {
            ResolvedBackground::None => self.surface.draw_scaled(&input, 1.0),
            ResolvedBackground::Blur(sigma) => {
                // Whole frame, subject included
                self.surface.draw_scaled(&input, 1.0);
                self.surface.gaussian_blur(*sigma);
            }
            ResolvedBackground::Color(rgba) => {
                self.surface.fill(*rgba);
                self.surface.draw_scaled(&input, self.opacity);
            }
            ResolvedBackground::Image { uri, bitmap } => {
                if bitmap.is_empty() {
                    self.dirty = false;
                    return Err(CompositorError::ImageNotReady(uri.clone()));
                }
                self.surface.draw_scaled(bitmap, 1.0);
                self.surface.draw_scaled(&input, self.opacity);
            }
        }

        self.dirty = false;
        self.last_publish = Some(now);
        self.stats.frames_rendered += 1;
        Ok(Some(Arc::new(self.surface.clone())))
    }
}

struct CompositorShared {
    render: Mutex<RenderState>,
    /// Decoded bitmaps keyed by URI
    images: Mutex<HashMap<String, Arc<VideoFrame>>>,
    /// Last spec handed to `set_background`, possibly still decoding
    requested: Mutex<BackgroundSpec>,
    applied: watch::Sender<BackgroundSpec>,
    images_decoded: AtomicU64,
    error: ErrorSlot<CompositorError>,
}

impl CompositorShared {
    fn apply(&self, spec: BackgroundSpec, background: ResolvedBackground) {
        self.render.lock().set_background(spec.clone(), background);
        tracing::debug!("Background applied: {:?}", spec);
        self.applied.send_replace(spec);
    }
}

struct RunHandle {
    active: Arc<AtomicBool>,
    stop_tx: watch::Sender<bool>,
    output: MediaStream,
    _task: JoinHandle<()>,
}

pub struct FrameCompositor {
    options: CompositorOptions,
    loader: Arc<dyn ImageLoader>,
    shared: Arc<CompositorShared>,
    run: Mutex<Option<RunHandle>>,
}

impl FrameCompositor {
    pub fn new(options: CompositorOptions, loader: Arc<dyn ImageLoader>) -> Self {
        let (applied, _) = watch::channel(BackgroundSpec::None);
        let shared = Arc::new(CompositorShared {
            render: Mutex::new(RenderState::new(&options)),
            images: Mutex::new(HashMap::new()),
            requested: Mutex::new(BackgroundSpec::None),
            applied,
            images_decoded: AtomicU64::new(0),
            error: ErrorSlot::new(),
        });

        Self {
            options,
            loader,
            shared,
            run: Mutex::new(None),
        }
    }

    pub fn options(&self) -> &CompositorOptions {
        &self.options
    }

    /// Switch the background.
    ///
    /// Colors, blur and passthrough apply immediately. An image that is not
    /// cached yet is decoded on a separate task while the current background
    /// keeps rendering; it is applied once decoded unless another spec was
    /// requested in the meantime. Requesting the spec that is already
    /// requested does nothing.
    pub fn set_background(&self, spec: BackgroundSpec) -> Result<BackgroundUpdate, CompositorError> {
        self.request_background(spec).map_err(|e| {
            tracing::warn!("Background rejected: {}", e);
            self.shared.error.set(e.clone());
            e
        })
    }

    fn request_background(&self, spec: BackgroundSpec) -> Result<BackgroundUpdate, CompositorError> {
        spec.validate()?;

        let mut requested = self.shared.requested.lock();
        if *requested == spec {
            return Ok(BackgroundUpdate::Unchanged);
        }

        let resolved = match &spec {
            BackgroundSpec::None => ResolvedBackground::None,
            BackgroundSpec::Blur(px) => ResolvedBackground::Blur(*px as f32),
            BackgroundSpec::Color(hex) => ResolvedBackground::Color(parse_hex_color(hex)?),
            BackgroundSpec::Image(uri) => {
                let cached = self.shared.images.lock().get(uri).cloned();
                match cached {
                    Some(bitmap) => ResolvedBackground::Image {
                        uri: uri.clone(),
                        bitmap,
                    },
                    None => {
                        let handle = tokio::runtime::Handle::try_current().map_err(|_| CompositorError::NoRuntime)?;
                        *requested = spec.clone();
                        handle.spawn(decode_background(self.shared.clone(), self.loader.clone(), uri.clone()));
                        tracing::info!("Decoding background image {}", uri);
                        return Ok(BackgroundUpdate::Pending);
                    }
                }
            }
        };

        *requested = spec.clone();
        self.shared.apply(spec, resolved);
        Ok(BackgroundUpdate::Applied)
    }

    /// Background currently being drawn
    pub fn active_background(&self) -> BackgroundSpec {
        self.shared.render.lock().spec.clone()
    }

    /// Background most recently requested
    pub fn requested_background(&self) -> BackgroundSpec {
        self.shared.requested.lock().clone()
    }

    /// Watch the drawn background change
    pub fn subscribe_background(&self) -> watch::Receiver<BackgroundSpec> {
        self.shared.applied.subscribe()
    }

    /// Start compositing `input`. Returns the existing output when already running.
    pub fn start(&self, input: &MediaStream) -> Result<MediaStream, CompositorError> {
        let mut run = self.run.lock();
        if let Some(existing) = run.as_ref() {
            return Ok(existing.output.clone());
        }

        let handle = tokio::runtime::Handle::try_current().map_err(|_| CompositorError::NoRuntime)?;
        let video = input
            .video_tracks()
            .into_iter()
            .next()
            .ok_or(CompositorError::NoVideoTrack)?;

        let mut output = MediaStream::new();
        let writer = output.add_track(
            "Composited video",
            TrackSettings::Video {
                width: self.options.width,
                height: self.options.height,
                frame_rate: self.options.frame_rate,
            },
        );
        for track in input.audio_tracks() {
            input.clone_track_into(&track, &mut output);
        }

        self.shared.render.lock().reset();
        let (stop_tx, stop_rx) = watch::channel(false);
        let active = Arc::new(AtomicBool::new(true));
        let task = handle.spawn(render_loop(RenderLoop {
            shared: self.shared.clone(),
            events: input.subscribe(),
            video,
            writer,
            stop_rx,
            active: active.clone(),
            animation_fps: self.options.animation_fps,
        }));

        tracing::info!(
            "Compositor started: {}x{} @ {}fps, {} audio track(s) cloned",
            self.options.width,
            self.options.height,
            self.options.frame_rate,
            output.audio_tracks().len()
        );

        *run = Some(RunHandle {
            active,
            stop_tx,
            output: output.clone(),
            _task: task,
        });
        Ok(output)
    }

    /// Stop the render loop and every output track. Returns `false` when not running.
    pub fn stop(&self) -> bool {
        let Some(run) = self.run.lock().take() else {
            return false;
        };

        run.active.store(false, Ordering::SeqCst);
        let _ = run.stop_tx.send(true);
        let stopped = run.output.stop_all();
        self.shared.render.lock().reset();

        tracing::info!("Compositor stopped ({} output track(s) ended)", stopped);
        true
    }

    pub fn is_active(&self) -> bool {
        self.run.lock().is_some()
    }

    pub fn output_stream(&self) -> Option<MediaStream> {
        self.run.lock().as_ref().map(|run| run.output.clone())
    }

    pub fn stats(&self) -> CompositorStats {
        let mut stats = self.shared.render.lock().stats;
        stats.images_decoded = self.shared.images_decoded.load(Ordering::Relaxed);
        stats
    }

    /// Last background load failure
    pub fn error(&self) -> Option<CompositorError> {
        self.shared.error.get()
    }

    pub fn clear_error(&self) -> Option<CompositorError> {
        self.shared.error.clear()
    }
}

impl Drop for FrameCompositor {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn decode_background(shared: Arc<CompositorShared>, loader: Arc<dyn ImageLoader>, uri: String) {
    let spec = BackgroundSpec::Image(uri.clone());

    match loader.load(&uri).await {
        Ok(bitmap) => {
            let bitmap = Arc::new(bitmap);
            shared.images.lock().insert(uri.clone(), bitmap.clone());
            shared.images_decoded.fetch_add(1, Ordering::Relaxed);

            let requested = shared.requested.lock();
            if *requested == spec {
                shared.apply(spec, ResolvedBackground::Image { uri, bitmap });
            } else {
                tracing::debug!("Decoded {} after it was superseded; cached only", uri);
            }
        }
        Err(e) => {
            tracing::warn!("Background image failed to load: {}", e);
            shared.error.set(e);
            let mut requested = shared.requested.lock();
            if *requested == spec {
                // Keep drawing what was there and allow a retry
                *requested = shared.render.lock().spec.clone();
            }
        }
    }
}

struct RenderLoop {
    shared: Arc<CompositorShared>,
    events: broadcast::Receiver<MediaEvent>,
    video: MediaTrack,
    writer: TrackWriter,
    stop_rx: watch::Receiver<bool>,
    active: Arc<AtomicBool>,
    animation_fps: u32,
}

async fn render_loop(mut ctx: RenderLoop) {
    let mut ticker = tokio::time::interval(Duration::from_secs(1) / ctx.animation_fps.max(1));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let video_id = ctx.video.id();

    while ctx.active.load(Ordering::SeqCst) {
        tokio::select! {
            biased;
            _ = ctx.stop_rx.changed() => break,
            _ = ctx.video.ended() => {
                tracing::warn!("Compositor input video ended");
                ctx.writer.device_lost();
                break;
            }
            event = ctx.events.recv() => match event {
                Ok(MediaEvent::FrameReady { track, frame }) if track == video_id => {
                    ctx.shared.render.lock().on_input_frame(frame);
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!("Compositor lagged, dropped {} input events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            now = ticker.tick() => {
                // stop() can land while this task waits on the ticker
                if !ctx.active.load(Ordering::SeqCst) {
                    break;
                }
                let rendered = ctx.shared.render.lock().on_animation_frame(now);
                match rendered {
                    Ok(Some(frame)) => {
                        ctx.writer.publish_frame(frame);
                    }
                    Ok(None) => {}
                    Err(e) => {
                        ctx.shared.render.lock().stats.draw_errors += 1;
                        tracing::warn!("Skipping composited frame: {}", e);
                    }
                }
            }
        }
    }

    tracing::debug!("Render loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{CaptureConstraints, CaptureSource, SyntheticBackend};
    use crate::config::RecordingMode;
    use crate::test_support::StaticImageLoader;

    const WHITE: [u8; 4] = [255, 255, 255, 255];

    fn small_config() -> StudioConfig {
        StudioConfig {
            width: 8,
            height: 6,
            ..StudioConfig::default()
        }
    }

    fn options() -> CompositorOptions {
        CompositorOptions::from_config(&small_config())
    }

    async fn camera(backend: &SyntheticBackend) -> (CaptureSource, MediaStream, TrackWriter) {
        backend.set_producing(false);
        let source = CaptureSource::new(Arc::new(backend.clone()));
        let constraints = CaptureConstraints::for_mode(&small_config(), RecordingMode::Video);
        let stream = source.initialize(&constraints).await.unwrap();
        let video = backend
            .writers()
            .into_iter()
            .find(|w| w.track().kind() == crate::media::TrackKind::Video)
            .unwrap();
        (source, stream, video)
    }

    async fn next_frame(rx: &mut broadcast::Receiver<MediaEvent>) -> Arc<VideoFrame> {
        loop {
            let event = tokio::time::timeout(Duration::from_millis(100), rx.recv())
                .await
                .expect("no composited frame")
                .unwrap();
            if let MediaEvent::FrameReady { frame, .. } = event {
                return frame;
            }
        }
    }

    #[test]
    fn test_render_state_branches() {
        let mut state = RenderState::new(&options());
        let now = Instant::now();

        // Nothing decodable yet
        assert!(state.on_animation_frame(now).unwrap().is_none());
        assert_eq!(state.stats.frames_skipped, 1);

        state.on_input_frame(Arc::new(VideoFrame::solid(4, 3, WHITE)));
        let frame = state.on_animation_frame(now).unwrap().unwrap();
        assert_eq!(frame.dimensions(), (8, 6));
        assert_eq!(frame.pixel(7, 5), Some(WHITE));

        // Not dirty: no redraw
        assert!(state.on_animation_frame(now + Duration::from_millis(40)).unwrap().is_none());

        state.set_background(
            BackgroundSpec::Color("#ff0000".to_string()),
            ResolvedBackground::Color([255, 0, 0, 255]),
        );
        // Too soon after the last publish
        assert!(state.on_animation_frame(now + Duration::from_millis(5)).unwrap().is_none());
        let frame = state.on_animation_frame(now + Duration::from_millis(34)).unwrap().unwrap();
        assert_eq!(frame.pixel(0, 0), Some([255, 204, 204, 255]));
    }

    #[test]
    fn test_blur_covers_whole_frame() {
        let mut state = RenderState::new(&options());
        let mut data = VideoFrame::solid(8, 6, [0, 0, 0, 255]).into_raw();
        let center = (3 * 8 + 4) * 4;
        data[center..center + 3].copy_from_slice(&[255, 255, 255]);
        state.on_input_frame(Arc::new(VideoFrame::from_rgba(8, 6, data).unwrap()));
        state.set_background(BackgroundSpec::Blur(2), ResolvedBackground::Blur(2.0));

        let frame = state.on_animation_frame(Instant::now()).unwrap().unwrap();
        let center = frame.pixel(4, 3).unwrap();
        let neighbour = frame.pixel(5, 3).unwrap();
        assert!(center[0] < 255);
        assert!(neighbour[0] > 0);
    }

    #[test]
    fn test_huge_blur_renders() {
        let mut state = RenderState::new(&options());
        state.on_input_frame(Arc::new(VideoFrame::solid(8, 6, WHITE)));
        state.set_background(BackgroundSpec::Blur(9_000_000), ResolvedBackground::Blur(9_000_000.0));

        let frame = state.on_animation_frame(Instant::now()).unwrap().unwrap();
        assert_eq!(frame.pixel(4, 3), Some(WHITE));
    }

    #[test]
    fn test_empty_image_is_a_draw_error() {
        let mut state = RenderState::new(&options());
        state.on_input_frame(Arc::new(VideoFrame::solid(8, 6, WHITE)));
        state.set_background(
            BackgroundSpec::Image("bad".to_string()),
            ResolvedBackground::Image {
                uri: "bad".to_string(),
                bitmap: Arc::new(VideoFrame::new(0, 0)),
            },
        );
        assert!(matches!(
            state.on_animation_frame(Instant::now()),
            Err(CompositorError::ImageNotReady(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_color_background_output_tracks() {
        let backend = SyntheticBackend::new();
        let (_source, stream, video) = camera(&backend).await;
        let compositor = FrameCompositor::new(options(), Arc::new(StaticImageLoader::new()));

        assert_eq!(
            compositor.set_background(BackgroundSpec::Color("#ff0000".to_string())).unwrap(),
            BackgroundUpdate::Applied
        );
        let output = compositor.start(&stream).unwrap();
        assert_eq!(output.video_tracks().len(), 1);
        assert_eq!(output.audio_tracks().len(), stream.audio_tracks().len());
        assert!(compositor.is_active());

        let mut rx = output.subscribe();
        video.publish_frame(Arc::new(VideoFrame::solid(8, 6, WHITE)));
        let frame = next_frame(&mut rx).await;
        assert_eq!(frame.pixel(3, 3), Some([255, 204, 204, 255]));

        // Same spec again is a no-op
        assert_eq!(
            compositor.set_background(BackgroundSpec::Color("#ff0000".to_string())).unwrap(),
            BackgroundUpdate::Unchanged
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_previous_background_renders_while_image_decodes() {
        let backend = SyntheticBackend::new();
        let (_source, stream, video) = camera(&backend).await;
        let uri = "https://example/bg.jpg";
        let loader = Arc::new(StaticImageLoader::gated().with_image(uri, VideoFrame::solid(2, 2, [0, 255, 0, 255])));
        let compositor = FrameCompositor::new(options(), loader.clone());

        compositor.set_background(BackgroundSpec::Color("#0000ff".to_string())).unwrap();
        let output = compositor.start(&stream).unwrap();
        let mut rx = output.subscribe();

        assert_eq!(
            compositor.set_background(BackgroundSpec::Image(uri.to_string())).unwrap(),
            BackgroundUpdate::Pending
        );
        for _ in 0..3 {
            video.publish_frame(Arc::new(VideoFrame::solid(8, 6, WHITE)));
            let frame = next_frame(&mut rx).await;
            // Still the blue background, never blank
            assert_eq!(frame.pixel(0, 0), Some([204, 204, 255, 255]));
        }
        assert_eq!(compositor.active_background(), BackgroundSpec::Color("#0000ff".to_string()));

        let mut applied = compositor.subscribe_background();
        loader.release();
        applied
            .wait_for(|spec| *spec == BackgroundSpec::Image(uri.to_string()))
            .await
            .unwrap();

        video.publish_frame(Arc::new(VideoFrame::solid(8, 6, WHITE)));
        let frame = next_frame(&mut rx).await;
        assert_eq!(frame.pixel(0, 0), Some([204, 255, 204, 255]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_image_spec_decodes_once() {
        let uri = "file:///bg.png";
        let loader = Arc::new(StaticImageLoader::new().with_image(uri, VideoFrame::solid(2, 2, WHITE)));
        let compositor = FrameCompositor::new(options(), loader.clone());
        let image = BackgroundSpec::Image(uri.to_string());

        assert_eq!(compositor.set_background(image.clone()).unwrap(), BackgroundUpdate::Pending);
        assert_eq!(compositor.set_background(image.clone()).unwrap(), BackgroundUpdate::Unchanged);
        compositor
            .subscribe_background()
            .wait_for(|spec| *spec == image)
            .await
            .unwrap();
        assert_eq!(compositor.set_background(image.clone()).unwrap(), BackgroundUpdate::Unchanged);

        // Back to a cached image: applied without decoding
        compositor.set_background(BackgroundSpec::Blur(5)).unwrap();
        assert_eq!(compositor.set_background(image.clone()).unwrap(), BackgroundUpdate::Applied);
        assert_eq!(loader.loads(), 1);
        assert_eq!(compositor.stats().images_decoded, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_image_keeps_previous_background() {
        let compositor = FrameCompositor::new(options(), Arc::new(StaticImageLoader::new()));
        compositor.set_background(BackgroundSpec::Blur(10)).unwrap();
        compositor
            .set_background(BackgroundSpec::Image("https://example/missing.png".to_string()))
            .unwrap();

        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(matches!(compositor.error(), Some(CompositorError::ImageLoad { .. })));
        assert_eq!(compositor.active_background(), BackgroundSpec::Blur(10));
        assert_eq!(compositor.requested_background(), BackgroundSpec::Blur(10));
    }

    #[test]
    fn test_invalid_background_fills_error_slot() {
        let compositor = FrameCompositor::new(options(), Arc::new(StaticImageLoader::new()));
        compositor.set_background(BackgroundSpec::Blur(3)).unwrap();

        let err = compositor
            .set_background(BackgroundSpec::Color("#zz0000".to_string()))
            .unwrap_err();
        assert!(matches!(err, CompositorError::InvalidColor(_)));
        assert_eq!(compositor.error(), Some(err));
        assert_eq!(compositor.active_background(), BackgroundSpec::Blur(3));

        assert!(compositor.set_background(BackgroundSpec::Image("  ".to_string())).is_err());
        assert!(matches!(compositor.clear_error(), Some(CompositorError::ImageLoad { .. })));
        assert!(compositor.error().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_draw_error_does_not_stop_loop() {
        let backend = SyntheticBackend::new();
        let (_source, stream, video) = camera(&backend).await;
        let loader = Arc::new(StaticImageLoader::new().with_image("broken", VideoFrame::new(0, 0)));
        let compositor = FrameCompositor::new(options(), loader);
        let output = compositor.start(&stream).unwrap();
        let mut rx = output.subscribe();

        let image = BackgroundSpec::Image("broken".to_string());
        compositor.set_background(image.clone()).unwrap();
        compositor.subscribe_background().wait_for(|s| *s == image).await.unwrap();

        video.publish_frame(Arc::new(VideoFrame::solid(8, 6, WHITE)));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(compositor.stats().draw_errors > 0);

        compositor.set_background(BackgroundSpec::None).unwrap();
        let frame = next_frame(&mut rx).await;
        assert_eq!(frame.pixel(0, 0), Some(WHITE));
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_blur_keeps_loop_publishing() {
        let backend = SyntheticBackend::new();
        let (_source, stream, video) = camera(&backend).await;
        let compositor = FrameCompositor::new(options(), Arc::new(StaticImageLoader::new()));
        compositor.set_background(BackgroundSpec::Blur(9_000_000)).unwrap();
        let output = compositor.start(&stream).unwrap();
        let mut rx = output.subscribe();

        video.publish_frame(Arc::new(VideoFrame::solid(8, 6, WHITE)));
        assert_eq!(next_frame(&mut rx).await.pixel(0, 0), Some(WHITE));

        compositor.set_background(BackgroundSpec::None).unwrap();
        video.publish_frame(Arc::new(VideoFrame::solid(8, 6, [0, 0, 0, 255])));
        let frame = next_frame(&mut rx).await;
        assert_eq!(frame.pixel(0, 0), Some([0, 0, 0, 255]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_safe_and_leaves_capture_running() {
        let backend = SyntheticBackend::new();
        let (_source, stream, _video) = camera(&backend).await;
        let compositor = FrameCompositor::new(options(), Arc::new(StaticImageLoader::new()));

        assert!(!compositor.stop());

        let output = compositor.start(&stream).unwrap();
        let again = compositor.start(&stream).unwrap();
        assert_eq!(output.id(), again.id());

        assert!(compositor.stop());
        assert!(!compositor.stop());
        assert!(!output.is_live());
        assert!(stream.is_live());
        assert!(compositor.output_stream().is_none());
    }

    #[tokio::test]
    async fn test_start_requires_video() {
        let compositor = FrameCompositor::new(options(), Arc::new(StaticImageLoader::new()));
        let mut audio_only = MediaStream::new();
        audio_only.add_track(
            "mic",
            TrackSettings::Audio {
                sample_rate: 48_000,
                channels: 1,
            },
        );
        assert_eq!(compositor.start(&audio_only).unwrap_err(), CompositorError::NoVideoTrack);
    }
}
