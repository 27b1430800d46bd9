//! Local render loop driver.
//!
//! One tokio task per job. The task owns its sources, output buffer, and
//! encoder session, and pulls background frames as they become available:
//!
//! ```text
//! load metadata → open encoder → play → [next_frame → draw → push]* → close → persist
//! ```
//!
//! The loop ends at the earliest of: background natural end, the wall-clock
//! safety ceiling, the preview frame budget, or an explicit stop request.
//! A frame in progress always completes.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use image::RgbaImage;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use vidlay_common::{progress_percent, AppConfig, FrameClock, RenderClock, VidlayError, VidlayResult};
use vidlay_render_model::{
    resolve_scale, Container, FrameSize, JobId, JobParams, JobStatus, RenderOutput, RenderRequest,
    Transform,
};

use crate::compositor::{FrameCompositor, LayerStyle, Sampling};
use crate::encoder::{EncodeSpec, EncodedVideo, EncoderAdapter, EncoderHandle, EncoderHost};
use crate::job_store::JobStore;
use crate::media::{
    load_image, open_media, MediaInfo, MediaSource, VideoFrame, FALLBACK_SOURCE_FPS,
};

pub const MIN_OVERLAY_DURATION_SECS: f64 = 3.0;
pub const MAX_OVERLAY_DURATION_SECS: f64 = 30.0;

/// Fixed length of a preview simulation.
pub const PREVIEW_DURATION_SECS: f64 = 3.0;
pub const PREVIEW_FPS: u32 = 30;

const DEFAULT_SAFETY_CEILING: Duration = Duration::from_secs(20);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenderMode {
    #[default]
    Full,
    /// Exactly [`PREVIEW_DURATION_SECS`] at [`PREVIEW_FPS`].
    PreviewSimulation,
}

/// Host-wide settings shared by every job.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderSettings {
    pub fps: u32,
    pub safety_ceiling: Duration,
    pub default_duration_secs: f64,
    pub output_dir: PathBuf,
}

impl RenderSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        let ceiling = config.render.safety_ceiling_secs;
        let default_duration = config.render.default_duration_secs;
        Self {
            fps: config.render.fps.max(1),
            safety_ceiling: if ceiling.is_finite() && ceiling > 0.0 {
                Duration::from_secs_f64(ceiling)
            } else {
                DEFAULT_SAFETY_CEILING
            },
            default_duration_secs: if default_duration.is_finite() && default_duration > 0.0 {
                default_duration
            } else {
                5.0
            },
            output_dir: config.output_dir.clone(),
        }
    }
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// Per-job options.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderOptions {
    pub params: JobParams,
    pub preferred_container: Container,
    /// Coordinate space the transform was captured in.
    pub source_frame: Option<FrameSize>,
    pub mode: RenderMode,
    pub editing: bool,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            params: JobParams::default(),
            preferred_container: Container::Mp4,
            source_frame: None,
            mode: RenderMode::Full,
            editing: false,
        }
    }
}

impl RenderOptions {
    pub fn for_request(request: &RenderRequest) -> Self {
        Self {
            params: request.params.clone(),
            source_frame: request.source_frame(),
            ..Self::default()
        }
    }

    pub fn style(&self) -> LayerStyle {
        LayerStyle {
            sampling: if self.params.exact_positioning {
                Sampling::Nearest
            } else {
                Sampling::Bilinear
            },
            editing: self.editing,
        }
    }
}

/// Media owned by one job.
pub struct RenderSources {
    pub background: Box<dyn MediaSource>,
    pub overlay_image: Option<RgbaImage>,
    pub overlay_video: Option<Box<dyn MediaSource>>,
}

impl RenderSources {
    /// Open every reference in `request`.
    pub async fn open(request: &RenderRequest, settings: &RenderSettings) -> VidlayResult<Self> {
        let background = open_media(
            &request.background,
            settings.fps,
            settings.default_duration_secs,
        )
        .await?;
        let overlay_image = load_image(&request.overlay_image).await?;
        let overlay_video = match &request.overlay_video {
            Some(reference) => Some(
                open_media(reference, settings.fps, settings.default_duration_secs).await?,
            ),
            None => None,
        };
        Ok(Self {
            background,
            overlay_image: Some(overlay_image),
            overlay_video,
        })
    }

    async fn stop(&mut self) {
        self.background.stop().await;
        if let Some(video) = self.overlay_video.as_mut() {
            video.stop().await;
        }
    }
}

/// Cooperative stop flag checked between frames.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Handle to a spawned render task.
pub struct RenderHandle {
    job_id: JobId,
    progress: watch::Receiver<u8>,
    stop: StopHandle,
    task: JoinHandle<JobStatus>,
}

impl RenderHandle {
    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// Live progress percentage. Reaches 100 only on completion.
    pub fn progress(&self) -> watch::Receiver<u8> {
        self.progress.clone()
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Ask the loop to finish after the current frame.
    pub fn stop(&self) {
        self.stop.stop();
    }

    /// Wait for the job to reach a terminal state.
    pub async fn wait(self) -> VidlayResult<JobStatus> {
        self.task
            .await
            .map_err(|e| VidlayError::render(format!("Render task failed: {e}")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopReason {
    NaturalEnd,
    SafetyCeiling,
    PreviewComplete,
    Requested,
}

#[derive(Debug, Clone, Copy)]
struct LoopStats {
    frames: u64,
    reason: StopReason,
    elapsed_secs: f64,
}

/// Tracks which overlay video frame is on screen for a given background time.
#[derive(Default)]
struct OverlayCursor {
    current: Option<Arc<RgbaImage>>,
    pending: Option<VideoFrame>,
    ended: bool,
}

impl OverlayCursor {
    /// Latest overlay frame at or before `pts_secs`. Holds the last frame after the overlay ends.
    async fn advance(
        &mut self,
        source: &mut dyn MediaSource,
        pts_secs: f64,
    ) -> VidlayResult<Option<Arc<RgbaImage>>> {
        loop {
            if self.pending.is_none() && !self.ended {
                self.pending = source.next_frame().await?;
                self.ended = self.pending.is_none();
            }
            match self.pending.take() {
                Some(frame) if frame.pts_secs <= pts_secs || self.current.is_none() => {
                    self.current = Some(frame.image);
                }
                Some(frame) => {
                    self.pending = Some(frame);
                    break;
                }
                None => break,
            }
        }
        Ok(self.current.clone())
    }
}

/// Drives jobs on an encoder host.
#[derive(Clone)]
pub struct RenderLoop {
    host: Arc<dyn EncoderHost>,
    settings: RenderSettings,
}

impl RenderLoop {
    pub fn new(host: Arc<dyn EncoderHost>, settings: RenderSettings) -> Self {
        Self { host, settings }
    }

    pub fn host(&self) -> &Arc<dyn EncoderHost> {
        &self.host
    }

    pub fn settings(&self) -> &RenderSettings {
        &self.settings
    }

    /// Run a job on its own task with already-open sources.
    pub fn spawn(
        &self,
        store: Arc<JobStore>,
        job_id: JobId,
        sources: RenderSources,
        transform: Transform,
        options: RenderOptions,
    ) -> RenderHandle {
        let stop = StopHandle::new();
        let (progress_tx, progress_rx) = watch::channel(0u8);
        let driver = self.clone();
        let task_stop = stop.clone();
        let task_id = job_id.clone();

        let task = tokio::spawn(async move {
            driver
                .run(
                    &store,
                    &task_id,
                    sources,
                    &transform,
                    &options,
                    &task_stop,
                    &progress_tx,
                )
                .await
        });

        RenderHandle {
            job_id,
            progress: progress_rx,
            stop,
            task,
        }
    }

    /// Open the media in `request` and run it on its own task.
    ///
    /// A reference that fails to open fails the job rather than the call.
    pub fn spawn_request(
        &self,
        store: Arc<JobStore>,
        job_id: JobId,
        request: RenderRequest,
        options: RenderOptions,
    ) -> RenderHandle {
        let stop = StopHandle::new();
        let (progress_tx, progress_rx) = watch::channel(0u8);
        let driver = self.clone();
        let task_stop = stop.clone();
        let task_id = job_id.clone();

        let task = tokio::spawn(async move {
            match RenderSources::open(&request, &driver.settings).await {
                Ok(sources) => {
                    driver
                        .run(
                            &store,
                            &task_id,
                            sources,
                            &request.transform,
                            &options,
                            &task_stop,
                            &progress_tx,
                        )
                        .await
                }
                Err(err) => {
                    record_failure(&store, &task_id, &err).await;
                    JobStatus::Failed
                }
            }
        });

        RenderHandle {
            job_id,
            progress: progress_rx,
            stop,
            task,
        }
    }

    /// Render to completion and record the terminal state in `store`.
    #[allow(clippy::too_many_arguments)]
    pub async fn run(
        &self,
        store: &JobStore,
        job_id: &JobId,
        sources: RenderSources,
        transform: &Transform,
        options: &RenderOptions,
        stop: &StopHandle,
        progress: &watch::Sender<u8>,
    ) -> JobStatus {
        match self
            .execute(store, job_id, sources, transform, options, stop, progress)
            .await
        {
            Ok(output) => match store.complete(job_id, output).await {
                Ok(()) => {
                    progress.send_replace(100);
                    JobStatus::Completed
                }
                Err(err) => {
                    tracing::warn!(job_id = %job_id, error = %err, "Could not record completion");
                    store
                        .get(job_id)
                        .await
                        .map(|job| job.status)
                        .unwrap_or(JobStatus::Failed)
                }
            },
            Err(err) => {
                record_failure(store, job_id, &err).await;
                JobStatus::Failed
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn execute(
        &self,
        store: &JobStore,
        job_id: &JobId,
        mut sources: RenderSources,
        transform: &Transform,
        options: &RenderOptions,
        stop: &StopHandle,
        progress: &watch::Sender<u8>,
    ) -> VidlayResult<RenderOutput> {
        let mut encoder: Option<EncoderHandle> = None;
        let outcome = self
            .drive(
                store,
                job_id,
                &mut sources,
                transform,
                options,
                stop,
                progress,
                &mut encoder,
            )
            .await;

        sources.stop().await;
        let encoded = match encoder.as_mut() {
            Some(handle) => Some(handle.close().await),
            None => None,
        };

        let stats = outcome?;
        let video = encoded.ok_or_else(|| VidlayError::render("Encoder was never opened"))??;
        tracing::info!(
            job_id = %job_id,
            frames = stats.frames,
            reason = ?stats.reason,
            elapsed_secs = stats.elapsed_secs,
            bytes = video.len(),
            "Render loop finished"
        );
        self.persist(job_id, &video).await
    }

    #[allow(clippy::too_many_arguments)]
    async fn drive(
        &self,
        store: &JobStore,
        job_id: &JobId,
        sources: &mut RenderSources,
        transform: &Transform,
        options: &RenderOptions,
        stop: &StopHandle,
        progress: &watch::Sender<u8>,
        encoder_slot: &mut Option<EncoderHandle>,
    ) -> VidlayResult<LoopStats> {
        let background = sources.background.load().await?;
        let overlay = match sources.overlay_video.as_mut() {
            Some(video) => Some(video.load().await?),
            None => None,
        };

        let total_secs = self.target_duration(overlay.as_ref(), options.mode);
        let frame_clock = FrameClock::new(self.output_fps(&background, options));
        let frame_budget = match options.mode {
            RenderMode::PreviewSimulation => Some(frame_clock.frames_in(PREVIEW_DURATION_SECS)),
            RenderMode::Full => None,
        };
        let scale = resolve_scale(options.source_frame, Some(background.frame_size()));

        tracing::info!(
            job_id = %job_id,
            width = background.width,
            height = background.height,
            fps = frame_clock.fps(),
            total_secs,
            scale_x = scale.x,
            scale_y = scale.y,
            mode = ?options.mode,
            "Starting render loop"
        );

        let spec = EncodeSpec::new(
            background.width,
            background.height,
            frame_clock.fps(),
            options.params.quality,
        );
        let encoder = encoder_slot.insert(
            EncoderAdapter::open(self.host.as_ref(), &spec, options.preferred_container).await?,
        );

        sources.background.play().await?;
        if let Some(video) = sources.overlay_video.as_mut() {
            video.play().await?;
        }

        // Without preserved speed the source rate differs from the output
        // rate, so frames are repeated or dropped by their timestamps.
        let resample =
            !(options.mode == RenderMode::Full && options.params.preserve_original_speed);
        let source_frame_secs = 1.0 / source_fps(&background);
        let mut source_origin: Option<f64> = None;

        let compositor = FrameCompositor::new(options.style());
        let mut target = RgbaImage::new(background.width, background.height);
        let mut overlay_cursor = OverlayCursor::default();
        let clock = RenderClock::start();
        tracing::debug!(job_id = %job_id, started_at = clock.epoch_wall(), "Encoding started");
        let mut index = 0u64;
        let mut reported = 0u8;

        let reason = 'render: loop {
            if stop.is_stopped() {
                break StopReason::Requested;
            }
            if clock.exceeded(self.settings.safety_ceiling) {
                tracing::warn!(job_id = %job_id, frames = index, "Render hit safety ceiling");
                break StopReason::SafetyCeiling;
            }
            if frame_budget.is_some_and(|budget| index >= budget) {
                break StopReason::PreviewComplete;
            }
            let Some(frame) = sources.background.next_frame().await? else {
                break StopReason::NaturalEnd;
            };

            let due = if resample {
                let origin = *source_origin.get_or_insert(frame.pts_secs);
                let source_end = frame.pts_secs - origin + source_frame_secs;
                frames_due(&frame_clock, index, source_end)
            } else {
                1
            };
            if due == 0 {
                continue;
            }

            let overlay_frame = match sources.overlay_video.as_mut() {
                Some(video) => overlay_cursor.advance(video.as_mut(), frame.pts_secs).await?,
                None => None,
            };

            compositor.draw_frame(
                &mut target,
                Some(frame.image.as_ref()),
                Some(transform),
                sources.overlay_image.as_ref(),
                overlay_frame.as_deref(),
                scale,
            );

            for _ in 0..due {
                if frame_budget.is_some_and(|budget| index >= budget) {
                    break 'render StopReason::PreviewComplete;
                }
                let pts = frame_clock.pts_secs(index);
                encoder.push_frame(&target, pts).await?;
                index += 1;

                let percent = progress_percent(pts + frame_clock.frame_secs(), total_secs);
                if percent > reported {
                    reported = percent;
                    store.update_progress(job_id, percent).await?;
                    progress.send_replace(percent);
                }
            }
        };

        if index == 0 {
            return Err(VidlayError::render(format!(
                "{} produced no frames",
                sources.background.name()
            )));
        }

        Ok(LoopStats {
            frames: index,
            reason,
            elapsed_secs: clock.elapsed_secs(),
        })
    }

    fn target_duration(&self, overlay: Option<&MediaInfo>, mode: RenderMode) -> f64 {
        if mode == RenderMode::PreviewSimulation {
            return PREVIEW_DURATION_SECS;
        }
        overlay
            .map(|info| info.duration_secs)
            .filter(|secs| secs.is_finite() && *secs > 0.0)
            .map(|secs| secs.clamp(MIN_OVERLAY_DURATION_SECS, MAX_OVERLAY_DURATION_SECS))
            .unwrap_or(self.settings.default_duration_secs)
    }

    fn output_fps(&self, background: &MediaInfo, options: &RenderOptions) -> u32 {
        match options.mode {
            RenderMode::PreviewSimulation => PREVIEW_FPS,
            RenderMode::Full if options.params.preserve_original_speed => {
                (background.fps.round() as u32).max(1)
            }
            RenderMode::Full => self.settings.fps,
        }
    }

    async fn persist(&self, job_id: &JobId, video: &EncodedVideo) -> VidlayResult<RenderOutput> {
        tokio::fs::create_dir_all(&self.settings.output_dir).await?;
        let path = self
            .settings
            .output_dir
            .join(format!("{job_id}.{}", video.container().extension()));
        let bytes = video.write_to(&path).await?;
        tracing::info!(job_id = %job_id, path = %path.display(), bytes, "Wrote render output");
        Ok(RenderOutput {
            location: path.display().to_string(),
            container: video.container(),
            codec: video.codec().to_string(),
            bytes,
        })
    }
}

/// Tolerance when comparing output and source timestamps.
const PTS_EPSILON: f64 = 1e-6;

fn source_fps(info: &MediaInfo) -> f64 {
    if info.fps.is_finite() && info.fps > 0.0 {
        info.fps
    } else {
        FALLBACK_SOURCE_FPS
    }
}

/// Output frames starting at `index` whose timestamps fall before
/// `until_secs`. Zero means the source frame is dropped.
fn frames_due(clock: &FrameClock, index: u64, until_secs: f64) -> u64 {
    let mut due = 0;
    while clock.pts_secs(index + due) + PTS_EPSILON < until_secs {
        due += 1;
    }
    due
}

async fn record_failure(store: &JobStore, job_id: &JobId, err: &VidlayError) {
    tracing::error!(job_id = %job_id, error = %err, "Render failed");
    if let Err(store_err) = store.fail(job_id, err.to_string()).await {
        tracing::warn!(job_id = %job_id, error = %store_err, "Could not record failure");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::{CodecCandidate, MemoryHost};
    use crate::media::StillSource;
    use async_trait::async_trait;
    use image::Rgba;
    use vidlay_render_model::ScaleFactor;

    const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);
    const GREEN: Rgba<u8> = Rgba([0, 255, 0, 255]);

    /// Endless or finite source that records whether it was stopped.
    struct ScriptedSource {
        image: Arc<RgbaImage>,
        frames: Option<u64>,
        fps: f64,
        next: u64,
        delay: Option<Duration>,
        stop_after: Option<(u64, StopHandle)>,
        stopped: Arc<AtomicBool>,
    }

    impl ScriptedSource {
        fn new(width: u32, height: u32, frames: Option<u64>) -> Self {
            Self {
                image: Arc::new(RgbaImage::from_pixel(width, height, RED)),
                frames,
                fps: 30.0,
                next: 0,
                delay: None,
                stop_after: None,
                stopped: Arc::new(AtomicBool::new(false)),
            }
        }
    }

    #[async_trait]
    impl MediaSource for ScriptedSource {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn load(&mut self) -> VidlayResult<MediaInfo> {
            Ok(MediaInfo {
                width: self.image.width(),
                height: self.image.height(),
                duration_secs: self.frames.map(|f| f as f64 / self.fps).unwrap_or(0.0),
                fps: self.fps,
            })
        }

        async fn play(&mut self) -> VidlayResult<()> {
            Ok(())
        }

        async fn next_frame(&mut self) -> VidlayResult<Option<VideoFrame>> {
            if self.frames.is_some_and(|total| self.next >= total) {
                return Ok(None);
            }
            if let Some((after, handle)) = &self.stop_after {
                if self.next + 1 >= *after {
                    handle.stop();
                }
            }
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let pts_secs = self.next as f64 / self.fps;
            self.next += 1;
            Ok(Some(VideoFrame {
                pts_secs,
                image: Arc::clone(&self.image),
            }))
        }

        async fn stop(&mut self) {
            self.stopped.store(true, Ordering::SeqCst);
        }
    }

    fn settings(dir: &std::path::Path) -> RenderSettings {
        RenderSettings {
            fps: 30,
            safety_ceiling: Duration::from_secs(20),
            default_duration_secs: 5.0,
            output_dir: dir.to_path_buf(),
        }
    }

    fn transform() -> Transform {
        Transform::new(2.0, 2.0, 1.0, 1.0, 0.0, 4.0, 4.0).unwrap()
    }

    fn sources(background: Box<dyn MediaSource>) -> RenderSources {
        RenderSources {
            background,
            overlay_image: Some(RgbaImage::from_pixel(4, 4, GREEN)),
            overlay_video: None,
        }
    }

    async fn run_once(
        driver: &RenderLoop,
        store: &JobStore,
        sources: RenderSources,
        options: RenderOptions,
        stop: &StopHandle,
    ) -> (JobId, JobStatus) {
        let id = store.create(options.params.clone()).await;
        let (tx, _rx) = watch::channel(0u8);
        let status = driver
            .run(store, &id, sources, &transform(), &options, stop, &tx)
            .await;
        (id, status)
    }

    #[tokio::test]
    async fn test_preview_simulation_renders_ninety_frames() {
        let dir = tempfile::tempdir().unwrap();
        let driver = RenderLoop::new(Arc::new(MemoryHost::permissive()), settings(dir.path()));
        let store = JobStore::new();
        let background = StillSource::new("still", RgbaImage::from_pixel(16, 16, RED), 30, 60.0);
        let options = RenderOptions {
            mode: RenderMode::PreviewSimulation,
            ..RenderOptions::default()
        };

        let (id, status) = run_once(
            &driver,
            &store,
            sources(Box::new(background)),
            options,
            &StopHandle::new(),
        )
        .await;
        assert_eq!(status, JobStatus::Completed);

        let job = store.get(&id).await.unwrap();
        assert_eq!(job.progress, 100);
        let output = job.result.unwrap();
        assert_eq!(output.container, Container::Mp4);
        assert_eq!(output.codec, "h264");
        assert_eq!(output.bytes, 90 * (8 + 16 * 16 * 4));
        assert!(std::path::Path::new(&output.location).exists());
    }

    #[tokio::test]
    async fn test_natural_end_stops_loop() {
        let dir = tempfile::tempdir().unwrap();
        let driver = RenderLoop::new(Arc::new(MemoryHost::permissive()), settings(dir.path()));
        let store = JobStore::new();
        let background = ScriptedSource::new(8, 8, Some(12));
        let stopped = Arc::clone(&background.stopped);

        let (id, status) = run_once(
            &driver,
            &store,
            sources(Box::new(background)),
            RenderOptions::default(),
            &StopHandle::new(),
        )
        .await;
        assert_eq!(status, JobStatus::Completed);
        assert_eq!(store.get(&id).await.unwrap().result.unwrap().bytes, 12 * (8 + 8 * 8 * 4));
        assert!(stopped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_encoder_exhaustion_fails_without_result() {
        let dir = tempfile::tempdir().unwrap();
        let driver = RenderLoop::new(Arc::new(MemoryHost::new([])), settings(dir.path()));
        let store = JobStore::new();
        let background = ScriptedSource::new(8, 8, Some(12));
        let stopped = Arc::clone(&background.stopped);

        let (id, status) = run_once(
            &driver,
            &store,
            sources(Box::new(background)),
            RenderOptions::default(),
            &StopHandle::new(),
        )
        .await;
        assert_eq!(status, JobStatus::Failed);

        let job = store.get(&id).await.unwrap();
        assert!(job.result.is_none());
        assert!(job.error.unwrap().contains("Encoder unsupported"));
        assert!(stopped.load(Ordering::SeqCst));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_stop_request_finishes_current_frame() {
        let dir = tempfile::tempdir().unwrap();
        let driver = RenderLoop::new(Arc::new(MemoryHost::permissive()), settings(dir.path()));
        let store = JobStore::new();
        let stop = StopHandle::new();
        let mut background = ScriptedSource::new(8, 8, None);
        background.stop_after = Some((10, stop.clone()));

        let (id, status) = run_once(
            &driver,
            &store,
            sources(Box::new(background)),
            RenderOptions::default(),
            &stop,
        )
        .await;
        assert_eq!(status, JobStatus::Completed);
        let output = store.get(&id).await.unwrap().result.unwrap();
        assert_eq!(output.bytes, 10 * (8 + 8 * 8 * 4));
    }

    #[tokio::test]
    async fn test_safety_ceiling_bounds_endless_source() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = settings(dir.path());
        settings.safety_ceiling = Duration::from_millis(100);
        let driver = RenderLoop::new(Arc::new(MemoryHost::permissive()), settings);
        let store = JobStore::new();
        let mut background = ScriptedSource::new(8, 8, None);
        background.delay = Some(Duration::from_millis(10));

        let (id, status) = run_once(
            &driver,
            &store,
            sources(Box::new(background)),
            RenderOptions::default(),
            &StopHandle::new(),
        )
        .await;
        assert_eq!(status, JobStatus::Completed);
        let frames = store.get(&id).await.unwrap().result.unwrap().bytes / (8 + 8 * 8 * 4);
        assert!(frames >= 1 && frames < 100, "rendered {frames} frames");
    }

    #[tokio::test]
    async fn test_empty_background_fails() {
        let dir = tempfile::tempdir().unwrap();
        let driver = RenderLoop::new(Arc::new(MemoryHost::permissive()), settings(dir.path()));
        let store = JobStore::new();

        let (id, status) = run_once(
            &driver,
            &store,
            sources(Box::new(ScriptedSource::new(8, 8, Some(0)))),
            RenderOptions::default(),
            &StopHandle::new(),
        )
        .await;
        assert_eq!(status, JobStatus::Failed);
        assert!(store.get(&id).await.unwrap().result.is_none());
    }

    #[tokio::test]
    async fn test_transform_is_mapped_into_output_space() {
        let dir = tempfile::tempdir().unwrap();
        let driver = RenderLoop::new(
            Arc::new(MemoryHost::new([CodecCandidate::Vp9Webm])),
            settings(dir.path()),
        );
        let store = JobStore::new();
        let options = RenderOptions {
            source_frame: Some(FrameSize::new(20.0, 20.0)),
            preferred_container: Container::Webm,
            params: JobParams {
                exact_positioning: true,
                ..JobParams::default()
            },
            ..RenderOptions::default()
        };

        let (id, status) = run_once(
            &driver,
            &store,
            sources(Box::new(ScriptedSource::new(40, 40, Some(1)))),
            options,
            &StopHandle::new(),
        )
        .await;
        assert_eq!(status, JobStatus::Completed);

        let output = store.get(&id).await.unwrap().result.unwrap();
        assert_eq!(output.container, Container::Webm);
        assert!(output.location.ends_with(".webm"));

        let bytes = std::fs::read(&output.location).unwrap();
        let (pts, pixels) = MemoryHost::decode_chunk(&bytes).unwrap();
        assert_eq!(pts, 0.0);
        let frame = RgbaImage::from_raw(40, 40, pixels.to_vec()).unwrap();
        // left/top 2 in a 20px space land at 4 in the 40px output; size stays 4x4.
        assert_eq!(*frame.get_pixel(4, 4), GREEN);
        assert_eq!(*frame.get_pixel(7, 7), GREEN);
        assert_eq!(*frame.get_pixel(8, 8), RED);
        assert_eq!(*frame.get_pixel(3, 4), RED);
        assert_eq!(
            resolve_scale(Some(FrameSize::new(20.0, 20.0)), Some(FrameSize::new(40.0, 40.0))),
            ScaleFactor::new(2.0, 2.0)
        );
    }

    const CHUNK_BYTES: u64 = 8 + 8 * 8 * 4;

    async fn render_scripted(fps: f64, frames: u64, options: RenderOptions) -> Vec<f64> {
        let dir = tempfile::tempdir().unwrap();
        let driver = RenderLoop::new(Arc::new(MemoryHost::permissive()), settings(dir.path()));
        let store = JobStore::new();
        let mut background = ScriptedSource::new(8, 8, Some(frames));
        background.fps = fps;

        let (id, status) = run_once(
            &driver,
            &store,
            sources(Box::new(background)),
            options,
            &StopHandle::new(),
        )
        .await;
        assert_eq!(status, JobStatus::Completed);

        let output = store.get(&id).await.unwrap().result.unwrap();
        let bytes = std::fs::read(&output.location).unwrap();
        assert_eq!(bytes.len() as u64, output.bytes);
        bytes
            .chunks(CHUNK_BYTES as usize)
            .map(|chunk| MemoryHost::decode_chunk(chunk).unwrap().0)
            .collect()
    }

    #[tokio::test]
    async fn test_faster_source_is_resampled_to_output_rate() {
        // One second at 60 fps stays one second at 30 fps.
        let pts = render_scripted(60.0, 60, RenderOptions::default()).await;
        assert_eq!(pts.len(), 30);
        assert!((pts[29] - 29.0 / 30.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_slower_source_repeats_frames() {
        let pts = render_scripted(24.0, 24, RenderOptions::default()).await;
        assert_eq!(pts.len(), 30);
        assert!(pts.windows(2).all(|w| w[1] > w[0]));
        assert!((pts[29] - 29.0 / 30.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_preserved_speed_keeps_every_source_frame() {
        let mut options = RenderOptions::default();
        options.params.preserve_original_speed = true;
        let pts = render_scripted(60.0, 60, options).await;
        assert_eq!(pts.len(), 60);
        assert!((pts[59] - 59.0 / 60.0).abs() < 1e-9);
    }

    #[test]
    fn test_frames_due_counts_output_slots() {
        let clock = FrameClock::new(30);
        assert_eq!(frames_due(&clock, 0, 1.0 / 60.0), 1);
        assert_eq!(frames_due(&clock, 1, 2.0 / 60.0), 0);
        assert_eq!(frames_due(&clock, 0, 1.0 / 24.0), 2);
        assert_eq!(frames_due(&clock, 0, 1.0), 30);
    }

    #[tokio::test]
    async fn test_overlay_duration_is_clamped() {
        let driver = RenderLoop::new(Arc::new(MemoryHost::permissive()), RenderSettings::default());
        let info = |secs: f64| MediaInfo {
            width: 10,
            height: 10,
            duration_secs: secs,
            fps: 30.0,
        };
        assert_eq!(driver.target_duration(Some(&info(1.0)), RenderMode::Full), 3.0);
        assert_eq!(driver.target_duration(Some(&info(12.0)), RenderMode::Full), 12.0);
        assert_eq!(driver.target_duration(Some(&info(90.0)), RenderMode::Full), 30.0);
        assert_eq!(driver.target_duration(None, RenderMode::Full), 5.0);
        assert_eq!(
            driver.target_duration(Some(&info(90.0)), RenderMode::PreviewSimulation),
            3.0
        );
    }

    #[tokio::test]
    async fn test_preserve_original_speed_uses_background_rate() {
        let driver = RenderLoop::new(Arc::new(MemoryHost::permissive()), RenderSettings::default());
        let background = MediaInfo {
            width: 10,
            height: 10,
            duration_secs: 1.0,
            fps: 59.94,
        };
        let mut options = RenderOptions::default();
        assert_eq!(driver.output_fps(&background, &options), 30);
        options.params.preserve_original_speed = true;
        assert_eq!(driver.output_fps(&background, &options), 60);
    }

    #[tokio::test]
    async fn test_spawned_job_reports_progress() {
        let dir = tempfile::tempdir().unwrap();
        let driver = RenderLoop::new(Arc::new(MemoryHost::permissive()), settings(dir.path()));
        let store = Arc::new(JobStore::new());
        let id = store.create(JobParams::default()).await;

        let handle = driver.spawn(
            Arc::clone(&store),
            id.clone(),
            sources(Box::new(ScriptedSource::new(8, 8, Some(30)))),
            transform(),
            RenderOptions::default(),
        );
        let progress = handle.progress();
        assert_eq!(handle.wait().await.unwrap(), JobStatus::Completed);
        assert_eq!(*progress.borrow(), 100);
        assert_eq!(store.report(&id).await.unwrap().progress, 100);
    }
}
