//! Media sources feeding the render loop.
//!
//! A source is loaded once (metadata), then pulled frame by frame in
//! presentation order until it reports its natural end.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use image::RgbaImage;
use serde::Deserialize;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout, Command};

use vidlay_common::{FrameClock, VidlayError, VidlayResult};
use vidlay_render_model::{FrameSize, MediaRef};

/// Rate assumed when a video stream does not report one.
pub const FALLBACK_SOURCE_FPS: f64 = 30.0;

/// Metadata available once a source has loaded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MediaInfo {
    pub width: u32,
    pub height: u32,
    /// Natural duration in seconds. Zero when unknown.
    pub duration_secs: f64,
    pub fps: f64,
}

impl MediaInfo {
    pub fn frame_size(&self) -> FrameSize {
        FrameSize::from_pixels(self.width, self.height)
    }
}

/// One decoded frame with its presentation timestamp.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub pts_secs: f64,
    pub image: Arc<RgbaImage>,
}

/// A playable source of RGBA frames.
#[async_trait]
pub trait MediaSource: Send {
    /// Human-readable name for logs.
    fn name(&self) -> &str;

    /// Wait for metadata. Must succeed before frames are pulled.
    async fn load(&mut self) -> VidlayResult<MediaInfo>;

    /// Start playback. Calling it again is a no-op.
    async fn play(&mut self) -> VidlayResult<()>;

    /// Next frame, or `None` once the source has ended.
    async fn next_frame(&mut self) -> VidlayResult<Option<VideoFrame>>;

    /// Halt playback and release any decoder process.
    async fn stop(&mut self);
}

/// A still image presented as a constant video of fixed length.
pub struct StillSource {
    name: String,
    image: Arc<RgbaImage>,
    clock: FrameClock,
    duration_secs: f64,
    next_index: u64,
    playing: bool,
}

impl StillSource {
    pub fn new(name: impl Into<String>, image: RgbaImage, fps: u32, duration_secs: f64) -> Self {
        Self {
            name: name.into(),
            image: Arc::new(image),
            clock: FrameClock::new(fps),
            duration_secs: duration_secs.max(0.0),
            next_index: 0,
            playing: false,
        }
    }

    fn info(&self) -> MediaInfo {
        MediaInfo {
            width: self.image.width(),
            height: self.image.height(),
            duration_secs: self.duration_secs,
            fps: self.clock.fps() as f64,
        }
    }
}

#[async_trait]
impl MediaSource for StillSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn load(&mut self) -> VidlayResult<MediaInfo> {
        if self.image.width() == 0 || self.image.height() == 0 {
            return Err(VidlayError::source_load(format!(
                "{} has no pixels",
                self.name
            )));
        }
        Ok(self.info())
    }

    async fn play(&mut self) -> VidlayResult<()> {
        self.playing = true;
        Ok(())
    }

    async fn next_frame(&mut self) -> VidlayResult<Option<VideoFrame>> {
        if !self.playing {
            return Err(VidlayError::render(format!(
                "{} pulled before playback started",
                self.name
            )));
        }
        if self.next_index >= self.clock.frames_in(self.duration_secs) {
            return Ok(None);
        }
        let pts_secs = self.clock.pts_secs(self.next_index);
        self.next_index += 1;
        Ok(Some(VideoFrame {
            pts_secs,
            image: Arc::clone(&self.image),
        }))
    }

    async fn stop(&mut self) {
        self.playing = false;
    }
}

/// Video file decoded by an `ffmpeg` child process into raw RGBA frames.
pub struct FfmpegVideoSource {
    name: String,
    path: PathBuf,
    info: Option<MediaInfo>,
    child: Option<Child>,
    stdout: Option<ChildStdout>,
    next_index: u64,
}

impl FfmpegVideoSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            name: path.display().to_string(),
            path,
            info: None,
            child: None,
            stdout: None,
            next_index: 0,
        }
    }
}

#[async_trait]
impl MediaSource for FfmpegVideoSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn load(&mut self) -> VidlayResult<MediaInfo> {
        if let Some(info) = self.info {
            return Ok(info);
        }
        let info = probe_media(&self.path).await?;
        tracing::debug!(
            source = %self.name,
            width = info.width,
            height = info.height,
            duration_secs = info.duration_secs,
            fps = info.fps,
            "Probed media source"
        );
        self.info = Some(info);
        Ok(info)
    }

    async fn play(&mut self) -> VidlayResult<()> {
        if self.child.is_some() {
            return Ok(());
        }
        if self.info.is_none() {
            self.load().await?;
        }

        let mut child = Command::new("ffmpeg")
            .args(["-hide_banner", "-loglevel", "error", "-nostdin", "-i"])
            .arg(&self.path)
            .args(["-an", "-f", "rawvideo", "-pix_fmt", "rgba", "pipe:1"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                VidlayError::source_load(format!("Failed to start decoder for {}: {e}", self.name))
            })?;

        self.stdout = child.stdout.take();
        if self.stdout.is_none() {
            return Err(VidlayError::source_load("Failed to capture decoder stdout"));
        }
        self.child = Some(child);
        Ok(())
    }

    async fn next_frame(&mut self) -> VidlayResult<Option<VideoFrame>> {
        let (Some(info), Some(stdout)) = (self.info, self.stdout.as_mut()) else {
            return Err(VidlayError::render(format!(
                "{} pulled before playback started",
                self.name
            )));
        };

        let mut buf = vec![0u8; info.width as usize * info.height as usize * 4];
        match stdout.read_exact(&mut buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => {
                return Err(VidlayError::render(format!(
                    "Failed reading frame from {}: {e}",
                    self.name
                )))
            }
        }

        let image = RgbaImage::from_raw(info.width, info.height, buf)
            .ok_or_else(|| VidlayError::render("Decoded frame has the wrong size"))?;
        let pts_secs = self.next_index as f64 / info.fps;
        self.next_index += 1;
        Ok(Some(VideoFrame {
            pts_secs,
            image: Arc::new(image),
        }))
    }

    async fn stop(&mut self) {
        self.stdout = None;
        if let Some(mut child) = self.child.take() {
            if let Err(err) = child.start_kill() {
                tracing::debug!(source = %self.name, error = %err, "Decoder already exited");
            }
            match child.wait().await {
                Ok(status) => tracing::debug!(source = %self.name, %status, "Decoder exited"),
                Err(err) => {
                    tracing::debug!(source = %self.name, error = %err, "Decoder wait failed")
                }
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
    avg_frame_rate: Option<String>,
    r_frame_rate: Option<String>,
    duration: Option<String>,
    #[serde(default)]
    tags: ProbeTags,
    #[serde(default)]
    side_data_list: Vec<ProbeSideData>,
}

#[derive(Debug, Default, Deserialize)]
struct ProbeTags {
    rotate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeSideData {
    rotation: Option<f64>,
}

impl ProbeStream {
    /// Display rotation in degrees. Newer ffprobe reports it as display
    /// matrix side data, older builds as a `rotate` tag.
    fn rotation(&self) -> f64 {
        self.side_data_list
            .iter()
            .find_map(|side| side.rotation)
            .or_else(|| {
                self.tags
                    .rotate
                    .as_deref()
                    .and_then(|r| r.trim().parse::<f64>().ok())
            })
            .filter(|r| r.is_finite())
            .unwrap_or(0.0)
    }
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

async fn probe_media(path: &Path) -> VidlayResult<MediaInfo> {
    if !path.exists() {
        return Err(VidlayError::source_load(format!(
            "{} does not exist",
            path.display()
        )));
    }

    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=width,height,avg_frame_rate,r_frame_rate,duration\
                :stream_tags=rotate:stream_side_data=rotation:format=duration",
            "-of",
            "json",
        ])
        .arg(path)
        .output()
        .await
        .map_err(|e| VidlayError::source_load(format!("Failed to run ffprobe: {e}")))?;

    if !output.status.success() {
        return Err(VidlayError::source_load(format!(
            "ffprobe could not read {}: {}",
            path.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    parse_probe_output(&output.stdout)
        .map_err(|e| VidlayError::source_load(format!("{}: {e}", path.display())))
}

fn parse_probe_output(raw: &[u8]) -> Result<MediaInfo, String> {
    let probe: ProbeOutput =
        serde_json::from_slice(raw).map_err(|e| format!("unreadable probe output: {e}"))?;
    let stream = probe
        .streams
        .first()
        .ok_or_else(|| "no video stream".to_string())?;

    let (coded_width, coded_height) = match (stream.width, stream.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
        _ => return Err("video stream has no dimensions".to_string()),
    };
    // The decoder autorotates, so quarter turns swap the frame dimensions.
    let quarter_turns = (stream.rotation() / 90.0).round() as i64;
    let (width, height) = if quarter_turns.rem_euclid(2) == 1 {
        (coded_height, coded_width)
    } else {
        (coded_width, coded_height)
    };

    let fps = stream
        .avg_frame_rate
        .as_deref()
        .and_then(parse_rate)
        .or_else(|| stream.r_frame_rate.as_deref().and_then(parse_rate))
        .unwrap_or(FALLBACK_SOURCE_FPS);

    let duration_secs = stream
        .duration
        .as_deref()
        .or(probe.format.as_ref().and_then(|f| f.duration.as_deref()))
        .and_then(|d| d.trim().parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d > 0.0)
        .unwrap_or(0.0);

    Ok(MediaInfo {
        width,
        height,
        duration_secs,
        fps,
    })
}

/// Parse an ffprobe rational like `30000/1001`.
fn parse_rate(raw: &str) -> Option<f64> {
    let (num, den) = raw.split_once('/').unwrap_or((raw, "1"));
    let num = num.trim().parse::<f64>().ok()?;
    let den = den.trim().parse::<f64>().ok()?;
    if den == 0.0 {
        return None;
    }
    let rate = num / den;
    (rate.is_finite() && rate > 0.0).then_some(rate)
}

/// Decode an image file into RGBA pixels off the async runtime.
pub async fn load_image(reference: &MediaRef) -> VidlayResult<RgbaImage> {
    let path = reference.as_path().to_path_buf();
    tokio::task::spawn_blocking(move || {
        image::open(&path)
            .map(|img| img.to_rgba8())
            .map_err(|e| VidlayError::source_load(format!("{}: {e}", path.display())))
    })
    .await
    .map_err(|e| VidlayError::render(format!("Image decode task failed: {e}")))?
}

/// Open a background or overlay video reference.
///
/// Still images become a [`StillSource`] lasting `still_duration_secs`.
pub async fn open_media(
    reference: &MediaRef,
    fps: u32,
    still_duration_secs: f64,
) -> VidlayResult<Box<dyn MediaSource>> {
    if reference.is_still_image() {
        let image = load_image(reference).await?;
        return Ok(Box::new(StillSource::new(
            reference.as_str(),
            image,
            fps,
            still_duration_secs,
        )));
    }
    Ok(Box::new(FfmpegVideoSource::new(reference.as_path())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn test_parse_rate() {
        assert_eq!(parse_rate("30/1"), Some(30.0));
        assert!((parse_rate("30000/1001").unwrap() - 29.97).abs() < 0.01);
        assert_eq!(parse_rate("0/0"), None);
        assert_eq!(parse_rate("25"), Some(25.0));
    }

    #[test]
    fn test_parse_probe_output() {
        let raw = br#"{
            "streams": [{"width": 1920, "height": 1080, "avg_frame_rate": "0/0", "r_frame_rate": "60/1"}],
            "format": {"duration": "12.5"}
        }"#;
        let info = parse_probe_output(raw).unwrap();
        assert_eq!((info.width, info.height), (1920, 1080));
        assert_eq!(info.fps, 60.0);
        assert_eq!(info.duration_secs, 12.5);
    }

    #[test]
    fn test_parse_probe_output_swaps_rotated_portrait_stream() {
        let raw = br#"{
            "streams": [{
                "width": 1920, "height": 1080, "avg_frame_rate": "30/1",
                "side_data_list": [{"side_data_type": "Display Matrix", "rotation": -90}]
            }],
            "format": {"duration": "4.0"}
        }"#;
        let info = parse_probe_output(raw).unwrap();
        assert_eq!((info.width, info.height), (1080, 1920));

        let legacy = br#"{
            "streams": [{"width": 1920, "height": 1080, "tags": {"rotate": "270"}}]
        }"#;
        let info = parse_probe_output(legacy).unwrap();
        assert_eq!((info.width, info.height), (1080, 1920));

        let upside_down = br#"{
            "streams": [{"width": 1920, "height": 1080, "tags": {"rotate": "180"}}]
        }"#;
        let info = parse_probe_output(upside_down).unwrap();
        assert_eq!((info.width, info.height), (1920, 1080));
    }

    #[test]
    fn test_parse_probe_output_without_stream() {
        assert!(parse_probe_output(br#"{"streams": []}"#).is_err());
        assert!(parse_probe_output(b"not json").is_err());
    }

    #[tokio::test]
    async fn test_still_source_yields_fixed_frame_count() {
        let image = RgbaImage::from_pixel(4, 4, Rgba([1, 2, 3, 255]));
        let mut source = StillSource::new("still", image, 10, 0.5);
        let info = source.load().await.unwrap();
        assert_eq!((info.width, info.height), (4, 4));

        assert!(source.next_frame().await.is_err());
        source.play().await.unwrap();

        let mut pts = Vec::new();
        while let Some(frame) = source.next_frame().await.unwrap() {
            pts.push(frame.pts_secs);
        }
        assert_eq!(pts.len(), 5);
        assert!(pts.windows(2).all(|w| w[1] > w[0]));
    }

    #[tokio::test]
    async fn test_missing_video_is_source_load_failure() {
        let mut source = FfmpegVideoSource::new("/nonexistent/vidlay/background.mp4");
        let err = source.load().await.unwrap_err();
        assert!(matches!(err, VidlayError::SourceLoad { .. }));
    }

    #[tokio::test]
    async fn test_open_media_decodes_still_background() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backdrop.png");
        RgbaImage::from_pixel(8, 6, Rgba([0, 0, 255, 255]))
            .save(&path)
            .unwrap();

        let reference = MediaRef::new(path.to_string_lossy().into_owned());
        let mut source = open_media(&reference, 30, 1.0).await.unwrap();
        let info = source.load().await.unwrap();
        assert_eq!((info.width, info.height), (8, 6));
        assert_eq!(info.duration_secs, 1.0);
    }

    #[tokio::test]
    async fn test_load_image_failure_is_source_load() {
        let err = load_image(&MediaRef::new("/nonexistent/overlay.png"))
            .await
            .unwrap_err();
        assert!(matches!(err, VidlayError::SourceLoad { .. }));
    }
}
