//! Encoder adapter: codec negotiation and frame accumulation.
//!
//! Hosts advertise which codec/container pairs they can produce. The adapter
//! walks a fixed preference order, opens the first supported pair, and
//! collects encoded chunks until the handle is closed.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use image::RgbaImage;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use vidlay_common::{VidlayError, VidlayResult};
use vidlay_render_model::{Container, Quality};

/// Target video bitrate for every candidate.
pub const TARGET_BITRATE_BPS: u32 = 5_000_000;

/// One codec/container pair the adapter may try.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodecCandidate {
    Vp9Webm,
    Vp8Webm,
    WebmDefault,
    H264Mp4,
    Mp4Default,
    /// Whatever the host produces with no codec hint.
    PlatformDefault,
}

/// WebM-first negotiation order.
pub const WEBM_FIRST: [CodecCandidate; 6] = [
    CodecCandidate::Vp9Webm,
    CodecCandidate::Vp8Webm,
    CodecCandidate::WebmDefault,
    CodecCandidate::H264Mp4,
    CodecCandidate::Mp4Default,
    CodecCandidate::PlatformDefault,
];

/// MP4-first negotiation order, used when MP4 is requested.
pub const MP4_FIRST: [CodecCandidate; 6] = [
    CodecCandidate::H264Mp4,
    CodecCandidate::Mp4Default,
    CodecCandidate::Vp9Webm,
    CodecCandidate::Vp8Webm,
    CodecCandidate::WebmDefault,
    CodecCandidate::PlatformDefault,
];

impl CodecCandidate {
    pub fn container(&self) -> Container {
        match self {
            Self::Vp9Webm | Self::Vp8Webm | Self::WebmDefault => Container::Webm,
            Self::H264Mp4 | Self::Mp4Default | Self::PlatformDefault => Container::Mp4,
        }
    }

    /// Codec label recorded on the result.
    pub fn codec_label(&self) -> &'static str {
        match self {
            Self::Vp9Webm => "vp9",
            Self::Vp8Webm => "vp8",
            Self::WebmDefault => "webm",
            Self::H264Mp4 => "h264",
            Self::Mp4Default => "mp4",
            Self::PlatformDefault => "default",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Vp9Webm => "video/webm;codecs=vp9",
            Self::Vp8Webm => "video/webm;codecs=vp8",
            Self::WebmDefault => "video/webm",
            Self::H264Mp4 => "video/mp4;codecs=h264",
            Self::Mp4Default | Self::PlatformDefault => "video/mp4",
        }
    }
}

impl fmt::Display for CodecCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mime_type())
    }
}

/// Candidate order for a preferred container.
pub fn candidates_for(preferred: Container) -> &'static [CodecCandidate] {
    match preferred {
        Container::Mp4 => &MP4_FIRST,
        Container::Webm => &WEBM_FIRST,
    }
}

/// Frame geometry and rate for one encode.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodeSpec {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub bitrate_bps: u32,
    pub quality: Quality,
}

impl EncodeSpec {
    pub fn new(width: u32, height: u32, fps: u32, quality: Quality) -> Self {
        Self {
            width,
            height,
            fps: fps.max(1),
            bitrate_bps: TARGET_BITRATE_BPS,
            quality,
        }
    }
}

/// A running encode session on a host.
#[async_trait]
pub trait FrameSink: Send {
    async fn write_frame(&mut self, frame: &RgbaImage, pts_secs: f64) -> VidlayResult<()>;

    /// Flush and return every encoded chunk in order.
    async fn finish(&mut self) -> VidlayResult<Vec<Vec<u8>>>;
}

/// Something that can encode RGBA frames into a container.
#[async_trait]
pub trait EncoderHost: Send + Sync {
    fn name(&self) -> &str;

    fn supports(&self, candidate: CodecCandidate) -> bool;

    async fn start(
        &self,
        candidate: CodecCandidate,
        spec: &EncodeSpec,
    ) -> VidlayResult<Box<dyn FrameSink>>;
}

/// First candidate in preference order that `host` supports.
pub fn negotiate(host: &dyn EncoderHost, preferred: Container) -> Option<CodecCandidate> {
    candidates_for(preferred)
        .iter()
        .copied()
        .find(|candidate| host.supports(*candidate))
}

/// Finished encode output.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedVideo {
    pub candidate: CodecCandidate,
    pub frames: u64,
    pub chunks: Vec<Vec<u8>>,
}

impl EncodedVideo {
    pub fn container(&self) -> Container {
        self.candidate.container()
    }

    pub fn codec(&self) -> &'static str {
        self.candidate.codec_label()
    }

    /// Total encoded size in bytes.
    pub fn len(&self) -> u64 {
        self.chunks.iter().map(|c| c.len() as u64).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write all chunks to `path`, returning the byte count.
    pub async fn write_to(&self, path: &std::path::Path) -> VidlayResult<u64> {
        let mut file = tokio::fs::File::create(path).await?;
        for chunk in &self.chunks {
            file.write_all(chunk).await?;
        }
        file.flush().await?;
        Ok(self.len())
    }
}

/// Negotiates a candidate with a host and opens the session.
pub struct EncoderAdapter;

impl EncoderAdapter {
    /// Open an encode session with the best candidate `host` supports.
    pub async fn open(
        host: &dyn EncoderHost,
        spec: &EncodeSpec,
        preferred: Container,
    ) -> VidlayResult<EncoderHandle> {
        let candidate = negotiate(host, preferred).ok_or_else(|| {
            VidlayError::encoder_unsupported(format!(
                "{} supports none of the {preferred} candidates",
                host.name()
            ))
        })?;

        tracing::info!(
            host = host.name(),
            candidate = %candidate,
            width = spec.width,
            height = spec.height,
            fps = spec.fps,
            bitrate_bps = spec.bitrate_bps,
            "Opening encoder"
        );

        let sink = host.start(candidate, spec).await?;
        Ok(EncoderHandle {
            candidate,
            sink: Some(sink),
            frames: 0,
            last_pts: None,
            closed: None,
        })
    }
}

/// Live encode session. Frames must arrive in strictly increasing time order.
pub struct EncoderHandle {
    candidate: CodecCandidate,
    sink: Option<Box<dyn FrameSink>>,
    frames: u64,
    last_pts: Option<f64>,
    closed: Option<Result<EncodedVideo, String>>,
}

impl EncoderHandle {
    pub fn candidate(&self) -> CodecCandidate {
        self.candidate
    }

    pub fn frames_written(&self) -> u64 {
        self.frames
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_some()
    }

    pub async fn push_frame(&mut self, frame: &RgbaImage, pts_secs: f64) -> VidlayResult<()> {
        if self.closed.is_some() {
            return Err(VidlayError::encode("Frame pushed after encoder closed"));
        }
        if !pts_secs.is_finite() || self.last_pts.is_some_and(|last| pts_secs <= last) {
            return Err(VidlayError::encode(format!(
                "Frame timestamp {pts_secs} is not after {:?}",
                self.last_pts
            )));
        }
        let sink = self
            .sink
            .as_mut()
            .ok_or_else(|| VidlayError::encode("Encoder session is gone"))?;
        sink.write_frame(frame, pts_secs).await?;
        self.last_pts = Some(pts_secs);
        self.frames += 1;
        Ok(())
    }

    /// Finalize the session. Later calls return the same outcome.
    pub async fn close(&mut self) -> VidlayResult<EncodedVideo> {
        if let Some(outcome) = &self.closed {
            return outcome.clone().map_err(VidlayError::encode);
        }

        let outcome = match self.sink.take() {
            Some(mut sink) => sink
                .finish()
                .await
                .map(|chunks| EncodedVideo {
                    candidate: self.candidate,
                    frames: self.frames,
                    chunks,
                })
                .map_err(|e| e.to_string()),
            None => Err("Encoder session is gone".to_string()),
        };

        match &outcome {
            Ok(video) => tracing::debug!(
                candidate = %self.candidate,
                frames = video.frames,
                bytes = video.len(),
                "Encoder closed"
            ),
            Err(err) => tracing::warn!(candidate = %self.candidate, error = %err, "Encoder failed to finalize"),
        }

        self.closed = Some(outcome.clone());
        outcome.map_err(VidlayError::encode)
    }
}

/// In-process host that keeps raw frames as chunks.
///
/// Each chunk is the frame's pts as little-endian `f64` followed by its RGBA bytes.
#[derive(Debug, Clone)]
pub struct MemoryHost {
    supported: HashSet<CodecCandidate>,
    sessions: Arc<Mutex<u32>>,
}

impl MemoryHost {
    pub fn new(supported: impl IntoIterator<Item = CodecCandidate>) -> Self {
        Self {
            supported: supported.into_iter().collect(),
            sessions: Arc::new(Mutex::new(0)),
        }
    }

    /// Supports every candidate.
    pub fn permissive() -> Self {
        Self::new(WEBM_FIRST)
    }

    /// Number of sessions started so far.
    pub async fn sessions_started(&self) -> u32 {
        *self.sessions.lock().await
    }

    /// Split a chunk produced by this host into `(pts_secs, rgba)`.
    pub fn decode_chunk(chunk: &[u8]) -> Option<(f64, &[u8])> {
        if chunk.len() < 8 {
            return None;
        }
        let (head, pixels) = chunk.split_at(8);
        let pts = f64::from_le_bytes(head.try_into().ok()?);
        Some((pts, pixels))
    }
}

#[async_trait]
impl EncoderHost for MemoryHost {
    fn name(&self) -> &str {
        "memory"
    }

    fn supports(&self, candidate: CodecCandidate) -> bool {
        self.supported.contains(&candidate)
    }

    async fn start(
        &self,
        candidate: CodecCandidate,
        spec: &EncodeSpec,
    ) -> VidlayResult<Box<dyn FrameSink>> {
        if !self.supports(candidate) {
            return Err(VidlayError::encoder_unsupported(candidate.mime_type()));
        }
        *self.sessions.lock().await += 1;
        Ok(Box::new(MemorySink {
            width: spec.width,
            height: spec.height,
            chunks: Vec::new(),
        }))
    }
}

struct MemorySink {
    width: u32,
    height: u32,
    chunks: Vec<Vec<u8>>,
}

#[async_trait]
impl FrameSink for MemorySink {
    async fn write_frame(&mut self, frame: &RgbaImage, pts_secs: f64) -> VidlayResult<()> {
        if frame.dimensions() != (self.width, self.height) {
            return Err(VidlayError::encode(format!(
                "Frame is {:?}, session expects {}x{}",
                frame.dimensions(),
                self.width,
                self.height
            )));
        }
        let mut chunk = Vec::with_capacity(8 + frame.as_raw().len());
        chunk.extend_from_slice(&pts_secs.to_le_bytes());
        chunk.extend_from_slice(frame.as_raw());
        self.chunks.push(chunk);
        Ok(())
    }

    async fn finish(&mut self) -> VidlayResult<Vec<Vec<u8>>> {
        Ok(std::mem::take(&mut self.chunks))
    }
}
