//! ffmpeg-backed encoder host.
//!
//! Capabilities come from `ffmpeg -encoders` / `ffmpeg -muxers`. Each session
//! pipes raw RGBA frames into ffmpeg's stdin and collects the container bytes
//! from stdout as chunks.

use std::collections::HashSet;
use std::process::{Command as StdCommand, Stdio};

use async_trait::async_trait;
use image::RgbaImage;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::task::JoinHandle;

use vidlay_common::{VidlayError, VidlayResult};
use vidlay_render_model::Quality;

use crate::encoder::{CodecCandidate, EncodeSpec, EncoderHost, FrameSink};

const READ_CHUNK_BYTES: usize = 64 * 1024;

const WEBM_ENCODERS: [&str; 4] = ["libvpx-vp9", "libvpx", "libaom-av1", "libsvtav1"];
const MP4_ENCODERS: [&str; 4] = ["libx264", "libopenh264", "libx265", "mpeg4"];

/// Encoder host backed by the `ffmpeg` binary on `PATH`.
#[derive(Debug, Clone)]
pub struct FfmpegHost {
    encoders: HashSet<String>,
    muxers: HashSet<String>,
}

impl FfmpegHost {
    /// Probe the installed ffmpeg. Returns `None` when it is missing.
    pub fn detect() -> Option<Self> {
        if !command_exists("ffmpeg") {
            tracing::warn!("ffmpeg not found on PATH");
            return None;
        }
        let encoders = run_listing("-encoders")?;
        let muxers = run_listing("-muxers")?;
        let host = Self::from_listings(&encoders, &muxers);
        tracing::debug!(
            encoders = host.encoders.len(),
            muxers = host.muxers.len(),
            "Detected ffmpeg capabilities"
        );
        Some(host)
    }

    /// Build from the text of `ffmpeg -encoders` and `ffmpeg -muxers`.
    pub fn from_listings(encoders: &str, muxers: &str) -> Self {
        Self {
            encoders: parse_listing(encoders),
            muxers: parse_listing(muxers),
        }
    }

    pub fn has_encoder(&self, name: &str) -> bool {
        self.encoders.contains(name)
    }

    pub fn has_muxer(&self, name: &str) -> bool {
        self.muxers.contains(name)
    }

    /// Explicit `-c:v` for a candidate; `None` lets ffmpeg pick the muxer default.
    fn encoder_for(candidate: CodecCandidate) -> Option<&'static str> {
        match candidate {
            CodecCandidate::Vp9Webm => Some("libvpx-vp9"),
            CodecCandidate::Vp8Webm => Some("libvpx"),
            CodecCandidate::H264Mp4 => Some("libx264"),
            CodecCandidate::PlatformDefault => Some("mpeg4"),
            CodecCandidate::WebmDefault | CodecCandidate::Mp4Default => None,
        }
    }

    fn muxer_for(candidate: CodecCandidate) -> &'static str {
        match candidate.container() {
            vidlay_render_model::Container::Webm => "webm",
            vidlay_render_model::Container::Mp4 => "mp4",
        }
    }

    fn build_args(candidate: CodecCandidate, spec: &EncodeSpec) -> Vec<String> {
        let mut args: Vec<String> = [
            "-hide_banner",
            "-loglevel",
            "error",
            "-f",
            "rawvideo",
            "-pix_fmt",
            "rgba",
            "-s",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        args.push(format!("{}x{}", spec.width, spec.height));
        args.push("-framerate".to_string());
        args.push(spec.fps.to_string());
        args.extend(["-i".to_string(), "pipe:0".to_string()]);

        let encoder = Self::encoder_for(candidate);
        if let Some(encoder) = encoder {
            args.extend(["-c:v".to_string(), encoder.to_string()]);
        }
        args.extend(quality_args(encoder, spec.quality));

        let bitrate = format!("{}", spec.bitrate_bps);
        args.extend([
            "-b:v".to_string(),
            bitrate.clone(),
            "-maxrate".to_string(),
            bitrate,
            "-bufsize".to_string(),
            format!("{}", spec.bitrate_bps.saturating_mul(2)),
            "-vf".to_string(),
            "pad=ceil(iw/2)*2:ceil(ih/2)*2".to_string(),
            "-pix_fmt".to_string(),
            "yuv420p".to_string(),
        ]);

        let muxer = Self::muxer_for(candidate);
        if muxer == "mp4" {
            // stdout is not seekable; fragment so the moov atom comes first.
            args.extend([
                "-movflags".to_string(),
                "frag_keyframe+empty_moov+default_base_moof".to_string(),
            ]);
        }
        args.extend(["-f".to_string(), muxer.to_string(), "pipe:1".to_string()]);
        args
    }
}

fn quality_args(encoder: Option<&str>, quality: Quality) -> Vec<String> {
    let pair = |k: &str, v: &str| vec![k.to_string(), v.to_string()];
    match encoder {
        Some("libx264") => pair(
            "-preset",
            match quality {
                Quality::Low => "veryfast",
                Quality::Standard => "medium",
                Quality::High => "slow",
            },
        ),
        Some("libvpx-vp9") | Some("libvpx") => pair(
            "-deadline",
            match quality {
                Quality::Low => "realtime",
                Quality::Standard => "good",
                Quality::High => "best",
            },
        ),
        _ => Vec::new(),
    }
}

#[async_trait]
impl EncoderHost for FfmpegHost {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    fn supports(&self, candidate: CodecCandidate) -> bool {
        let muxer = Self::muxer_for(candidate);
        if !self.has_muxer(muxer) {
            return false;
        }
        match Self::encoder_for(candidate) {
            Some(encoder) => self.has_encoder(encoder),
            None => {
                let pool: &[&str] = if muxer == "webm" {
                    &WEBM_ENCODERS
                } else {
                    &MP4_ENCODERS
                };
                pool.iter().any(|e| self.has_encoder(e))
            }
        }
    }

    async fn start(
        &self,
        candidate: CodecCandidate,
        spec: &EncodeSpec,
    ) -> VidlayResult<Box<dyn FrameSink>> {
        let args = Self::build_args(candidate, spec);
        tracing::debug!(args = ?args, "Running ffmpeg");

        let mut child = Command::new("ffmpeg")
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| VidlayError::encode(format!("Failed to start ffmpeg: {e}")))?;

        tracing::info!(pid = child.id(), candidate = %candidate, "ffmpeg encoder started");

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| VidlayError::encode("Failed to capture ffmpeg stdin"))?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| VidlayError::encode("Failed to capture ffmpeg stdout"))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| VidlayError::encode("Failed to capture ffmpeg stderr"))?;

        let reader = tokio::spawn(async move {
            let mut chunks = Vec::new();
            let mut buf = vec![0u8; READ_CHUNK_BYTES];
            loop {
                let n = stdout.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                chunks.push(buf[..n].to_vec());
            }
            Ok::<_, std::io::Error>(chunks)
        });

        // Drain stderr concurrently so ffmpeg never blocks on a full pipe.
        let stderr_task = tokio::spawn(async move {
            let mut output = String::new();
            match stderr.read_to_string(&mut output).await {
                Ok(_) => output,
                Err(err) => format!("<failed to read ffmpeg stderr: {err}>"),
            }
        });

        Ok(Box::new(FfmpegSink {
            frame_bytes: spec.width as usize * spec.height as usize * 4,
            child: Some(child),
            stdin: Some(stdin),
            reader: Some(reader),
            stderr_task: Some(stderr_task),
        }))
    }
}

struct FfmpegSink {
    frame_bytes: usize,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    reader: Option<JoinHandle<std::io::Result<Vec<Vec<u8>>>>>,
    stderr_task: Option<JoinHandle<String>>,
}

impl FfmpegSink {
    async fn stderr_output(&mut self) -> String {
        match self.stderr_task.take() {
            Some(task) => task
                .await
                .unwrap_or_else(|_| "<failed to join stderr reader>".to_string()),
            None => String::new(),
        }
    }
}

#[async_trait]
impl FrameSink for FfmpegSink {
    async fn write_frame(&mut self, frame: &RgbaImage, _pts_secs: f64) -> VidlayResult<()> {
        if frame.as_raw().len() != self.frame_bytes {
            return Err(VidlayError::encode(format!(
                "Frame has {} bytes, expected {}",
                frame.as_raw().len(),
                self.frame_bytes
            )));
        }
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| VidlayError::encode("ffmpeg stdin already closed"))?;
        if let Err(err) = stdin.write_all(frame.as_raw()).await {
            self.stdin = None;
            let stderr = self.stderr_output().await;
            return Err(VidlayError::encode(format!(
                "ffmpeg rejected frame: {err}: {}",
                stderr.trim()
            )));
        }
        Ok(())
    }

    async fn finish(&mut self) -> VidlayResult<Vec<Vec<u8>>> {
        if let Some(mut stdin) = self.stdin.take() {
            if let Err(err) = stdin.shutdown().await {
                tracing::debug!(error = %err, "ffmpeg stdin already closed");
            }
        }

        let mut child = self
            .child
            .take()
            .ok_or_else(|| VidlayError::encode("ffmpeg session already finished"))?;
        let status = child
            .wait()
            .await
            .map_err(|e| VidlayError::encode(format!("Failed to wait on ffmpeg: {e}")))?;

        let chunks = match self.reader.take() {
            Some(reader) => reader
                .await
                .map_err(|e| VidlayError::encode(format!("ffmpeg reader task failed: {e}")))?
                .map_err(|e| VidlayError::encode(format!("Failed reading ffmpeg output: {e}")))?,
            None => Vec::new(),
        };
        let stderr = self.stderr_output().await;

        if !status.success() {
            return Err(VidlayError::encode(format!(
                "ffmpeg encode failed (status {status}): {}",
                stderr.trim()
            )));
        }
        Ok(chunks)
    }
}

/// Whether `binary` resolves on `PATH`.
pub fn command_exists(binary: &str) -> bool {
    StdCommand::new("sh")
        .arg("-c")
        .arg(format!("command -v {binary} >/dev/null 2>&1"))
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

fn run_listing(flag: &str) -> Option<String> {
    let output = StdCommand::new("ffmpeg")
        .args(["-hide_banner", flag])
        .output()
        .ok()?;
    if !output.status.success() {
        tracing::warn!(flag, "ffmpeg capability listing failed");
        return None;
    }
    String::from_utf8(output.stdout).ok()
}

/// Names from an ffmpeg `-encoders` / `-muxers` table (after the `---` rule).
fn parse_listing(raw: &str) -> HashSet<String> {
    raw.lines()
        .skip_while(|line| !line.trim_start().starts_with("--"))
        .skip(1)
        .filter_map(|line| line.split_whitespace().nth(1))
        .flat_map(|names| names.split(','))
        .map(str::to_string)
        .collect()
}
