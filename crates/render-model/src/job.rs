//! Render job records and their lifecycle.
//!
//! ```text
//!              ┌──────────► completed (progress = 100, result set)
//! processing ──┤
//!              └──────────► failed    (error set)
//! ```
//!
//! `processing` is the only initial state and both outcomes are terminal.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque job identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Generate a fresh random identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for JobId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Job processing status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Whether no further transitions can happen.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output quality tier requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Low,
    #[default]
    Standard,
    High,
}

impl FromStr for Quality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Quality::Low),
            "standard" => Ok(Quality::Standard),
            "high" => Ok(Quality::High),
            other => Err(format!("unknown quality `{other}` (use low, standard, high)")),
        }
    }
}

/// Target aspect ratio, written `W:H` or `original`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum AspectRatio {
    /// Keep the background's own aspect ratio.
    #[default]
    Original,
    Ratio { width: u32, height: u32 },
}

impl AspectRatio {
    /// Width divided by height, if a ratio was requested.
    pub fn value(&self) -> Option<f64> {
        match self {
            AspectRatio::Original => None,
            AspectRatio::Ratio { width, height } => Some(*width as f64 / *height as f64),
        }
    }
}

impl FromStr for AspectRatio {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("original") {
            return Ok(AspectRatio::Original);
        }
        let (w, h) = trimmed
            .split_once(':')
            .ok_or_else(|| format!("aspect ratio `{trimmed}` is not W:H"))?;
        let width = w
            .trim()
            .parse::<u32>()
            .map_err(|_| format!("aspect ratio width `{w}` is not a positive integer"))?;
        let height = h
            .trim()
            .parse::<u32>()
            .map_err(|_| format!("aspect ratio height `{h}` is not a positive integer"))?;
        if width == 0 || height == 0 {
            return Err(format!("aspect ratio `{trimmed}` has a zero side"));
        }
        Ok(AspectRatio::Ratio { width, height })
    }
}

impl TryFrom<String> for AspectRatio {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AspectRatio> for String {
    fn from(value: AspectRatio) -> Self {
        value.to_string()
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AspectRatio::Original => f.write_str("original"),
            AspectRatio::Ratio { width, height } => write!(f, "{width}:{height}"),
        }
    }
}

/// Inputs captured at submission time. Never modified afterwards.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct JobParams {
    pub aspect_ratio: AspectRatio,
    pub quality: Quality,
    /// Keep the background's native frame rate instead of the default output rate.
    pub preserve_original_speed: bool,
    /// Sample the overlay image pixel-exactly instead of smoothing it.
    pub exact_positioning: bool,
}

/// Output container format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Container {
    Mp4,
    Webm,
}

impl Container {
    pub fn extension(&self) -> &'static str {
        match self {
            Container::Mp4 => "mp4",
            Container::Webm => "webm",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            Container::Mp4 => "video/mp4",
            Container::Webm => "video/webm",
        }
    }
}

impl FromStr for Container {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mp4" => Ok(Container::Mp4),
            "webm" => Ok(Container::Webm),
            other => Err(format!("unknown container `{other}` (use mp4, webm)")),
        }
    }
}

impl fmt::Display for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Reference to a finished render.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderOutput {
    /// File path or URL where the video can be fetched.
    pub location: String,
    /// Container actually negotiated with the encoder.
    pub container: Container,
    /// Codec label of the negotiated candidate.
    pub codec: String,
    /// Size of the encoded stream in bytes.
    pub bytes: u64,
}

/// A unit of asynchronous render work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub status: JobStatus,
    /// Progress percentage (0-100).
    pub progress: u8,
    pub result: Option<RenderOutput>,
    pub error: Option<String>,
    pub params: JobParams,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Create a job already in `processing` with zero progress.
    pub fn new(id: JobId, params: JobParams) -> Self {
        let now = Utc::now();
        Self {
            id,
            status: JobStatus::Processing,
            progress: 0,
            result: None,
            error: None,
            params,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Raise progress. Lower values and terminal jobs are left untouched.
    /// Returns whether the stored value changed.
    pub fn advance(&mut self, progress: u8) -> bool {
        let progress = progress.min(100);
        if self.is_terminal() || progress <= self.progress {
            return false;
        }
        self.progress = progress;
        self.updated_at = Utc::now();
        true
    }

    /// Mark the job completed. Returns `false` if it had already finished.
    pub fn complete(&mut self, output: RenderOutput) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.status = JobStatus::Completed;
        self.progress = 100;
        self.result = Some(output);
        self.updated_at = Utc::now();
        true
    }

    /// Mark the job failed. Returns `false` if it had already finished.
    pub fn fail(&mut self, error: impl Into<String>) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.status = JobStatus::Failed;
        self.error = Some(error.into());
        self.updated_at = Utc::now();
        true
    }

    /// Snapshot in the shape a status check returns.
    pub fn report(&self) -> JobStatusReport {
        JobStatusReport {
            id: self.id.to_string(),
            status: self.status,
            progress: self.progress,
            download_url: self.result.as_ref().map(|r| r.location.clone()),
            error: self.error.clone(),
        }
    }
}

/// Answer to a status check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusReport {
    pub id: String,
    pub status: JobStatus,
    pub progress: u8,
    /// Only meaningful when `status` is `completed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobStatusReport {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output() -> RenderOutput {
        RenderOutput {
            location: "/tmp/out.mp4".into(),
            container: Container::Mp4,
            codec: "h264".into(),
            bytes: 1024,
        }
    }

    #[test]
    fn test_new_job_is_processing_at_zero() {
        let job = Job::new(JobId::generate(), JobParams::default());
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.progress, 0);
        assert!(job.result.is_none());
        assert!(job.error.is_none());
    }

    #[test]
    fn test_progress_never_decreases() {
        let mut job = Job::new(JobId::generate(), JobParams::default());
        assert!(job.advance(40));
        assert!(!job.advance(10));
        assert_eq!(job.progress, 40);
        assert!(job.advance(250));
        assert_eq!(job.progress, 100);
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut job = Job::new(JobId::generate(), JobParams::default());
        assert!(job.complete(output()));
        assert_eq!(job.progress, 100);
        assert!(!job.fail("late failure"));
        assert!(!job.advance(50));
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.error.is_none());

        let mut job = Job::new(JobId::generate(), JobParams::default());
        assert!(job.fail("boom"));
        assert!(!job.complete(output()));
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.result.is_none());
    }

    #[test]
    fn test_report_only_has_download_url_when_completed() {
        let mut job = Job::new(JobId::from("job-1"), JobParams::default());
        assert_eq!(job.report().download_url, None);
        job.complete(output());
        let report = job.report();
        assert_eq!(report.download_url.as_deref(), Some("/tmp/out.mp4"));

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["downloadUrl"], "/tmp/out.mp4");
        assert_eq!(json["status"], "completed");
        assert!(json.get("error").is_none());
    }

    #[test]
    fn test_aspect_ratio_parsing() {
        assert_eq!(
            "16:9".parse::<AspectRatio>().unwrap(),
            AspectRatio::Ratio {
                width: 16,
                height: 9
            }
        );
        assert_eq!(
            "Original".parse::<AspectRatio>().unwrap(),
            AspectRatio::Original
        );
        assert!("16x9".parse::<AspectRatio>().is_err());
        assert!("0:9".parse::<AspectRatio>().is_err());

        let ratio: AspectRatio = serde_json::from_str("\"9:16\"").unwrap();
        assert!((ratio.value().unwrap() - 0.5625).abs() < 1e-12);
    }

    #[test]
    fn test_params_wire_format() {
        let params: JobParams = serde_json::from_str(
            r#"{"aspectRatio":"1:1","quality":"high","preserveOriginalSpeed":true}"#,
        )
        .unwrap();
        assert_eq!(params.quality, Quality::High);
        assert!(params.preserve_original_speed);
        assert!(!params.exact_positioning);
    }
}
