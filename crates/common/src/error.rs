//! Error types shared across Vidlay crates.

use std::path::PathBuf;

/// Top-level error type for Vidlay operations.
#[derive(Debug, thiserror::Error)]
pub enum VidlayError {
    /// The placement transform failed validation. Raised before any job exists.
    #[error("Invalid transform: {message}")]
    InvalidTransform { message: String },

    /// No codec/container candidate is available on the host.
    #[error("Encoder unsupported: {message}")]
    EncoderUnsupported { message: String },

    /// Background or overlay media could not be opened or probed.
    #[error("Source load failure: {message}")]
    SourceLoad { message: String },

    /// The remote backend could not be reached.
    #[error("Network failure: {message}")]
    Network { message: String },

    /// The remote backend answered but refused the request.
    #[error("Remote backend rejected request ({status}): {message}")]
    RemoteRejected { status: u16, message: String },

    #[error("Job not found: {id}")]
    JobNotFound { id: String },

    /// A lifecycle transition was attempted on a job that already finished.
    #[error("Job {id} is already {status}")]
    JobTransition { id: String, status: String },

    /// The caller's poll budget ran out before the job finished.
    #[error("Render timed out after {attempts} status checks")]
    RenderTimeout { attempts: u32 },

    #[error("Render error: {message}")]
    Render { message: String },

    #[error("Encode error: {message}")]
    Encode { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using VidlayError.
pub type VidlayResult<T> = Result<T, VidlayError>;

impl VidlayError {
    pub fn invalid_transform(msg: impl Into<String>) -> Self {
        Self::InvalidTransform {
            message: msg.into(),
        }
    }

    pub fn encoder_unsupported(msg: impl Into<String>) -> Self {
        Self::EncoderUnsupported {
            message: msg.into(),
        }
    }

    pub fn source_load(msg: impl Into<String>) -> Self {
        Self::SourceLoad {
            message: msg.into(),
        }
    }

    pub fn network(msg: impl Into<String>) -> Self {
        Self::Network {
            message: msg.into(),
        }
    }

    pub fn job_not_found(id: impl Into<String>) -> Self {
        Self::JobNotFound { id: id.into() }
    }

    pub fn render(msg: impl Into<String>) -> Self {
        Self::Render {
            message: msg.into(),
        }
    }

    pub fn encode(msg: impl Into<String>) -> Self {
        Self::Encode {
            message: msg.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Whether the failure is a transient connectivity fault rather than
    /// an answer from the backend.
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network { .. })
    }
}
