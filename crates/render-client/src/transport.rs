//! Remote backend seam and transport fault classification.

use async_trait::async_trait;
use thiserror::Error;

use vidlay_common::VidlayError;
use vidlay_render_model::{JobId, JobStatusReport, RenderRequest};

/// What went wrong talking to a remote backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// The service could not be reached: refused, DNS, timeout.
    Connectivity,
    /// The service answered with a non-success status.
    Rejected { status: u16 },
    /// The service answered but the body was unreadable.
    Decode,
    /// The request could not be built or followed, e.g. a malformed URL
    /// or a redirect loop.
    Invalid,
    /// The request failed after it was sent, for reasons other than
    /// reachability.
    Request,
}

#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn connectivity(msg: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::Connectivity,
            message: msg.into(),
        }
    }

    pub fn rejected(status: u16, msg: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::Rejected { status },
            message: msg.into(),
        }
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::Decode,
            message: msg.into(),
        }
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::Invalid,
            message: msg.into(),
        }
    }

    pub fn request(msg: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::Request,
            message: msg.into(),
        }
    }

    /// Whether a local fallback is appropriate.
    pub fn is_connectivity(&self) -> bool {
        self.kind == TransportErrorKind::Connectivity
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        let message = err.to_string();
        if let Some(status) = err.status() {
            Self::rejected(status.as_u16(), message)
        } else if err.is_connect() || err.is_timeout() {
            Self::connectivity(message)
        } else if err.is_decode() || err.is_body() {
            Self::decode(message)
        } else if err.is_builder() || err.is_redirect() {
            Self::invalid(message)
        } else {
            Self::request(message)
        }
    }
}

impl From<TransportError> for VidlayError {
    fn from(err: TransportError) -> Self {
        match err.kind {
            TransportErrorKind::Connectivity => VidlayError::network(err.message),
            TransportErrorKind::Rejected { status } => VidlayError::RemoteRejected {
                status,
                message: err.message,
            },
            TransportErrorKind::Decode => VidlayError::Other(anyhow::anyhow!(
                "Unreadable response from render service: {}",
                err.message
            )),
            TransportErrorKind::Invalid => {
                VidlayError::config(format!("Invalid render service request: {}", err.message))
            }
            TransportErrorKind::Request => VidlayError::Other(anyhow::anyhow!(
                "Render service request failed: {}",
                err.message
            )),
        }
    }
}

/// A render service reachable over some transport.
#[async_trait]
pub trait RemoteBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn submit(&self, request: &RenderRequest) -> Result<JobId, TransportError>;

    /// Status of `id`, or `None` when the service does not know it.
    async fn status(&self, id: &JobId) -> Result<Option<JobStatusReport>, TransportError>;

    async fn health(&self) -> Result<bool, TransportError>;
}
