//! Render client facade.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use vidlay_common::{AppConfig, VidlayError, VidlayResult};
use vidlay_render_engine::{EncoderHost, JobStore, RenderLoop, RenderSettings};
use vidlay_render_model::{JobId, JobStatusReport, RenderRequest};

use crate::http::HttpBackend;
use crate::local::LocalBackend;
use crate::transport::{RemoteBackend, TransportError};

/// Submits renders remote-first and answers status checks.
///
/// Holds no timers; callers poll with [`crate::poll::wait_for_terminal`].
pub struct RenderClient {
    remote: Option<Arc<dyn RemoteBackend>>,
    local: LocalBackend,
    fallback_logged: AtomicBool,
}

impl RenderClient {
    pub fn new(local: LocalBackend) -> Self {
        Self {
            remote: None,
            local,
            fallback_logged: AtomicBool::new(false),
        }
    }

    pub fn with_remote(mut self, remote: Arc<dyn RemoteBackend>) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Build from configuration: local loop on `host`, remote if a URL is set.
    pub fn from_config(config: &AppConfig, host: Arc<dyn EncoderHost>) -> VidlayResult<Self> {
        let driver = RenderLoop::new(host, RenderSettings::from_config(config));
        let store = Arc::new(JobStore::from_config(&config.jobs));
        let client = Self::new(LocalBackend::new(driver, store));
        Ok(match HttpBackend::from_config(&config.remote)? {
            Some(remote) => {
                tracing::info!(url = remote.base_url(), "Using remote render service");
                client.with_remote(Arc::new(remote))
            }
            None => client,
        })
    }

    pub fn local(&self) -> &LocalBackend {
        &self.local
    }

    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }

    /// Validate and submit a render, returning its job id.
    ///
    /// An unreachable remote falls back to local rendering; a remote that
    /// refuses the request is an error.
    pub async fn submit(&self, request: RenderRequest) -> VidlayResult<JobId> {
        request
            .transform
            .check()
            .map_err(|e| VidlayError::invalid_transform(e.to_string()))?;

        if let Some(remote) = &self.remote {
            match remote.submit(&request).await {
                Ok(id) => {
                    tracing::info!(job_id = %id, backend = remote.name(), "Submitted to remote");
                    return Ok(id);
                }
                Err(err) if err.is_connectivity() => self.note_fallback(remote.name(), &err),
                Err(err) => return Err(err.into()),
            }
        }

        Ok(self.local.submit(request).await)
    }

    /// Current status of `id`. Local jobs are answered without a network call.
    pub async fn poll(&self, id: &JobId) -> VidlayResult<JobStatusReport> {
        if self.local.knows(id).await {
            return self.local.status(id).await;
        }
        let Some(remote) = &self.remote else {
            return Err(VidlayError::job_not_found(id.as_str()));
        };
        remote
            .status(id)
            .await?
            .ok_or_else(|| VidlayError::job_not_found(id.as_str()))
    }

    /// Whether the remote service answers its health probe.
    pub async fn health(&self) -> bool {
        let Some(remote) = &self.remote else {
            return false;
        };
        match remote.health().await {
            Ok(healthy) => healthy,
            Err(err) => {
                tracing::warn!(backend = remote.name(), error = %err, "Health probe failed");
                false
            }
        }
    }

    fn note_fallback(&self, backend: &str, err: &TransportError) {
        if !self.fallback_logged.swap(true, Ordering::Relaxed) {
            tracing::warn!(
                backend,
                error = %err,
                "Render service unreachable; rendering locally"
            );
        } else {
            tracing::debug!(backend, error = %err, "Render service unreachable");
        }
    }
}
