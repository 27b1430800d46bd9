//! In-process render backend.

use std::sync::Arc;

use vidlay_common::VidlayResult;
use vidlay_render_engine::{JobStore, RenderHandle, RenderLoop, RenderMode, RenderOptions};
use vidlay_render_model::{Container, JobId, JobStatusReport, RenderRequest};

/// Options applied to every locally rendered request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalRenderDefaults {
    pub preferred_container: Container,
    pub mode: RenderMode,
    pub editing: bool,
}

impl Default for LocalRenderDefaults {
    fn default() -> Self {
        Self {
            preferred_container: Container::Mp4,
            mode: RenderMode::Full,
            editing: false,
        }
    }
}

/// Runs jobs on the local render loop and records them in a shared store.
pub struct LocalBackend {
    store: Arc<JobStore>,
    driver: RenderLoop,
    defaults: LocalRenderDefaults,
}

impl LocalBackend {
    pub fn new(driver: RenderLoop, store: Arc<JobStore>) -> Self {
        Self {
            store,
            driver,
            defaults: LocalRenderDefaults::default(),
        }
    }

    pub fn with_defaults(mut self, defaults: LocalRenderDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    pub fn defaults(&self) -> LocalRenderDefaults {
        self.defaults
    }

    fn options_for(&self, request: &RenderRequest) -> RenderOptions {
        RenderOptions {
            preferred_container: self.defaults.preferred_container,
            mode: self.defaults.mode,
            editing: self.defaults.editing,
            ..RenderOptions::for_request(request)
        }
    }

    /// Create a job and start rendering it, keeping the handle.
    pub async fn start(&self, request: RenderRequest) -> RenderHandle {
        let id = self.store.create(request.params.clone()).await;
        let options = self.options_for(&request);
        tracing::info!(job_id = %id, background = %request.background, "Rendering locally");
        self.driver
            .spawn_request(Arc::clone(&self.store), id, request, options)
    }

    /// Create a job and render it in the background. The task outlives the call.
    pub async fn submit(&self, request: RenderRequest) -> JobId {
        self.start(request).await.job_id().clone()
    }

    pub async fn status(&self, id: &JobId) -> VidlayResult<JobStatusReport> {
        self.store.report(id).await
    }

    pub async fn knows(&self, id: &JobId) -> bool {
        self.store.contains(id).await
    }
}
