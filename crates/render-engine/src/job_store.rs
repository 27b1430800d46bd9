//! In-memory registry of render jobs.
//!
//! Jobs move `processing → completed | failed` exactly once. Progress only
//! rises while a job is processing.

use std::collections::HashMap;

use chrono::{Duration, Utc};
use tokio::sync::RwLock;

use vidlay_common::{JobStoreConfig, VidlayError, VidlayResult};
use vidlay_render_model::{Job, JobId, JobParams, JobStatusReport, RenderOutput};

/// Longest retention accepted from configuration (ten years).
const MAX_RETENTION_SECS: u64 = 315_360_000;

#[derive(Debug, Default)]
pub struct JobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
    retention: Option<Duration>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that drops finished jobs older than `retention` whenever a
    /// new job is created.
    pub fn with_retention(retention: Duration) -> Self {
        Self {
            jobs: RwLock::default(),
            retention: Some(retention),
        }
    }

    pub fn from_config(config: &JobStoreConfig) -> Self {
        let secs = config.retention_secs.min(MAX_RETENTION_SECS) as i64;
        Self::with_retention(Duration::seconds(secs))
    }

    /// Register a new job in `processing` and return its id.
    pub async fn create(&self, params: JobParams) -> JobId {
        if let Some(retention) = self.retention {
            self.purge_finished(retention).await;
        }
        let id = JobId::generate();
        let job = Job::new(id.clone(), params);
        self.jobs.write().await.insert(id.clone(), job);
        tracing::debug!(job_id = %id, "Job created");
        id
    }

    pub async fn contains(&self, id: &JobId) -> bool {
        self.jobs.read().await.contains_key(id)
    }

    pub async fn get(&self, id: &JobId) -> VidlayResult<Job> {
        self.jobs
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| VidlayError::job_not_found(id.as_str()))
    }

    pub async fn report(&self, id: &JobId) -> VidlayResult<JobStatusReport> {
        self.get(id).await.map(|job| job.report())
    }

    /// Raise a job's progress. Stale (lower) values and finished jobs are ignored.
    pub async fn update_progress(&self, id: &JobId, progress: u8) -> VidlayResult<()> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| VidlayError::job_not_found(id.as_str()))?;
        job.advance(progress);
        Ok(())
    }

    pub async fn complete(&self, id: &JobId, output: RenderOutput) -> VidlayResult<()> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| VidlayError::job_not_found(id.as_str()))?;
        if !job.complete(output) {
            return Err(transition_error(job));
        }
        tracing::info!(job_id = %id, "Job completed");
        Ok(())
    }

    pub async fn fail(&self, id: &JobId, error: impl Into<String>) -> VidlayResult<()> {
        let error = error.into();
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| VidlayError::job_not_found(id.as_str()))?;
        if !job.fail(error.clone()) {
            return Err(transition_error(job));
        }
        tracing::warn!(job_id = %id, error = %error, "Job failed");
        Ok(())
    }

    /// Drop finished jobs last touched more than `retention` ago.
    pub async fn purge_finished(&self, retention: Duration) -> usize {
        let cutoff = Utc::now() - retention;
        let mut jobs = self.jobs.write().await;
        let before = jobs.len();
        jobs.retain(|_, job| !(job.is_terminal() && job.updated_at <= cutoff));
        let purged = before - jobs.len();
        if purged > 0 {
            tracing::debug!(purged, "Purged finished jobs");
        }
        purged
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }
}

fn transition_error(job: &Job) -> VidlayError {
    VidlayError::JobTransition {
        id: job.id.to_string(),
        status: job.status.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vidlay_render_model::{Container, JobStatus};

    fn output() -> RenderOutput {
        RenderOutput {
            location: "/tmp/out.mp4".into(),
            container: Container::Mp4,
            codec: "h264".into(),
            bytes: 42,
        }
    }

    #[tokio::test]
    async fn test_new_job_is_processing() {
        let store = JobStore::new();
        let id = store.create(JobParams::default()).await;
        let report = store.report(&id).await.unwrap();
        assert_eq!(report.status, JobStatus::Processing);
        assert_eq!(report.progress, 0);
        assert!(report.download_url.is_none());
    }

    #[tokio::test]
    async fn test_ids_are_unique() {
        let store = JobStore::new();
        let a = store.create(JobParams::default()).await;
        let b = store.create(JobParams::default()).await;
        assert_ne!(a, b);
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn test_progress_is_monotonic() {
        let store = JobStore::new();
        let id = store.create(JobParams::default()).await;
        store.update_progress(&id, 40).await.unwrap();
        store.update_progress(&id, 10).await.unwrap();
        assert_eq!(store.get(&id).await.unwrap().progress, 40);
    }

    #[tokio::test]
    async fn test_completion_sets_result_once() {
        let store = JobStore::new();
        let id = store.create(JobParams::default()).await;
        store.complete(&id, output()).await.unwrap();

        let report = store.report(&id).await.unwrap();
        assert_eq!(report.status, JobStatus::Completed);
        assert_eq!(report.progress, 100);
        assert_eq!(report.download_url.as_deref(), Some("/tmp/out.mp4"));

        let err = store.fail(&id, "late failure").await.unwrap_err();
        assert!(matches!(err, VidlayError::JobTransition { .. }));
        store.update_progress(&id, 50).await.unwrap();
        let job = store.get(&id).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100);
    }

    #[tokio::test]
    async fn test_failure_keeps_error_and_no_result() {
        let store = JobStore::new();
        let id = store.create(JobParams::default()).await;
        store.fail(&id, "decoder crashed").await.unwrap();

        let job = store.get(&id).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("decoder crashed"));
        assert!(job.result.is_none());
        assert!(store.complete(&id, output()).await.is_err());
    }

    #[tokio::test]
    async fn test_unknown_id_is_not_found() {
        let store = JobStore::new();
        let err = store.report(&JobId::from("missing")).await.unwrap_err();
        assert!(matches!(err, VidlayError::JobNotFound { .. }));
    }

    #[tokio::test]
    async fn test_purge_keeps_processing_jobs() {
        let store = JobStore::new();
        let running = store.create(JobParams::default()).await;
        let done = store.create(JobParams::default()).await;
        store.complete(&done, output()).await.unwrap();

        assert_eq!(store.purge_finished(Duration::zero()).await, 1);
        assert!(store.contains(&running).await);
        assert!(!store.contains(&done).await);
    }

    #[tokio::test]
    async fn test_create_applies_retention() {
        let store = JobStore::from_config(&JobStoreConfig { retention_secs: 0 });
        let done = store.create(JobParams::default()).await;
        store.fail(&done, "boom").await.unwrap();

        let fresh = store.create(JobParams::default()).await;
        assert!(!store.contains(&done).await);
        assert!(store.contains(&fresh).await);
        assert_eq!(store.len().await, 1);
    }
}
