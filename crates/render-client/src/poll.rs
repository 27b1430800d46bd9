//! Caller-side polling policy.

use std::time::Duration;

use vidlay_common::{PollingConfig, VidlayError, VidlayResult};
use vidlay_render_model::{JobId, JobStatusReport};

use crate::client::RenderClient;

/// How often and how many times to check a job's status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            max_attempts: 120,
        }
    }
}

impl PollPolicy {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn from_config(config: &PollingConfig) -> Self {
        Self::new(Duration::from_millis(config.interval_ms), config.max_attempts)
    }
}

/// Poll `id` until it reaches a terminal state.
///
/// `on_tick` sees every report, including the terminal one. Status errors
/// end the wait immediately; running out of attempts is
/// [`VidlayError::RenderTimeout`].
pub async fn wait_for_terminal<F>(
    client: &RenderClient,
    id: &JobId,
    policy: PollPolicy,
    mut on_tick: F,
) -> VidlayResult<JobStatusReport>
where
    F: FnMut(&JobStatusReport),
{
    let attempts = policy.max_attempts.max(1);
    for attempt in 1..=attempts {
        let report = client.poll(id).await?;
        on_tick(&report);
        if report.is_terminal() {
            tracing::debug!(job_id = %id, attempt, status = %report.status, "Job finished");
            return Ok(report);
        }
        if attempt < attempts {
            tokio::time::sleep(policy.interval).await;
        }
    }
    tracing::warn!(job_id = %id, attempts, "Gave up waiting for job");
    Err(VidlayError::RenderTimeout { attempts })
}
