//! HTTP render service backend.
//!
//! - `POST {base}/render` with a [`RenderRequest`] body → `{ "jobId": … }`
//! - `GET {base}/status/{id}` → [`JobStatusReport`], 404 when unknown
//! - `GET {base}/health` → any 2xx means healthy

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use tracing::{debug, warn};

use vidlay_common::{RemoteConfig, VidlayError, VidlayResult};
use vidlay_render_model::{JobId, JobStatusReport, RenderRequest, SubmitResponse};

use crate::transport::{RemoteBackend, TransportError};

pub struct HttpBackend {
    http: Client,
    base_url: String,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> VidlayResult<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        match Url::parse(&base_url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            Ok(url) => {
                return Err(VidlayError::config(format!(
                    "Render service URL `{base_url}` must be http or https, not {}",
                    url.scheme()
                )))
            }
            Err(e) => {
                return Err(VidlayError::config(format!(
                    "Render service URL `{base_url}` is invalid: {e}"
                )))
            }
        }
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| VidlayError::config(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { http, base_url })
    }

    /// Backend for the configured remote, if any.
    pub fn from_config(config: &RemoteConfig) -> VidlayResult<Option<Self>> {
        match config.base_url.as_deref().map(str::trim) {
            Some(url) if !url.is_empty() => Ok(Some(Self::new(
                url,
                Duration::from_secs(config.timeout_secs.max(1)),
            )?)),
            _ => Ok(None),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

async fn rejection(response: reqwest::Response) -> TransportError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    TransportError::rejected(
        status.as_u16(),
        format!("render service returned {status}: {}", body.trim()),
    )
}

#[async_trait]
impl RemoteBackend for HttpBackend {
    fn name(&self) -> &str {
        &self.base_url
    }

    async fn submit(&self, request: &RenderRequest) -> Result<JobId, TransportError> {
        let url = self.url("/render");
        debug!(url = %url, "Submitting render request");

        let response = self.http.post(&url).json(request).send().await?;
        if !response.status().is_success() {
            return Err(rejection(response).await);
        }
        let body: SubmitResponse = response.json().await?;
        Ok(JobId::from(body.job_id))
    }

    async fn status(&self, id: &JobId) -> Result<Option<JobStatusReport>, TransportError> {
        let url = self.url(&format!("/status/{id}"));
        let response = self.http.get(&url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(rejection(response).await);
        }
        Ok(Some(response.json().await?))
    }

    async fn health(&self) -> Result<bool, TransportError> {
        let response = self.http.get(self.url("/health")).send().await?;
        if !response.status().is_success() {
            warn!(status = %response.status(), "Render service health check failed");
        }
        Ok(response.status().is_success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_requires_url() {
        let mut config = RemoteConfig::default();
        config.base_url = None;
        assert!(HttpBackend::from_config(&config).unwrap().is_none());

        config.base_url = Some("   ".into());
        assert!(HttpBackend::from_config(&config).unwrap().is_none());

        config.base_url = Some("http://render.local:8080/".into());
        let backend = HttpBackend::from_config(&config).unwrap().unwrap();
        assert_eq!(backend.base_url(), "http://render.local:8080");
        assert_eq!(backend.url("/health"), "http://render.local:8080/health");
    }

    #[test]
    fn test_url_without_scheme_is_config_error() {
        for url in ["render.local:8080", "localhost/api", "ftp://render.local"] {
            let err = HttpBackend::new(url, Duration::from_secs(5)).err().unwrap();
            assert!(matches!(err, VidlayError::Config { .. }), "{url}: {err:?}");
        }
    }
}
