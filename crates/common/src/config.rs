//! Application configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Global application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Directory where locally rendered videos are written.
    pub output_dir: PathBuf,

    /// Remote render service settings.
    pub remote: RemoteConfig,

    /// Caller-side polling policy.
    pub polling: PollingConfig,

    /// Local render loop settings.
    pub render: RenderDefaults,

    /// Job retention settings.
    pub jobs: JobStoreConfig,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// Remote render service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Base URL of the render service. `None` means local rendering only.
    pub base_url: Option<String>,

    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

/// How often and how long a caller polls job status.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Interval between status checks in milliseconds.
    pub interval_ms: u64,

    /// Number of status checks before giving up.
    pub max_attempts: u32,
}

/// Local render loop parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderDefaults {
    /// Output frame rate when the source frame rate is not preserved.
    pub fps: u32,

    /// Wall-clock ceiling for a single encode, in seconds.
    pub safety_ceiling_secs: f64,

    /// Target duration when no overlay video defines one, in seconds.
    pub default_duration_secs: f64,
}

/// Retention for finished jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobStoreConfig {
    /// Seconds a completed or failed job stays pollable.
    pub retention_secs: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "vidlay=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,

    /// Optional log file path.
    pub file: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            remote: RemoteConfig::default(),
            polling: PollingConfig::default(),
            render: RenderDefaults::default(),
            jobs: JobStoreConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_secs: 30,
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: 2000,
            max_attempts: 120,
        }
    }
}

impl Default for RenderDefaults {
    fn default() -> Self {
        Self {
            fps: 30,
            safety_ceiling_secs: 20.0,
            default_duration_secs: 5.0,
        }
    }
}

impl Default for JobStoreConfig {
    fn default() -> Self {
        Self {
            retention_secs: 3600,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

impl AppConfig {
    /// Load config from the standard location, falling back to defaults,
    /// then apply environment overrides.
    pub fn load() -> Self {
        let config_path = config_file_path();
        let mut config = Self::default();
        if config_path.exists() {
            match std::fs::read_to_string(&config_path) {
                Ok(content) => match serde_json::from_str(&content) {
                    Ok(parsed) => config = parsed,
                    Err(e) => {
                        tracing::warn!("Failed to parse config at {:?}: {}", config_path, e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to read config at {:?}: {}", config_path, e);
                }
            }
        }
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("VIDLAY_REMOTE_URL") {
            let url = url.trim();
            self.remote.base_url = if url.is_empty() {
                None
            } else {
                Some(url.trim_end_matches('/').to_string())
            };
        }
        if let Ok(dir) = std::env::var("VIDLAY_OUTPUT_DIR") {
            if !dir.trim().is_empty() {
                self.output_dir = PathBuf::from(dir);
            }
        }
    }
}

/// Standard config file location.
fn config_file_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("vidlay").join("config.json")
}

/// Default render output directory.
fn default_output_dir() -> PathBuf {
    let base = std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local").join("share")
        });
    base.join("vidlay").join("renders")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{"remote":{"base_url":"http://render.local"}}"#).unwrap();
        assert_eq!(config.remote.base_url.as_deref(), Some("http://render.local"));
        assert_eq!(config.polling.interval_ms, 2000);
        assert_eq!(config.polling.max_attempts, 120);
        assert_eq!(config.render.fps, 30);
        assert!((config.render.safety_ceiling_secs - 20.0).abs() < 1e-9);
    }
}
