//! Configuration types for the progress-tracking scheduler.

use crate::error::{Result, TrackerError};
use crate::scheduler::retry::ReportRetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level scheduler configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Tracker cadence and feature toggles.
    pub tracker: TrackerConfig,
    /// Enrollment waiting policy.
    pub enrollment: EnrollmentConfig,
    /// Progress report retry policy.
    pub retry: RetryConfig,
    /// Remote task API endpoint.
    pub remote: RemoteConfig,
    /// Resume list storage.
    pub storage: StorageConfig,
    /// Log output (host binary only).
    pub logging: LoggingConfig,
}

/// Tracker cadence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Master switch. When `false` no trackers start and the resume list is cleared.
    pub enabled: bool,
    /// Seconds between simulated progress reports.
    pub report_every_secs: u64,
    /// Seconds between heartbeats.
    ///
    /// Must stay below the server's maximum allowed gap between heartbeats.
    pub heartbeat_interval_secs: u64,
    /// Render timer period in milliseconds (drives UI progress ticks).
    pub render_tick_ms: u64,
    /// Start tracking automatically when a task-enrolled event arrives.
    pub auto_track_on_enroll: bool,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            report_every_secs: 10,
            heartbeat_interval_secs: 20,
            render_tick_ms: 1000,
            auto_track_on_enroll: true,
        }
    }
}

impl TrackerConfig {
    /// Simulated report cadence.
    pub fn report_every(&self) -> Duration {
        Duration::from_secs(self.report_every_secs)
    }

    /// Heartbeat cadence.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    /// Render timer period.
    pub fn render_tick(&self) -> Duration {
        Duration::from_millis(self.render_tick_ms)
    }
}

/// Enrollment waiting policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrollmentConfig {
    /// Give up waiting for enrollment after this many milliseconds.
    pub timeout_ms: u64,
    /// Poll the remote task record this often, in milliseconds.
    pub poll_interval_ms: u64,
}

impl Default for EnrollmentConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 60_000,
            poll_interval_ms: 1_000,
        }
    }
}

impl EnrollmentConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Fixed-delay retry policy for remote calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts per report, including the first.
    pub max_attempts: u32,
    /// Delay between attempts in milliseconds.
    pub delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay_ms: 2_000,
        }
    }
}

impl RetryConfig {
    /// Build the runtime retry policy.
    pub fn policy(&self) -> ReportRetryPolicy {
        ReportRetryPolicy::new(self.max_attempts, Duration::from_millis(self.delay_ms))
    }
}

/// Remote task API endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Base URL; task routes are appended as `/tasks/{id}/...`.
    pub base_url: String,
    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
    /// Optional bearer token sent with every request.
    pub auth_token: Option<String>,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080/api".to_owned(),
            request_timeout_secs: 10,
            auth_token: None,
        }
    }
}

/// Resume list storage settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Resume list path. `None` uses [`crate::app_dirs::resume_file`].
    pub resume_path: Option<PathBuf>,
}

impl StorageConfig {
    /// Effective resume list path.
    pub fn resolved_resume_path(&self) -> PathBuf {
        self.resume_path
            .clone()
            .unwrap_or_else(crate::app_dirs::resume_file)
    }
}

/// Log output settings for the host binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Directory for daily-rotated log files. `None` logs to stderr only.
    pub dir: Option<PathBuf>,
    /// Default filter directive when `RUST_LOG` is unset.
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: None,
            filter: "quest_tracker=info".to_owned(),
        }
    }
}

impl SchedulerConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self =
            toml::from_str(&content).map_err(|e| TrackerError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| TrackerError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path (`config_dir()/config.toml`).
    pub fn default_config_path() -> PathBuf {
        crate::app_dirs::config_file()
    }

    /// Reject values that would stall or spin the trackers.
    pub fn validate(&self) -> Result<()> {
        if self.tracker.report_every_secs == 0 {
            return Err(TrackerError::Config(
                "tracker.report_every_secs must be greater than zero".to_owned(),
            ));
        }
        if self.tracker.heartbeat_interval_secs == 0 {
            return Err(TrackerError::Config(
                "tracker.heartbeat_interval_secs must be greater than zero".to_owned(),
            ));
        }
        if self.tracker.render_tick_ms == 0 {
            return Err(TrackerError::Config(
                "tracker.render_tick_ms must be greater than zero".to_owned(),
            ));
        }
        if self.enrollment.poll_interval_ms == 0 {
            return Err(TrackerError::Config(
                "enrollment.poll_interval_ms must be greater than zero".to_owned(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(TrackerError::Config(
                "retry.max_attempts must be at least 1".to_owned(),
            ));
        }
        if self.remote.base_url.trim().is_empty() {
            return Err(TrackerError::Config("remote.base_url is empty".to_owned()));
        }
        Ok(())
    }
}
