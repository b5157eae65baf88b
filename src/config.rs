//! Configuration types for jobwatch

use crate::error::{Error, Result};
use crate::types::JobKind;
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// Largest accepted growth factor between two retry delays
pub const MAX_BACKOFF_MULTIPLIER: f64 = 10.0;

/// Backend API connection settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL every endpoint path is joined to (default: "http://localhost:8080/api/")
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Per-request timeout (default: 15 seconds)
    #[serde(default = "default_request_timeout", with = "duration_ms_serde")]
    pub request_timeout: Duration,

    /// User-Agent header sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl ApiConfig {
    /// Parse the base URL, making sure relative paths resolve beneath it
    pub fn base_url(&self) -> Result<url::Url> {
        let mut raw = self.base_url.clone();
        if !raw.ends_with('/') {
            raw.push('/');
        }
        Ok(url::Url::parse(&raw)?)
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout: default_request_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

/// Cadence and time budget of a poll session
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollPolicy {
    /// Fixed delay between poll ticks
    #[serde(with = "duration_ms_serde")]
    pub interval: Duration,

    /// Wall-clock budget after which the session stops on its own
    #[serde(with = "duration_ms_serde")]
    pub deadline: Duration,
}

impl PollPolicy {
    /// Create a new policy
    pub fn new(interval: Duration, deadline: Duration) -> Self {
        Self { interval, deadline }
    }
}

/// Polling settings, one policy per job kind
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PollingConfig {
    /// Single image task (default: every 2s for 10 minutes)
    #[serde(default = "default_single_policy")]
    pub single_task: PollPolicy,

    /// Batch task (default: every 3s for 30 minutes)
    #[serde(default = "default_batch_policy")]
    pub batch_task: PollPolicy,

    /// Payment order (default: every 3s for 30 minutes)
    #[serde(default = "default_payment_policy")]
    pub payment_order: PollPolicy,

    /// Consecutive polls without a usable payload before a session gives up (default: 5)
    ///
    /// Transport failures and malformed payloads both count; any successful poll
    /// resets the counter.
    #[serde(default = "default_max_consecutive_misses")]
    pub max_consecutive_misses: u32,

    /// Capacity of the update broadcast channel (default: 256)
    #[serde(default = "default_update_buffer")]
    pub update_buffer: usize,
}

impl PollingConfig {
    /// Policy for a job kind
    pub fn policy(&self, kind: JobKind) -> PollPolicy {
        match kind {
            JobKind::SingleTask => self.single_task,
            JobKind::BatchTask => self.batch_task,
            JobKind::PaymentOrder => self.payment_order,
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            single_task: default_single_policy(),
            batch_task: default_batch_policy(),
            payment_order: default_payment_policy(),
            max_consecutive_misses: default_max_consecutive_misses(),
            update_buffer: default_update_buffer(),
        }
    }
}

/// What to do when a saved result would overwrite an existing file
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileCollisionAction {
    /// Append (1), (2), etc. to the filename (default)
    #[default]
    Rename,
    /// Overwrite the existing file
    Overwrite,
    /// Refuse to save the file
    Skip,
}

/// Result download settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Directory results are saved to (default: "./downloads")
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,

    /// Pause between sequential per-artifact downloads (default: 450ms)
    ///
    /// Client platforms throttle many saves in a tight loop; zero disables the pause.
    #[serde(default = "default_inter_download_delay", with = "duration_ms_serde")]
    pub inter_download_delay: Duration,

    /// File collision handling
    #[serde(default)]
    pub file_collision: FileCollisionAction,

    /// Job kinds whose backend can bundle all results into one archive
    #[serde(default = "default_archive_kinds")]
    pub archive_kinds: Vec<JobKind>,

    /// Retry behavior for artifact fetches
    #[serde(default)]
    pub retry: RetryConfig,
}

impl DownloadConfig {
    /// Whether all results of this kind can be fetched as one archive
    pub fn supports_archive(&self, kind: JobKind) -> bool {
        self.archive_kinds.contains(&kind)
    }
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            inter_download_delay: default_inter_download_delay(),
            file_collision: FileCollisionAction::default(),
            archive_kinds: default_archive_kinds(),
            retry: RetryConfig::default(),
        }
    }
}

/// Retry configuration for transient failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 500ms)
    #[serde(default = "default_initial_delay", with = "duration_ms_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 10 seconds)
    #[serde(default = "default_max_delay", with = "duration_ms_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// Main configuration for [`JobWatcher`](crate::JobWatcher) and
/// [`Materializer`](crate::Materializer)
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Backend connection settings
    #[serde(default)]
    pub api: ApiConfig,

    /// Poll cadence, deadlines and miss budget
    #[serde(default)]
    pub polling: PollingConfig,

    /// Result download settings
    #[serde(default)]
    pub download: DownloadConfig,
}

impl Config {
    /// Check settings that would otherwise fail at first use
    pub fn validate(&self) -> Result<()> {
        let base = url::Url::parse(&self.api.base_url)
            .map_err(|e| Error::config("api.base_url", format!("invalid URL: {}", e)))?;
        if base.cannot_be_a_base() {
            return Err(Error::config(
                "api.base_url",
                "URL cannot be used as a base",
            ));
        }
        if self.api.request_timeout.is_zero() {
            return Err(Error::config(
                "api.request_timeout",
                "request timeout must be greater than zero",
            ));
        }

        for (key, policy) in [
            ("polling.single_task", self.polling.single_task),
            ("polling.batch_task", self.polling.batch_task),
            ("polling.payment_order", self.polling.payment_order),
        ] {
            if policy.interval.is_zero() {
                return Err(Error::config(key, "poll interval must be greater than zero"));
            }
            if policy.deadline < policy.interval {
                return Err(Error::config(
                    key,
                    "deadline must be at least one poll interval",
                ));
            }
        }

        if self.polling.max_consecutive_misses == 0 {
            return Err(Error::config(
                "polling.max_consecutive_misses",
                "at least one miss must be tolerated",
            ));
        }
        if self.polling.update_buffer == 0 {
            return Err(Error::config(
                "polling.update_buffer",
                "update buffer must hold at least one update",
            ));
        }
        if !(1.0..=MAX_BACKOFF_MULTIPLIER).contains(&self.download.retry.backoff_multiplier) {
            return Err(Error::config(
                "download.retry.backoff_multiplier",
                format!("backoff multiplier must be between 1.0 and {MAX_BACKOFF_MULTIPLIER}"),
            ));
        }
        Ok(())
    }

}

fn default_base_url() -> String {
    "http://localhost:8080/api/".to_string()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(15)
}

fn default_user_agent() -> String {
    format!("jobwatch/{}", env!("CARGO_PKG_VERSION"))
}

fn default_single_policy() -> PollPolicy {
    PollPolicy::new(Duration::from_secs(2), Duration::from_secs(10 * 60))
}

fn default_batch_policy() -> PollPolicy {
    PollPolicy::new(Duration::from_secs(3), Duration::from_secs(30 * 60))
}

fn default_payment_policy() -> PollPolicy {
    PollPolicy::new(Duration::from_secs(3), Duration::from_secs(30 * 60))
}

fn default_max_consecutive_misses() -> u32 {
    5
}

fn default_update_buffer() -> usize {
    256
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("./downloads")
}

fn default_inter_download_delay() -> Duration {
    Duration::from_millis(450)
}

fn default_archive_kinds() -> Vec<JobKind> {
    vec![JobKind::SingleTask, JobKind::BatchTask]
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_millis(500)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(10)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

// Duration serialization helper (milliseconds)
mod duration_ms_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
