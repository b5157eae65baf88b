//! Test configuration helpers for pointing jobwatch at a mock backend

use jobwatch::config::{ApiConfig, DownloadConfig, PollPolicy, PollingConfig, RetryConfig};
use jobwatch::{Config, Credential, CredentialProvider, JobWatcher, StaticCredential};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::MockServer;

/// Bearer token every mock expects
pub const TEST_TOKEN: &str = "test-token";

/// Poll interval used by end-to-end tests
pub const TEST_INTERVAL: Duration = Duration::from_millis(25);

/// Configuration that polls the mock server quickly and saves into `temp_dir`
pub fn test_config(server: &MockServer, temp_dir: &TempDir) -> Config {
    let policy = PollPolicy::new(TEST_INTERVAL, Duration::from_secs(10));
    Config {
        api: ApiConfig {
            base_url: format!("{}/api", server.uri()),
            request_timeout: Duration::from_secs(2),
            ..Default::default()
        },
        polling: PollingConfig {
            single_task: policy,
            batch_task: policy,
            payment_order: policy,
            max_consecutive_misses: 4,
            ..Default::default()
        },
        download: DownloadConfig {
            download_dir: temp_dir.path().join("downloads"),
            inter_download_delay: Duration::from_millis(10),
            retry: RetryConfig {
                max_attempts: 2,
                initial_delay: Duration::from_millis(10),
                max_delay: Duration::from_millis(50),
                backoff_multiplier: 2.0,
                jitter: false,
            },
            ..Default::default()
        },
    }
}

/// Provider handing out [`TEST_TOKEN`]
pub fn test_credentials() -> Arc<dyn CredentialProvider> {
    Arc::new(StaticCredential(Credential::bearer(TEST_TOKEN)))
}

/// Create a watcher against the mock server
///
/// Returns the watcher and the temp directory that must outlive it.
pub fn create_test_watcher(server: &MockServer) -> (JobWatcher, TempDir) {
    let temp_dir = tempfile::tempdir().expect("failed to create temp dir");
    let config = test_config(server, &temp_dir);
    let watcher = JobWatcher::new(config, test_credentials()).expect("invalid test config");
    (watcher, temp_dir)
}
