//! Shutdown coordination.

use crate::error::Result;
use std::time::Duration;

use super::JobWatcher;

/// How long shutdown waits for sessions to acknowledge cancellation
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

impl JobWatcher {
    /// Gracefully shut down the watcher
    ///
    /// 1. Stops accepting new sessions
    /// 2. Cancels every session; responses still in flight are discarded
    /// 3. Waits for the session tasks to end, up to a timeout
    ///
    /// Each cancelled session still publishes its `SessionEnded` update.
    /// Calling this more than once is harmless.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Initiating graceful shutdown");

        self.accepting_new
            .store(false, std::sync::atomic::Ordering::SeqCst);

        let entries: Vec<_> = {
            let mut sessions = self.sessions.lock().await;
            sessions.drain().map(|(_, entry)| entry).collect()
        };
        tracing::debug!(session_count = entries.len(), "cancelling poll sessions");

        for entry in &entries {
            entry.handle.cancel();
        }

        let joins = futures::future::join_all(entries.into_iter().map(|entry| entry.handle.join()));
        match tokio::time::timeout(SHUTDOWN_TIMEOUT, joins).await {
            Ok(outcomes) => {
                tracing::info!(sessions = outcomes.len(), "All poll sessions stopped");
            }
            Err(_) => {
                tracing::warn!("Timeout waiting for poll sessions to stop, proceeding with shutdown");
            }
        }

        tracing::info!("Graceful shutdown complete");
        Ok(())
    }

    /// Whether [`JobWatcher::shutdown`] has been called
    pub fn is_shut_down(&self) -> bool {
        !self.accepting_new.load(std::sync::atomic::Ordering::SeqCst)
    }
}
