//! # jobwatch
//!
//! Client-side status reconciler for remote image-processing jobs.
//!
//! Hand a job id to a [`JobWatcher`] and it polls the backend until the job
//! finishes, fails, loses authorization or runs out of time, publishing every
//! change as a [`JobUpdate`]. Once a job succeeded, a [`Materializer`] fetches
//! and saves its results.
//!
//! ## Design Philosophy
//!
//! jobwatch is designed to be:
//! - **Library-first** - No CLI or UI, purely a Rust crate for embedding
//! - **Event-driven** - Consumers subscribe to updates instead of polling snapshots
//! - **Monotonic** - Job state only moves forward, whatever order responses arrive in
//! - **Sensible defaults** - Works out of the box with zero configuration
//!
//! ## Quick Start
//!
//! ```no_run
//! use jobwatch::{Config, JobKind, JobUpdate, JobWatcher, Materializer};
//! use jobwatch::client::{Credential, StaticCredential};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let credentials = Arc::new(StaticCredential(Credential::bearer("token")));
//!     let watcher = JobWatcher::new(config, credentials)?;
//!
//!     let mut updates = watcher.subscribe();
//!     watcher.watch_id("task-123", JobKind::SingleTask).await?;
//!
//!     while let Ok(update) = updates.recv().await {
//!         if let JobUpdate::Changed { job, transition } = update {
//!             println!("{} is {} ({}%)", job.id, job.state, job.progress);
//!             if transition.is_terminal() && job.state.is_success() {
//!                 let materializer = Materializer::from_watcher(&watcher);
//!                 let dir = materializer.download_dir().to_path_buf();
//!                 for saved in materializer.save_all(&job, &dir).await {
//!                     println!("saved {:?}", saved?);
//!                 }
//!                 break;
//!             }
//!         }
//!     }
//!
//!     watcher.shutdown().await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Per-kind status endpoint adapters
pub mod adapters;
/// HTTP status client and credentials
pub mod client;
/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// Result download and saving
pub mod materializer;
/// Pure state reducer for status payloads
pub mod reconciler;
/// Retry logic with exponential backoff
pub mod retry;
/// Poll sessions with cadence, deadline and cancellation
pub mod scheduler;
/// Core types and updates
pub mod types;
/// Filename and path helpers
pub mod utils;
/// Job watcher facade
pub mod watcher;

// Re-export commonly used types
pub use client::{Credential, CredentialProvider, SharedCredential, StaticCredential};
pub use config::{Config, FileCollisionAction, PollPolicy};
pub use error::{Error, ErrorClass, Result, StatusError};
pub use materializer::{ArtifactSelector, DownloadedFile, Materializer};
pub use scheduler::{PollDriver, PollHandle, PollScheduler};
pub use types::{
    Artifact, BatchCounts, Job, JobError, JobId, JobKind, JobState, JobUpdate, SessionOutcome,
    SubTask, Transition,
};
pub use watcher::{JobObserver, JobWatcher};

/// Helper function to run the watcher until a termination signal arrives.
///
/// Waits for a termination signal and then calls the watcher's `shutdown()` method.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use jobwatch::{Config, JobWatcher, run_with_shutdown};
/// use jobwatch::client::{Credential, StaticCredential};
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let credentials = Arc::new(StaticCredential(Credential::bearer("token")));
///     let watcher = JobWatcher::new(Config::default(), credentials)?;
///
///     // Run with automatic signal handling
///     run_with_shutdown(watcher).await?;
///
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(watcher: JobWatcher) -> Result<()> {
    wait_for_signal().await;
    watcher.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Signal registration may fail in restricted environments (containers, tests)
    match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("Received SIGTERM signal"),
                _ = sigint.recv() => tracing::info!("Received SIGINT signal (Ctrl+C)"),
            }
        }
        (Err(e), Ok(mut sigint)) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            sigint.recv().await;
            tracing::info!("Received SIGINT signal (Ctrl+C)");
        }
        (Ok(mut sigterm), Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            sigterm.recv().await;
            tracing::info!("Received SIGTERM signal");
        }
        (Err(e), Err(_)) => {
            tracing::error!(error = %e, "Could not register any signal handlers, using ctrl_c fallback");
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received Ctrl+C signal"),
        Err(e) => tracing::error!(error = %e, "Failed to listen for Ctrl+C signal"),
    }
}
