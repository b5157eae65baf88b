//! Poll scheduler: one repeating timer and one deadline per session.
//!
//! [`PollScheduler::start`] spawns a session task that drives a [`PollDriver`]:
//!
//! 1. polls once immediately, then on a fixed cadence (`tokio::time::interval`
//!    with [`MissedTickBehavior::Skip`], so cadence does not drift with request
//!    latency),
//! 2. keeps at most one request in flight; ticks that fire while a request is
//!    outstanding are skipped, never queued,
//! 3. stops when the driver says so, when the deadline elapses, or when the
//!    returned [`PollHandle`] is cancelled or dropped.
//!
//! A response that is ready in the same loop iteration as the deadline is
//! applied first, so a terminal response always beats the deadline.
//!
//! The driver's `request` future is the only suspension point; `apply` runs
//! synchronously on the session task.

use crate::types::{JobId, SessionOutcome};
use futures::future::BoxFuture;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// What a poll session does on each tick
pub trait PollDriver: Send + 'static {
    /// Result of one request
    type Response: Send + 'static;

    /// Start one request
    ///
    /// The future must own everything it needs; it may be dropped unfinished
    /// when the session is cancelled or expires.
    fn request(&mut self) -> BoxFuture<'static, Self::Response>;

    /// Apply a response; `Break` ends the session with the given outcome
    fn apply(&mut self, response: Self::Response) -> ControlFlow<SessionOutcome>;

    /// Deadline elapsed before the session finished
    fn expire(&mut self) -> SessionOutcome;

    /// Called once with the final outcome, however the session ended
    fn finished(&mut self, _outcome: &SessionOutcome) {}
}

/// Counters describing a running or finished session
#[derive(Debug, Default)]
pub struct SessionStats {
    requests: AtomicU64,
    skipped_ticks: AtomicU64,
    in_flight: AtomicBool,
}

impl SessionStats {
    /// Requests issued so far
    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    /// Ticks skipped because a request was still outstanding
    pub fn skipped_ticks(&self) -> u64 {
        self.skipped_ticks.load(Ordering::Relaxed)
    }

    /// Whether a request is outstanding right now
    pub fn in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Relaxed)
    }
}

/// Owned handle to a running poll session
///
/// One session, one handle, one teardown: dropping the handle cancels the
/// session. Cancelling is idempotent and harmless after the session ended.
#[derive(Debug)]
pub struct PollHandle {
    id: JobId,
    token: CancellationToken,
    task: Option<tokio::task::JoinHandle<SessionOutcome>>,
    stats: Arc<SessionStats>,
}

impl PollHandle {
    /// Job this session watches
    pub fn id(&self) -> &JobId {
        &self.id
    }

    /// Stop the session
    ///
    /// Future ticks are not issued and a response still in flight is discarded.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Whether the session task has ended
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(|task| task.is_finished())
    }

    /// Live counters of the session
    pub fn stats(&self) -> Arc<SessionStats> {
        Arc::clone(&self.stats)
    }

    /// Wait for the session to end and return its outcome
    pub async fn join(mut self) -> SessionOutcome {
        let Some(task) = self.task.take() else {
            return SessionOutcome::Cancelled;
        };
        match task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(job_id = %self.id, error = %e, "poll session task failed");
                SessionOutcome::Cancelled
            }
        }
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Spawns poll sessions on the current tokio runtime
#[derive(Clone, Copy, Debug, Default)]
pub struct PollScheduler;

impl PollScheduler {
    /// Start a poll session
    ///
    /// The first request is issued as soon as the session task runs; later ones
    /// follow every `interval`. At `deadline` the session ends with the driver's
    /// `expire` outcome unless it already ended.
    pub fn start<D: PollDriver>(
        id: JobId,
        driver: D,
        interval: Duration,
        deadline: Instant,
    ) -> PollHandle {
        let token = CancellationToken::new();
        let stats = Arc::new(SessionStats::default());

        let span = tracing::info_span!("poll_session", job_id = %id);
        let task = tokio::spawn(
            run_session(driver, interval, deadline, token.clone(), Arc::clone(&stats))
                .instrument(span),
        );

        PollHandle {
            id,
            token,
            task: Some(task),
            stats,
        }
    }
}

async fn run_session<D: PollDriver>(
    mut driver: D,
    interval: Duration,
    deadline: Instant,
    token: CancellationToken,
    stats: Arc<SessionStats>,
) -> SessionOutcome {
    tracing::debug!(interval_ms = interval.as_millis() as u64, "poll session started");

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let expiry = tokio::time::sleep_until(deadline);
    tokio::pin!(expiry);

    let mut in_flight: Option<BoxFuture<'static, D::Response>> = None;

    let outcome = loop {
        tokio::select! {
            biased;

            _ = token.cancelled() => {
                break SessionOutcome::Cancelled;
            }

            response = async {
                match in_flight.as_mut() {
                    Some(request) => request.await,
                    None => std::future::pending().await,
                }
            }, if in_flight.is_some() => {
                in_flight = None;
                stats.in_flight.store(false, Ordering::Relaxed);

                if token.is_cancelled() {
                    tracing::debug!("discarding response received after cancellation");
                    break SessionOutcome::Cancelled;
                }
                if let ControlFlow::Break(outcome) = driver.apply(response) {
                    break outcome;
                }
            }

            _ = &mut expiry => {
                if in_flight.take().is_some() {
                    tracing::debug!("deadline elapsed with a request in flight; dropping it");
                }
                stats.in_flight.store(false, Ordering::Relaxed);
                break driver.expire();
            }

            _ = ticker.tick() => {
                if in_flight.is_some() {
                    stats.skipped_ticks.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!("previous poll still in flight, skipping tick");
                } else {
                    stats.requests.fetch_add(1, Ordering::Relaxed);
                    stats.in_flight.store(true, Ordering::Relaxed);
                    in_flight = Some(driver.request());
                }
            }
        }
    };

    driver.finished(&outcome);
    tracing::debug!(
        ?outcome,
        requests = stats.requests(),
        skipped_ticks = stats.skipped_ticks(),
        "poll session ended"
    );
    outcome
}
