//! Job watcher: the entry point for polling remote jobs.
//!
//! [`JobWatcher`] binds one poll session to each watched job id and wires the
//! status client, the job kind adapter and the reconciler together:
//! - [`session`] - the [`PollDriver`](crate::scheduler::PollDriver) run by each session
//! - [`lifecycle`] - shutdown coordination
//!
//! Updates reach callers three ways: the broadcast channel from
//! [`JobWatcher::subscribe`], the optional [`JobObserver`], and a per-job
//! `watch` channel holding the latest snapshot.

mod lifecycle;
mod session;

use crate::adapters::adapter_for;
use crate::client::{CredentialProvider, StatusClient};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::reconciler::should_continue_polling;
use crate::scheduler::{PollHandle, PollScheduler};
use crate::types::{Job, JobId, JobKind, JobUpdate, SessionOutcome};
use session::{JobSession, Notifier, SessionParams};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, broadcast, watch};

/// Receives every update synchronously on the session task
///
/// Implementations must not block; hand heavy work off to another task.
pub trait JobObserver: Send + Sync {
    /// Called once per applied reduction and once when a session ends
    fn on_update(&self, update: &JobUpdate);
}

/// Registry entry for one watched job
struct WatchEntry {
    handle: PollHandle,
    snapshot: watch::Receiver<Job>,
    outcome: watch::Receiver<Option<SessionOutcome>>,
}

/// Watches remote jobs until they finish (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub struct JobWatcher {
    /// Configuration (wrapped in Arc for sharing across tasks)
    pub(crate) config: Arc<Config>,
    /// Status client shared by every session
    pub(crate) client: StatusClient,
    /// Credential source consulted on every poll
    pub(crate) credentials: Arc<dyn CredentialProvider>,
    /// Update broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: broadcast::Sender<JobUpdate>,
    /// Optional synchronous observer
    pub(crate) observer: Option<Arc<dyn JobObserver>>,
    /// Sessions by job id; at most one live session per id
    sessions: Arc<Mutex<HashMap<JobId, WatchEntry>>>,
    /// Whether new sessions are accepted (set to false during shutdown)
    pub(crate) accepting_new: Arc<AtomicBool>,
}

impl JobWatcher {
    /// Create a watcher
    ///
    /// # Errors
    /// Returns [`Error::Config`] if the configuration is invalid, or an error if
    /// the HTTP client cannot be built.
    pub fn new(config: Config, credentials: Arc<dyn CredentialProvider>) -> Result<Self> {
        config.validate()?;
        let client = StatusClient::new(&config.api)?;
        let (event_tx, _rx) = broadcast::channel(config.polling.update_buffer);

        Ok(Self {
            config: Arc::new(config),
            client,
            credentials,
            event_tx,
            observer: None,
            sessions: Arc::new(Mutex::new(HashMap::new())),
            accepting_new: Arc::new(AtomicBool::new(true)),
        })
    }

    /// Attach an observer that sees every update
    pub fn with_observer(mut self, observer: Arc<dyn JobObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Subscribe to updates of every watched job
    ///
    /// Slow receivers may observe `RecvError::Lagged`; the per-job snapshot from
    /// [`JobWatcher::subscribe_job`] never lags.
    pub fn subscribe(&self) -> broadcast::Receiver<JobUpdate> {
        self.event_tx.subscribe()
    }

    /// Current configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Start polling a job
    ///
    /// Returns a receiver that always holds the latest snapshot of the job.
    ///
    /// # Errors
    /// - [`Error::ShuttingDown`] after [`JobWatcher::shutdown`]
    /// - [`Error::AlreadyWatching`] if a live session exists for this id
    /// - [`Error::AlreadyTerminal`] if the job has nothing left to poll
    pub async fn watch(&self, job: Job) -> Result<watch::Receiver<Job>> {
        if !self.accepting_new.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }
        if !should_continue_polling(&job) {
            return Err(Error::AlreadyTerminal {
                id: job.id.to_string(),
                state: job.state.to_string(),
            });
        }

        let mut sessions = self.sessions.lock().await;
        if let Some(entry) = sessions.get(&job.id)
            && !entry.handle.is_finished()
        {
            return Err(Error::AlreadyWatching(job.id.to_string()));
        }

        let id = job.id.clone();
        let policy = self.config.polling.policy(job.kind);
        let (snapshot_tx, snapshot) = watch::channel(job.clone());
        let (outcome_tx, outcome) = watch::channel(None);

        let driver = JobSession::new(
            job.clone(),
            SessionParams {
                client: self.client.clone(),
                adapter: adapter_for(job.kind),
                credentials: Arc::clone(&self.credentials),
                max_misses: self.config.polling.max_consecutive_misses,
                notifier: Notifier {
                    event_tx: self.event_tx.clone(),
                    observer: self.observer.clone(),
                },
                snapshot_tx,
                outcome_tx,
            },
        );

        tracing::info!(
            job_id = %id,
            kind = %job.kind,
            interval_ms = policy.interval.as_millis() as u64,
            deadline_secs = policy.deadline.as_secs(),
            "watching job"
        );
        let deadline = tokio::time::Instant::now() + policy.deadline;
        let handle = PollScheduler::start(id.clone(), driver, policy.interval, deadline);

        sessions.insert(
            id,
            WatchEntry {
                handle,
                snapshot: snapshot.clone(),
                outcome,
            },
        );
        Ok(snapshot)
    }

    /// Start polling a freshly submitted job known only by id and kind
    pub async fn watch_id(
        &self,
        id: impl Into<JobId>,
        kind: JobKind,
    ) -> Result<watch::Receiver<Job>> {
        self.watch(Job::new(id, kind)).await
    }

    /// Stop polling a job and forget it
    ///
    /// A response still in flight is discarded. Returns how the session ended,
    /// which is `Cancelled` unless it had already finished on its own.
    ///
    /// # Errors
    /// Returns [`Error::NotWatching`] if the id is unknown.
    pub async fn unwatch(&self, id: &JobId) -> Result<SessionOutcome> {
        let entry = self
            .sessions
            .lock()
            .await
            .remove(id)
            .ok_or_else(|| Error::NotWatching(id.to_string()))?;

        tracing::debug!(job_id = %id, "unwatching job");
        entry.handle.cancel();
        Ok(entry.handle.join().await)
    }

    /// Latest snapshot of a watched job
    pub async fn snapshot(&self, id: &JobId) -> Option<Job> {
        let sessions = self.sessions.lock().await;
        sessions.get(id).map(|entry| entry.snapshot.borrow().clone())
    }

    /// Receiver holding the latest snapshot of a watched job
    pub async fn subscribe_job(&self, id: &JobId) -> Option<watch::Receiver<Job>> {
        let sessions = self.sessions.lock().await;
        sessions.get(id).map(|entry| entry.snapshot.clone())
    }

    /// Wait until the session of a job ends
    ///
    /// # Errors
    /// Returns [`Error::NotWatching`] if the id is unknown.
    pub async fn wait(&self, id: &JobId) -> Result<SessionOutcome> {
        let mut outcome = {
            let sessions = self.sessions.lock().await;
            sessions
                .get(id)
                .map(|entry| entry.outcome.clone())
                .ok_or_else(|| Error::NotWatching(id.to_string()))?
        };

        let finished = match outcome.wait_for(Option::is_some).await {
            Ok(value) => value.clone().unwrap_or(SessionOutcome::Cancelled),
            // Sender dropped without an outcome: the session task was torn down
            Err(_) => SessionOutcome::Cancelled,
        };
        Ok(finished)
    }

    /// Ids of jobs with a live session
    pub async fn active_jobs(&self) -> Vec<JobId> {
        let sessions = self.sessions.lock().await;
        sessions
            .iter()
            .filter(|(_, entry)| !entry.handle.is_finished())
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Remove entries whose session has ended, returning their final snapshots
    pub async fn prune_finished(&self) -> Vec<Job> {
        let mut sessions = self.sessions.lock().await;
        let finished: Vec<JobId> = sessions
            .iter()
            .filter(|(_, entry)| entry.handle.is_finished())
            .map(|(id, _)| id.clone())
            .collect();

        finished
            .iter()
            .filter_map(|id| sessions.remove(id))
            .map(|entry| entry.snapshot.borrow().clone())
            .collect()
    }
}
