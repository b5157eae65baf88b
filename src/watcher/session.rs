//! Poll driver binding one job to the status client and the reconciler.

use crate::adapters::JobKindAdapter;
use crate::client::{CredentialProvider, StatusClient};
use crate::error::{ErrorClass, StatusError};
use crate::reconciler::{self, Change};
use crate::scheduler::PollDriver;
use crate::types::{Job, JobUpdate, SessionOutcome, StatusPayload, Transition};
use chrono::Utc;
use futures::FutureExt;
use futures::future::BoxFuture;
use std::ops::ControlFlow;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};

use super::JobObserver;

/// Fan-out of updates to the broadcast channel and the optional observer
#[derive(Clone)]
pub(crate) struct Notifier {
    pub(crate) event_tx: broadcast::Sender<JobUpdate>,
    pub(crate) observer: Option<Arc<dyn JobObserver>>,
}

impl Notifier {
    pub(crate) fn publish(&self, update: JobUpdate) {
        if let Some(observer) = &self.observer {
            observer.on_update(&update);
        }
        // send() returns Err if there are no receivers, which is fine - we just drop the update
        self.event_tx.send(update).ok();
    }
}

/// Everything a session needs besides the job itself
pub(crate) struct SessionParams {
    pub client: StatusClient,
    pub adapter: Arc<dyn JobKindAdapter>,
    pub credentials: Arc<dyn CredentialProvider>,
    pub max_misses: u32,
    pub notifier: Notifier,
    pub snapshot_tx: watch::Sender<Job>,
    pub outcome_tx: watch::Sender<Option<SessionOutcome>>,
}

/// Driver state owned by one session task
pub(crate) struct JobSession {
    job: Job,
    misses: u32,
    params: SessionParams,
}

impl JobSession {
    pub(crate) fn new(job: Job, params: SessionParams) -> Self {
        Self {
            job,
            misses: 0,
            params,
        }
    }

    fn commit(&mut self, job: Job, transition: Transition) {
        self.job = job;
        self.params.snapshot_tx.send_replace(self.job.clone());
        self.params.notifier.publish(JobUpdate::Changed {
            job: self.job.clone(),
            transition,
        });
    }

    fn miss(&mut self, error: &StatusError) -> ControlFlow<SessionOutcome> {
        self.misses += 1;
        if self.misses >= self.params.max_misses {
            tracing::error!(
                job_id = %self.job.id,
                misses = self.misses,
                error = %error,
                "too many consecutive failed polls, giving up"
            );
            return ControlFlow::Break(SessionOutcome::GaveUp {
                misses: self.misses,
                last_error: error.to_string(),
            });
        }
        tracing::warn!(
            job_id = %self.job.id,
            misses = self.misses,
            error = %error,
            "status poll failed, retrying on next tick"
        );
        ControlFlow::Continue(())
    }
}

impl PollDriver for JobSession {
    type Response = Result<StatusPayload, StatusError>;

    fn request(&mut self) -> BoxFuture<'static, Self::Response> {
        let id = self.job.id.clone();
        let client = self.params.client.clone();
        let adapter = Arc::clone(&self.params.adapter);
        let credentials = Arc::clone(&self.params.credentials);

        tracing::debug!(job_id = %id, "polling status");
        async move {
            let credential = credentials
                .credential()
                .await
                .ok_or(StatusError::Unauthorized { status: None })?;
            client.fetch_status(&id, adapter.as_ref(), &credential).await
        }
        .boxed()
    }

    fn apply(&mut self, response: Self::Response) -> ControlFlow<SessionOutcome> {
        let payload = match response {
            Ok(payload) => payload,
            Err(e) => {
                return match e.class() {
                    ErrorClass::Unauthorized => {
                        tracing::warn!(job_id = %self.job.id, error = %e, "credential rejected, stopping");
                        ControlFlow::Break(SessionOutcome::AuthorizationExpired)
                    }
                    ErrorClass::Transient | ErrorClass::Malformed => self.miss(&e),
                };
            }
        };

        self.misses = 0;
        let reduction = reconciler::reduce(&self.job, &payload, Utc::now());
        match reduction.change {
            Change::Discarded(reason) => {
                tracing::debug!(job_id = %self.job.id, ?reason, "status payload discarded");
            }
            Change::Applied(transition) => {
                tracing::debug!(
                    job_id = %self.job.id,
                    state = %reduction.job.state,
                    progress = reduction.job.progress,
                    "job updated"
                );
                self.commit(reduction.job, transition);
            }
        }

        if reconciler::should_continue_polling(&self.job) {
            ControlFlow::Continue(())
        } else {
            ControlFlow::Break(SessionOutcome::Finished {
                state: self.job.state,
            })
        }
    }

    fn expire(&mut self) -> SessionOutcome {
        let reduction = reconciler::expire(&self.job, Utc::now());
        if let Change::Applied(transition) = reduction.change {
            tracing::warn!(job_id = %self.job.id, "deadline elapsed before the job finished");
            self.commit(reduction.job, transition);
        }
        SessionOutcome::Expired
    }

    fn finished(&mut self, outcome: &SessionOutcome) {
        tracing::info!(job_id = %self.job.id, ?outcome, "stopped watching job");
        self.params.outcome_tx.send_replace(Some(outcome.clone()));
        self.params.notifier.publish(JobUpdate::SessionEnded {
            id: self.job.id.clone(),
            outcome: outcome.clone(),
        });
    }
}
