//! Job reconciler: the state machine at the heart of polling.
//!
//! [`reduce`] is a pure function from the current [`Job`] snapshot and a freshly
//! decoded [`StatusPayload`] to the next snapshot. It owns every rule about what a
//! payload is allowed to change:
//!
//! - states only move forward (`Queued < Processing < terminal`); a payload
//!   reporting an earlier state is stale and discarded,
//! - terminal states absorb every later payload,
//! - batch counts are recomputed from the item list on every payload, and a
//!   running batch whose finished-item count drops is treated as stale,
//! - artifacts and `completed_at` appear in the same reduction that enters a
//!   terminal state.
//!
//! ```
//! use chrono::Utc;
//! use jobwatch::reconciler::{reduce, should_continue_polling};
//! use jobwatch::types::{Job, JobKind, JobState, StatusPayload};
//!
//! let job = Job::new("task-1", JobKind::SingleTask);
//! let reduction = reduce(&job, &StatusPayload::with_state(JobState::Completed), Utc::now());
//!
//! assert_eq!(reduction.job.state, JobState::Completed);
//! assert!(!should_continue_polling(&reduction.job));
//! ```

use crate::types::{BatchProgress, Job, JobError, JobKind, JobState, StatusPayload, Transition};
use chrono::{DateTime, Utc};

/// Why a payload left the job untouched
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Discard {
    /// Payload reports a state earlier than the current one
    Stale {
        /// State held by the job
        current: JobState,
        /// State in the payload
        reported: JobState,
    },
    /// Job already reached a terminal state
    Absorbed {
        /// Terminal state held by the job
        state: JobState,
    },
    /// Payload reports a state this job kind cannot enter this way
    InvalidForKind {
        /// State in the payload
        reported: JobState,
    },
    /// Batch payload reports fewer finished items than already seen
    Regressed {
        /// Finished items held by the job
        current_done: u32,
        /// Finished items in the payload
        reported_done: u32,
    },
}

/// Outcome of one reduction
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Change {
    /// Job unchanged
    Discarded(Discard),
    /// Job updated
    Applied(Transition),
}

/// Next snapshot plus what happened to produce it
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reduction {
    /// Snapshot after the reduction (a copy of the input when discarded)
    pub job: Job,
    /// What the reduction did
    pub change: Change,
}

impl Reduction {
    fn discarded(job: &Job, reason: Discard) -> Self {
        Self {
            job: job.clone(),
            change: Change::Discarded(reason),
        }
    }

    /// Transition applied, if any
    pub fn transition(&self) -> Option<Transition> {
        match self.change {
            Change::Applied(transition) => Some(transition),
            Change::Discarded(_) => None,
        }
    }

    /// Whether the reduction entered a terminal state
    pub fn is_terminal(&self) -> bool {
        self.transition().is_some_and(|t| t.is_terminal())
    }
}

/// Whether a session should keep polling this job
///
/// False exactly when the job is in a terminal state.
pub fn should_continue_polling(job: &Job) -> bool {
    !job.state.is_terminal()
}

/// Apply a status payload to a job
///
/// `now` is used as the completion time when the backend does not report one.
pub fn reduce(current: &Job, payload: &StatusPayload, now: DateTime<Utc>) -> Reduction {
    if current.state.is_terminal() {
        return Reduction::discarded(
            current,
            Discard::Absorbed {
                state: current.state,
            },
        );
    }

    let reported = payload.state;
    let invalid = match reported {
        JobState::Expired => true,
        JobState::PartiallyCompleted => current.kind != JobKind::BatchTask,
        _ => false,
    };
    if invalid {
        return Reduction::discarded(current, Discard::InvalidForKind { reported });
    }

    if reported.rank() < current.state.rank() {
        return Reduction::discarded(
            current,
            Discard::Stale {
                current: current.state,
                reported,
            },
        );
    }

    // Item counts of a running batch only grow; fewer finished items means an
    // older replica answered.
    if !reported.is_terminal()
        && let (Some(held), Some(incoming)) = (&current.batch, &payload.batch)
    {
        let current_done = held.counts.done();
        let reported_done = incoming.counts().done();
        if reported_done < current_done {
            return Reduction::discarded(
                current,
                Discard::Regressed {
                    current_done,
                    reported_done,
                },
            );
        }
    }

    let mut next = current.clone();
    next.state = reported;

    if let Some(created_at) = payload.created_at {
        next.created_at = next.created_at.min(created_at);
    }

    let reported_progress = if current.kind == JobKind::BatchTask {
        if let Some(batch) = &payload.batch {
            next.batch = Some(BatchProgress {
                counts: batch.counts(),
                sub_tasks: batch.sub_tasks.clone(),
            });
        }
        next.batch
            .as_ref()
            .map_or(current.progress, |b| b.counts.percent())
    } else {
        payload.progress.unwrap_or(current.progress)
    };
    next.progress = current.progress.max(reported_progress.min(100));

    if !reported.is_terminal() {
        let transition = if reported == current.state {
            Transition::Progress
        } else {
            Transition::Advanced {
                from: current.state,
                to: reported,
            }
        };
        return Reduction {
            job: next,
            change: Change::Applied(transition),
        };
    }

    next.completed_at = Some(payload.completed_at.unwrap_or(now));
    match reported {
        JobState::Completed | JobState::PartiallyCompleted => {
            next.artifacts = payload.artifacts.clone();
            if reported == JobState::Completed && current.kind != JobKind::BatchTask {
                next.progress = 100;
            }
        }
        JobState::Failed => {
            next.error = Some(
                payload
                    .error
                    .clone()
                    .unwrap_or_else(|| JobError::new("failed", "job failed")),
            );
        }
        _ => {}
    }

    Reduction {
        job: next,
        change: Change::Applied(Transition::Terminal {
            from: current.state,
            to: reported,
        }),
    }
}

/// Apply the synthetic deadline transition
///
/// Moves a non-terminal job to `Expired`; a terminal job is left untouched.
pub fn expire(current: &Job, now: DateTime<Utc>) -> Reduction {
    if current.state.is_terminal() {
        return Reduction::discarded(
            current,
            Discard::Absorbed {
                state: current.state,
            },
        );
    }

    let mut next = current.clone();
    next.state = JobState::Expired;
    next.completed_at = Some(now);
    Reduction {
        job: next,
        change: Change::Applied(Transition::Terminal {
            from: current.state,
            to: JobState::Expired,
        }),
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
