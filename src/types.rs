//! Core types for jobwatch

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Opaque identifier assigned by the backend when a job is created
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Create a new JobId
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the inner identifier
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for JobId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for JobId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kind of remote job; selects the status endpoint and payload shape
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// One image sent through one processing method
    SingleTask,
    /// Several images processed under one batch id
    BatchTask,
    /// Credit purchase awaiting payment settlement
    PaymentOrder,
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            JobKind::SingleTask => "single_task",
            JobKind::BatchTask => "batch_task",
            JobKind::PaymentOrder => "payment_order",
        };
        f.write_str(name)
    }
}

/// Canonical job state
///
/// States are partially ordered: `Queued < Processing < terminal`, where the
/// terminal states are mutually incomparable and absorbing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Accepted by the backend, not started
    Queued,
    /// Work in progress
    Processing,
    /// Batch finished with at least one success and at least one failure
    PartiallyCompleted,
    /// Finished successfully
    Completed,
    /// Finished without a usable result
    Failed,
    /// Client stopped watching because the session deadline elapsed
    Expired,
}

impl JobState {
    /// Position in the state order. Terminal states share the top rank.
    pub fn rank(&self) -> u8 {
        match self {
            JobState::Queued => 0,
            JobState::Processing => 1,
            JobState::PartiallyCompleted
            | JobState::Completed
            | JobState::Failed
            | JobState::Expired => 2,
        }
    }

    /// Whether no further transition can happen from this state
    pub fn is_terminal(&self) -> bool {
        self.rank() == 2
    }

    /// Whether this terminal state carries downloadable artifacts
    pub fn is_success(&self) -> bool {
        matches!(self, JobState::Completed | JobState::PartiallyCompleted)
    }

    /// Compare two states under the partial order
    ///
    /// Returns `None` for two distinct terminal states.
    pub fn partial_order(&self, other: &JobState) -> Option<Ordering> {
        if self == other {
            return Some(Ordering::Equal);
        }
        match self.rank().cmp(&other.rank()) {
            Ordering::Equal => None,
            ordering => Some(ordering),
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            JobState::Queued => "queued",
            JobState::Processing => "processing",
            JobState::PartiallyCompleted => "partially_completed",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Expired => "expired",
        };
        f.write_str(name)
    }
}

/// Downloadable result file descriptor
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Absolute or base-relative URL of the file
    pub url: String,
    /// Filename declared by the backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    /// Size in bytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Image width in pixels
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    /// Image height in pixels
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

impl Artifact {
    /// Artifact with only a URL
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            filename: None,
            size: None,
            width: None,
            height: None,
        }
    }
}

/// Structured job-level failure reported by the backend
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    /// Machine-readable code
    pub code: String,
    /// Human-readable message
    pub message: String,
}

impl JobError {
    /// Create a new JobError
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// One item of a batch job
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubTask {
    /// Backend id of the item
    pub task_id: String,
    /// Original upload filename
    pub filename: String,
    /// Canonical state of the item
    pub state: JobState,
    /// Result of the item, once it completed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<Artifact>,
    /// Failure message of the item
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregate counts of a batch, always derived from its items
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchCounts {
    /// Number of items in the batch
    pub total: u32,
    /// Items that finished successfully
    pub completed: u32,
    /// Items that failed
    pub failed: u32,
}

impl BatchCounts {
    /// Count finished and failed items of a batch
    pub fn from_sub_tasks(sub_tasks: &[SubTask]) -> Self {
        let completed = sub_tasks
            .iter()
            .filter(|t| t.state == JobState::Completed)
            .count() as u32;
        let failed = sub_tasks
            .iter()
            .filter(|t| t.state == JobState::Failed)
            .count() as u32;
        Self {
            total: sub_tasks.len() as u32,
            completed,
            failed,
        }
    }

    /// Items that reached an end state
    pub fn done(&self) -> u32 {
        self.completed.saturating_add(self.failed)
    }

    /// Percentage of items that reached an end state, rounded half up
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 0;
        }
        let done = u64::from(self.done()).min(u64::from(self.total));
        let total = u64::from(self.total);
        ((done * 100 + total / 2) / total) as u8
    }
}

/// Batch-specific part of a job snapshot
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchProgress {
    /// Per-item records in backend order
    pub sub_tasks: Vec<SubTask>,
    /// Counts derived from `sub_tasks` during the last reduction
    pub counts: BatchCounts,
}

/// Client-side snapshot of a remote job
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    /// Backend-assigned id
    pub id: JobId,
    /// Job kind
    pub kind: JobKind,
    /// Canonical state
    pub state: JobState,
    /// Progress percentage (0-100)
    pub progress: u8,
    /// When the job was created
    pub created_at: DateTime<Utc>,
    /// When the job first reached a terminal state
    pub completed_at: Option<DateTime<Utc>>,
    /// Result files, populated together with a successful terminal state
    pub artifacts: Vec<Artifact>,
    /// Failure details, only set when `state` is `Failed`
    pub error: Option<JobError>,
    /// Batch details, only for batch jobs
    pub batch: Option<BatchProgress>,
}

impl Job {
    /// A freshly submitted job in the `Queued` state
    pub fn new(id: impl Into<JobId>, kind: JobKind) -> Self {
        Self {
            id: id.into(),
            kind,
            state: JobState::Queued,
            progress: 0,
            created_at: Utc::now(),
            completed_at: None,
            artifacts: Vec::new(),
            error: None,
            batch: (kind == JobKind::BatchTask).then(BatchProgress::default),
        }
    }

    /// Whether the job reached an absorbing state
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

/// Batch part of a normalized status payload
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BatchPayload {
    /// Item count reported by the backend
    pub total_images: u32,
    /// Completed count reported by the backend
    pub completed_images: u32,
    /// Failed count reported by the backend
    pub failed_images: u32,
    /// Per-item records
    pub sub_tasks: Vec<SubTask>,
}

impl BatchPayload {
    /// Derive counts from the item list, using the aggregate counters only when
    /// the backend sent no items
    ///
    /// The declared batch size still bounds `total` from below so items the
    /// backend has not listed yet count as pending.
    pub fn counts(&self) -> BatchCounts {
        if self.sub_tasks.is_empty() {
            BatchCounts {
                total: self.total_images,
                completed: self.completed_images.min(self.total_images),
                failed: self
                    .failed_images
                    .min(self.total_images.saturating_sub(self.completed_images)),
            }
        } else {
            let mut counts = BatchCounts::from_sub_tasks(&self.sub_tasks);
            counts.total = counts.total.max(self.total_images);
            counts
        }
    }
}

/// Status payload after the kind adapter mapped it onto canonical terms
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatusPayload {
    /// State reported by the backend
    pub state: JobState,
    /// Progress reported by the backend, if any
    pub progress: Option<u8>,
    /// Creation time reported by the backend
    pub created_at: Option<DateTime<Utc>>,
    /// Completion time reported by the backend
    pub completed_at: Option<DateTime<Utc>>,
    /// Result files
    pub artifacts: Vec<Artifact>,
    /// Failure details
    pub error: Option<JobError>,
    /// Batch details
    pub batch: Option<BatchPayload>,
}

impl StatusPayload {
    /// Payload carrying only a state
    pub fn with_state(state: JobState) -> Self {
        Self {
            state,
            progress: None,
            created_at: None,
            completed_at: None,
            artifacts: Vec::new(),
            error: None,
            batch: None,
        }
    }
}

/// Why a poll session ended
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionOutcome {
    /// The job reached a terminal state reported by the backend
    Finished {
        /// Final state
        state: JobState,
    },
    /// The deadline elapsed before the job finished
    Expired,
    /// The session was cancelled by its owner
    Cancelled,
    /// The backend rejected the credential
    AuthorizationExpired,
    /// Too many consecutive polls produced no usable payload
    GaveUp {
        /// Consecutive misses when the session stopped
        misses: u32,
        /// Last miss reason
        last_error: String,
    },
}

/// What a reduction did to a job
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Transition {
    /// State unchanged; progress or batch details may have moved
    Progress,
    /// Moved forward to a non-terminal state
    Advanced {
        /// Previous state
        from: JobState,
        /// New state
        to: JobState,
    },
    /// Entered a terminal state
    Terminal {
        /// Previous state
        from: JobState,
        /// Terminal state
        to: JobState,
    },
}

impl Transition {
    /// Whether the update marks the end of the job
    pub fn is_terminal(&self) -> bool {
        matches!(self, Transition::Terminal { .. })
    }
}

/// Change notification delivered to subscribers
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobUpdate {
    /// A reduction was applied to a job
    Changed {
        /// Snapshot after the reduction
        job: Job,
        /// What changed
        transition: Transition,
    },
    /// A poll session ended
    SessionEnded {
        /// Job id
        id: JobId,
        /// Why it ended
        outcome: SessionOutcome,
    },
}

impl JobUpdate {
    /// Job id this update concerns
    pub fn job_id(&self) -> &JobId {
        match self {
            JobUpdate::Changed { job, .. } => &job.id,
            JobUpdate::SessionEnded { id, .. } => id,
        }
    }
}
