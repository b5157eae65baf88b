//! Batch task status.

use super::{
    JobKindAdapter, parse_body, parse_job_error, parse_timestamp, path_segment, task_state,
};
use crate::error::StatusError;
use crate::types::{
    Artifact, BatchPayload, JobError, JobId, JobKind, JobState, StatusPayload, SubTask,
};
use serde::Deserialize;
use serde_json::Value;

/// Adapter for `GET batch/status/{batchId}`
///
/// Batch-level progress fields from the backend are ignored; the reconciler
/// derives progress from the item list.
#[derive(Clone, Copy, Debug, Default)]
pub struct BatchTaskAdapter;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawBatchStatus {
    status: String,
    #[serde(default)]
    total_images: u32,
    #[serde(default)]
    completed_images: u32,
    #[serde(default)]
    failed_images: u32,
    #[serde(default)]
    created_at: Option<Value>,
    #[serde(default)]
    completed_at: Option<Value>,
    #[serde(default)]
    tasks: Vec<RawBatchItem>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawBatchItem {
    #[serde(alias = "id")]
    task_id: String,
    #[serde(default)]
    filename: String,
    status: String,
    #[serde(default)]
    result_url: Option<String>,
    #[serde(default)]
    error_message: Option<String>,
}

fn batch_state(status: &str) -> Option<JobState> {
    match status {
        "partial" | "partially_completed" | "partial_success" => Some(JobState::PartiallyCompleted),
        other => task_state(other),
    }
}

impl RawBatchItem {
    fn into_sub_task(self) -> Result<SubTask, StatusError> {
        let state = task_state(&self.status).ok_or_else(|| {
            StatusError::Malformed(format!(
                "item {} has unknown status {:?}",
                self.task_id, self.status
            ))
        })?;
        let artifact = self
            .result_url
            .filter(|url| !url.is_empty() && state == JobState::Completed)
            .map(Artifact::from_url);
        let error = self.error_message.filter(|_| state == JobState::Failed);
        Ok(SubTask {
            task_id: self.task_id,
            filename: self.filename,
            state,
            artifact,
            error,
        })
    }
}

impl JobKindAdapter for BatchTaskAdapter {
    fn kind(&self) -> JobKind {
        JobKind::BatchTask
    }

    fn status_path(&self, id: &JobId) -> String {
        format!("batch/status/{}", path_segment(id))
    }

    fn decode(&self, body: &[u8]) -> Result<StatusPayload, StatusError> {
        let raw: RawBatchStatus = parse_body(body)?;
        let status = raw.status.trim().to_ascii_lowercase();
        let state = batch_state(&status).ok_or(StatusError::UnknownStatus(raw.status))?;

        let sub_tasks = raw
            .tasks
            .into_iter()
            .map(RawBatchItem::into_sub_task)
            .collect::<Result<Vec<_>, _>>()?;

        let artifacts = sub_tasks
            .iter()
            .filter_map(|t| t.artifact.clone())
            .collect();

        let error = if state == JobState::Failed {
            parse_job_error(raw.error.as_ref(), &status).or_else(|| {
                Some(JobError::new(
                    "batch_failed",
                    format!("all {} images failed", raw.total_images.max(sub_tasks.len() as u32)),
                ))
            })
        } else {
            None
        };

        Ok(StatusPayload {
            state,
            progress: None,
            created_at: parse_timestamp(raw.created_at.as_ref()),
            completed_at: parse_timestamp(raw.completed_at.as_ref()),
            artifacts,
            error,
            batch: Some(BatchPayload {
                total_images: raw.total_images,
                completed_images: raw.completed_images,
                failed_images: raw.failed_images,
                sub_tasks,
            }),
        })
    }

    fn archive_path(&self, id: &JobId) -> Option<String> {
        Some(format!("batch/{}/download", path_segment(id)))
    }
}
