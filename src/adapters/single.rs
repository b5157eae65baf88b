//! Single image task status.

use super::{
    JobKindAdapter, RawArtifact, clamp_progress, parse_body, parse_job_error, parse_timestamp,
    path_segment, task_state,
};
use crate::error::StatusError;
use crate::types::{JobError, JobId, JobKind, JobState, StatusPayload};
use serde::Deserialize;
use serde_json::Value;

/// Adapter for `GET processing/status/{taskId}`
#[derive(Clone, Copy, Debug, Default)]
pub struct SingleTaskAdapter;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTaskStatus {
    status: String,
    #[serde(default)]
    progress: Option<f64>,
    #[serde(default)]
    created_at: Option<Value>,
    #[serde(default)]
    completed_at: Option<Value>,
    #[serde(default)]
    result: Option<RawTaskResult>,
    #[serde(default)]
    error: Option<Value>,
}

/// Either a list of artifacts or one inline artifact
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTaskResult {
    #[serde(default)]
    artifacts: Vec<RawArtifact>,
    #[serde(flatten)]
    inline: RawArtifact,
}

impl JobKindAdapter for SingleTaskAdapter {
    fn kind(&self) -> JobKind {
        JobKind::SingleTask
    }

    fn status_path(&self, id: &JobId) -> String {
        format!("processing/status/{}", path_segment(id))
    }

    fn decode(&self, body: &[u8]) -> Result<StatusPayload, StatusError> {
        let raw: RawTaskStatus = parse_body(body)?;
        let status = raw.status.trim().to_ascii_lowercase();
        let state = task_state(&status).ok_or(StatusError::UnknownStatus(raw.status))?;

        let artifacts = match raw.result {
            Some(result) if !result.artifacts.is_empty() => result
                .artifacts
                .into_iter()
                .filter_map(RawArtifact::into_artifact)
                .collect(),
            Some(result) => result.inline.into_artifact().into_iter().collect(),
            None => Vec::new(),
        };

        let error = if state == JobState::Failed {
            parse_job_error(raw.error.as_ref(), &status)
                .or_else(|| Some(JobError::new(status.clone(), format!("task {}", status))))
        } else {
            None
        };

        Ok(StatusPayload {
            state,
            progress: clamp_progress(raw.progress),
            created_at: parse_timestamp(raw.created_at.as_ref()),
            completed_at: parse_timestamp(raw.completed_at.as_ref()),
            artifacts,
            error,
            batch: None,
        })
    }

    fn archive_path(&self, id: &JobId) -> Option<String> {
        Some(format!(
            "processing/result/{}/download?format=zip",
            path_segment(id)
        ))
    }
}
