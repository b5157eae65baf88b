//! Per-kind adapters for the three status endpoints.
//!
//! Each job kind talks to a different endpoint with a different payload shape.
//! A [`JobKindAdapter`] hides those differences behind one interface so a single
//! polling engine can serve every kind:
//! - [`single`] - one image task (`processing/status/{id}`)
//! - [`batch`] - batch of image tasks (`batch/status/{id}`)
//! - [`payment`] - payment order settlement (`payment/orders/{id}`)

mod batch;
mod payment;
mod single;

pub use batch::BatchTaskAdapter;
pub use payment::PaymentOrderAdapter;
pub use single::SingleTaskAdapter;

use crate::error::StatusError;
use crate::types::{Artifact, JobError, JobId, JobKind, JobState, StatusPayload};
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

/// Strategy object mapping one job kind's wire format onto canonical terms
pub trait JobKindAdapter: Send + Sync + std::fmt::Debug {
    /// Kind served by this adapter
    fn kind(&self) -> JobKind;

    /// Status endpoint path, relative to the API base URL
    fn status_path(&self, id: &JobId) -> String;

    /// Decode a status response body
    fn decode(&self, body: &[u8]) -> Result<StatusPayload, StatusError>;

    /// Path of the server-side archive of all results, if the backend offers one
    fn archive_path(&self, _id: &JobId) -> Option<String> {
        None
    }
}

/// Adapter for a job kind
pub fn adapter_for(kind: JobKind) -> Arc<dyn JobKindAdapter> {
    match kind {
        JobKind::SingleTask => Arc::new(SingleTaskAdapter),
        JobKind::BatchTask => Arc::new(BatchTaskAdapter),
        JobKind::PaymentOrder => Arc::new(PaymentOrderAdapter),
    }
}

/// Percent-encode an id for use as a path segment
pub(crate) fn path_segment(id: &JobId) -> String {
    urlencoding::encode(id.as_str()).into_owned()
}

/// Parse a body, unwrapping a `{ "data": {...} }` envelope when present
pub(crate) fn parse_body<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T, StatusError> {
    let value: Value = serde_json::from_slice(body)?;
    let value = match value {
        Value::Object(mut map) if !map.contains_key("status") && map.contains_key("data") => {
            map.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    };
    Ok(serde_json::from_value(value)?)
}

/// Map an image task status string onto a canonical state
pub(crate) fn task_state(status: &str) -> Option<JobState> {
    match status.trim().to_ascii_lowercase().as_str() {
        "pending" | "queued" | "waiting" => Some(JobState::Queued),
        "processing" | "running" | "in_progress" | "started" => Some(JobState::Processing),
        "completed" | "complete" | "success" | "succeeded" | "done" => Some(JobState::Completed),
        "failed" | "error" | "cancelled" | "canceled" => Some(JobState::Failed),
        _ => None,
    }
}

/// Clamp a backend percentage to 0..=100
pub(crate) fn clamp_progress(progress: Option<f64>) -> Option<u8> {
    progress
        .filter(|p| p.is_finite())
        .map(|p| p.round().clamp(0.0, 100.0) as u8)
}

/// Accept RFC 3339 strings or epoch milliseconds
pub(crate) fn parse_timestamp(value: Option<&Value>) -> Option<DateTime<Utc>> {
    match value? {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        _ => None,
    }
}

/// Accept `{ "code", "message" }` objects or bare strings
pub(crate) fn parse_job_error(value: Option<&Value>, default_code: &str) -> Option<JobError> {
    match value? {
        Value::Null => None,
        Value::String(message) => Some(JobError::new(default_code, message.clone())),
        Value::Object(map) => {
            let message = map
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("job failed")
                .to_string();
            let code = match map.get("code") {
                Some(Value::String(code)) => code.clone(),
                Some(Value::Number(code)) => code.to_string(),
                _ => default_code.to_string(),
            };
            Some(JobError::new(code, message))
        }
        other => Some(JobError::new(default_code, other.to_string())),
    }
}

/// Artifact descriptor as the backend sends it
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RawArtifact {
    #[serde(default, alias = "resultUrl", alias = "downloadUrl")]
    pub url: Option<String>,
    #[serde(default, alias = "fileName")]
    pub filename: Option<String>,
    #[serde(default, alias = "fileSize")]
    pub size: Option<u64>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
}

impl RawArtifact {
    pub(crate) fn into_artifact(self) -> Option<Artifact> {
        let url = self.url.filter(|u| !u.is_empty())?;
        Some(Artifact {
            url,
            filename: self.filename.filter(|f| !f.is_empty()),
            size: self.size,
            width: self.width,
            height: self.height,
        })
    }
}
