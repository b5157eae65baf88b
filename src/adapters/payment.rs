//! Payment order settlement status.

use super::{JobKindAdapter, parse_body, parse_timestamp, path_segment};
use crate::error::StatusError;
use crate::types::{JobError, JobId, JobKind, JobState, StatusPayload};
use serde::Deserialize;
use serde_json::Value;

/// Adapter for `GET payment/orders/{orderId}`
///
/// Orders carry no artifacts; `Completed` means the order was paid.
#[derive(Clone, Copy, Debug, Default)]
pub struct PaymentOrderAdapter;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawOrder {
    status: String,
    #[serde(default)]
    created_at: Option<Value>,
    #[serde(default, alias = "completedAt")]
    paid_at: Option<Value>,
}

fn order_state(status: &str) -> Option<JobState> {
    match status {
        "created" | "unpaid" | "queued" => Some(JobState::Queued),
        "pending" | "processing" => Some(JobState::Processing),
        "paid" | "completed" | "success" => Some(JobState::Completed),
        "failed" | "cancelled" | "canceled" | "expired" | "refunded" => Some(JobState::Failed),
        _ => None,
    }
}

impl JobKindAdapter for PaymentOrderAdapter {
    fn kind(&self) -> JobKind {
        JobKind::PaymentOrder
    }

    fn status_path(&self, id: &JobId) -> String {
        format!("payment/orders/{}", path_segment(id))
    }

    fn decode(&self, body: &[u8]) -> Result<StatusPayload, StatusError> {
        let raw: RawOrder = parse_body(body)?;
        let status = raw.status.trim().to_ascii_lowercase();
        let state = order_state(&status).ok_or(StatusError::UnknownStatus(raw.status))?;

        let error = (state == JobState::Failed)
            .then(|| JobError::new(status.clone(), format!("payment order {}", status)));

        let mut payload = StatusPayload::with_state(state);
        payload.created_at = parse_timestamp(raw.created_at.as_ref());
        payload.completed_at = parse_timestamp(raw.paid_at.as_ref());
        payload.error = error;
        Ok(payload)
    }
}
