//! OutputSink trait definition.
//!
//! Output steps hand their final payload to a sink supplied by an external
//! collaborator (notification service, object storage, a file). The step's
//! contract is only "handed off successfully, or reported failed".

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A payload handed to a sink by an output step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delivery {
    pub run_id: Uuid,
    pub step_id: String,
    pub payload: Value,
}

/// Acknowledgement returned by a sink after a successful hand-off.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    pub sink: String,
    /// Sink-specific reference (message ID, file path, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

/// Errors from sink deliveries.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SinkError {
    /// The destination may accept the payload on a later attempt.
    #[error("delivery temporarily failed: {0}")]
    Unavailable(String),

    /// The payload will never be accepted.
    #[error("delivery rejected: {0}")]
    Rejected(String),
}

impl SinkError {
    pub fn is_transient(&self) -> bool {
        matches!(self, SinkError::Unavailable(_))
    }
}

/// Trait for output destinations.
pub trait OutputSink: Send + Sync {
    /// Sink name used in receipts and logs.
    fn name(&self) -> &str;

    /// Hand a payload off to the destination.
    fn deliver(
        &self,
        delivery: &Delivery,
    ) -> impl std::future::Future<Output = Result<DeliveryReceipt, SinkError>> + Send;
}
