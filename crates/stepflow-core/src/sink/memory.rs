//! In-process sinks: `MemorySink` collects deliveries, `LogSink` emits them
//! as tracing events.

use std::sync::Mutex;

use super::output_sink::{Delivery, DeliveryReceipt, OutputSink, SinkError};

/// Sink that keeps every delivery in memory.
///
/// Can be told to fail the next N deliveries, which is how transient sink
/// failures are exercised in tests.
#[derive(Debug)]
pub struct MemorySink {
    name: String,
    deliveries: Mutex<Vec<Delivery>>,
    failures_remaining: Mutex<u32>,
}

impl MemorySink {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            deliveries: Mutex::new(Vec::new()),
            failures_remaining: Mutex::new(0),
        }
    }

    /// Reject the next `count` deliveries with a transient error.
    pub fn fail_next(&self, count: u32) {
        if let Ok(mut remaining) = self.failures_remaining.lock() {
            *remaining = count;
        }
    }

    /// Snapshot of all accepted deliveries, in arrival order.
    pub fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries
            .lock()
            .map(|d| d.clone())
            .unwrap_or_default()
    }
}

impl OutputSink for MemorySink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn deliver(&self, delivery: &Delivery) -> Result<DeliveryReceipt, SinkError> {
        {
            let mut remaining = self
                .failures_remaining
                .lock()
                .map_err(|_| SinkError::Rejected("sink state poisoned".to_string()))?;
            if *remaining > 0 {
                *remaining -= 1;
                return Err(SinkError::Unavailable(format!(
                    "{} is temporarily unavailable",
                    self.name
                )));
            }
        }

        let mut deliveries = self
            .deliveries
            .lock()
            .map_err(|_| SinkError::Rejected("sink state poisoned".to_string()))?;
        deliveries.push(delivery.clone());
        Ok(DeliveryReceipt {
            sink: self.name.clone(),
            reference: Some(format!("{}#{}", self.name, deliveries.len())),
        })
    }
}

/// Sink that writes each delivery to the tracing log at INFO.
#[derive(Debug, Clone, Default)]
pub struct LogSink;

impl LogSink {
    pub fn new() -> Self {
        Self
    }
}

impl OutputSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn deliver(&self, delivery: &Delivery) -> Result<DeliveryReceipt, SinkError> {
        tracing::info!(
            run_id = %delivery.run_id,
            step_id = %delivery.step_id,
            payload = %delivery.payload,
            "workflow output delivered"
        );
        Ok(DeliveryReceipt {
            sink: "log".to_string(),
            reference: None,
        })
    }
}
