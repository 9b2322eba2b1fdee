//! Output step: hand the final payload to an output sink.
//!
//! Config keys: `sink` (defaults to the registry default) and `template`
//! (rendered string payload). Without a template the payload is the
//! upstream output, or an object keyed by dependency id when there are
//! several.

use serde_json::{Value, json};

use super::process::passthrough;
use super::{StepContext, StepError, StepExecutor, config_str, ensure_object};
use crate::sink::{Delivery, SinkRegistry};

#[derive(Debug)]
pub struct OutputExecutor {
    sinks: SinkRegistry,
}

impl OutputExecutor {
    pub fn new(sinks: SinkRegistry) -> Self {
        Self { sinks }
    }
}

impl StepExecutor for OutputExecutor {
    fn validate_config(&self, config: &Value) -> Result<(), String> {
        ensure_object(config)?;
        config_str(config, "template")?;
        config_str(config, "sink")?;
        Ok(())
    }

    async fn execute(&self, ctx: &StepContext, config: &Value) -> Result<Value, StepError> {
        let requested = config_str(config, "sink").map_err(StepError::Permanent)?;
        let sink = self.sinks.resolve(requested).ok_or_else(|| {
            StepError::permanent(match requested {
                Some(name) => format!("unknown sink '{name}'"),
                None => "no output sink registered".to_string(),
            })
        })?;

        let payload = match config_str(config, "template").map_err(StepError::Permanent)? {
            Some(template) => Value::String(ctx.inputs.resolve_template(template)),
            None => passthrough(&ctx.inputs),
        };

        let delivery = Delivery {
            run_id: ctx.run_id,
            step_id: ctx.step_id.clone(),
            payload,
        };
        let receipt = sink.deliver(&delivery).await?;

        tracing::debug!(
            run_id = %ctx.run_id,
            step_id = %ctx.step_id,
            sink = %receipt.sink,
            "output handed off"
        );

        Ok(json!({
            "sink": receipt.sink,
            "reference": receipt.reference,
            "payload": delivery.payload,
        }))
    }
}
