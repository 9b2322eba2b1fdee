//! Step executors.
//!
//! - `StepExecutor`: RPITIT trait implemented by each step behavior
//! - `BoxStepExecutor`: object-safe wrapper stored in the registry
//! - `input`, `process`, `ai`, `output`: the built-in capabilities

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use stepflow_types::provider::ProviderError;
use uuid::Uuid;

use super::context::{ContextError, StepInputs};
use super::expression::ExpressionError;
use crate::sink::SinkError;

pub mod ai;
pub mod input;
pub mod output;
pub mod process;

pub use ai::AiExecutor;
pub use input::InputExecutor;
pub use output::OutputExecutor;
pub use process::ProcessExecutor;

// ---------------------------------------------------------------------------
// StepError
// ---------------------------------------------------------------------------

/// Outcome of a single failed attempt.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StepError {
    /// May succeed if attempted again.
    #[error("{0}")]
    Transient(String),

    /// Will fail again no matter how often it is retried.
    #[error("{0}")]
    Permanent(String),

    /// The attempt exceeded its time budget. Retried like `Transient`.
    #[error("timed out after {}s", .0.as_secs_f64())]
    Timeout(Duration),
}

impl StepError {
    pub fn transient(message: impl Into<String>) -> Self {
        StepError::Transient(message.into())
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        StepError::Permanent(message.into())
    }

    pub fn is_transient(&self) -> bool {
        !matches!(self, StepError::Permanent(_))
    }
}

impl From<ProviderError> for StepError {
    fn from(err: ProviderError) -> Self {
        if err.is_transient() {
            StepError::Transient(err.to_string())
        } else {
            StepError::Permanent(err.to_string())
        }
    }
}

impl From<SinkError> for StepError {
    fn from(err: SinkError) -> Self {
        if err.is_transient() {
            StepError::Transient(err.to_string())
        } else {
            StepError::Permanent(err.to_string())
        }
    }
}

impl From<ContextError> for StepError {
    fn from(err: ContextError) -> Self {
        StepError::Permanent(err.to_string())
    }
}

impl From<ExpressionError> for StepError {
    fn from(err: ExpressionError) -> Self {
        StepError::Permanent(err.to_string())
    }
}

// ---------------------------------------------------------------------------
// StepContext
// ---------------------------------------------------------------------------

/// Everything an executor sees for one attempt.
#[derive(Debug, Clone)]
pub struct StepContext {
    pub run_id: Uuid,
    pub step_id: String,
    /// 1-based attempt number.
    pub attempt: u32,
    pub inputs: Arc<StepInputs>,
}

// ---------------------------------------------------------------------------
// StepExecutor
// ---------------------------------------------------------------------------

/// A step behavior bound to a type tag in the registry.
pub trait StepExecutor: Send + Sync {
    /// Reject a node configuration before the run starts.
    fn validate_config(&self, _config: &Value) -> Result<(), String> {
        Ok(())
    }

    /// Run one attempt of the step.
    fn execute(
        &self,
        ctx: &StepContext,
        config: &Value,
    ) -> impl Future<Output = Result<Value, StepError>> + Send;
}

/// Object-safe version of [`StepExecutor`].
pub trait StepExecutorDyn: Send + Sync {
    fn validate_config(&self, config: &Value) -> Result<(), String>;

    fn execute_boxed<'a>(
        &'a self,
        ctx: &'a StepContext,
        config: &'a Value,
    ) -> Pin<Box<dyn Future<Output = Result<Value, StepError>> + Send + 'a>>;
}

impl<T: StepExecutor> StepExecutorDyn for T {
    fn validate_config(&self, config: &Value) -> Result<(), String> {
        StepExecutor::validate_config(self, config)
    }

    fn execute_boxed<'a>(
        &'a self,
        ctx: &'a StepContext,
        config: &'a Value,
    ) -> Pin<Box<dyn Future<Output = Result<Value, StepError>> + Send + 'a>> {
        Box::pin(self.execute(ctx, config))
    }
}

/// Shared, type-erased executor handle. Worker tasks each hold a clone.
#[derive(Clone)]
pub struct BoxStepExecutor {
    inner: Arc<dyn StepExecutorDyn>,
}

impl BoxStepExecutor {
    pub fn new<T: StepExecutor + 'static>(executor: T) -> Self {
        Self {
            inner: Arc::new(executor),
        }
    }

    pub fn validate_config(&self, config: &Value) -> Result<(), String> {
        self.inner.validate_config(config)
    }

    pub async fn execute(&self, ctx: &StepContext, config: &Value) -> Result<Value, StepError> {
        self.inner.execute_boxed(ctx, config).await
    }
}

impl std::fmt::Debug for BoxStepExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxStepExecutor").finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Config helpers
// ---------------------------------------------------------------------------

/// Optional string field of a node config.
pub(crate) fn config_str<'a>(config: &'a Value, key: &str) -> Result<Option<&'a str>, String> {
    match config.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(other) => Err(format!("'{key}' must be a string, got {other}")),
    }
}

/// Config must be an object or absent.
pub(crate) fn ensure_object(config: &Value) -> Result<(), String> {
    match config {
        Value::Null | Value::Object(_) => Ok(()),
        other => Err(format!("config must be an object, got {other}")),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::BTreeMap;

    use super::*;

    /// A step context with the given dependency outputs.
    pub fn ctx(step_id: &str, input: Value, outputs: &[(&str, Value)]) -> StepContext {
        let outputs: BTreeMap<String, Option<Value>> = outputs
            .iter()
            .map(|(id, v)| (id.to_string(), Some(v.clone())))
            .collect();
        StepContext {
            run_id: Uuid::now_v7(),
            step_id: step_id.to_string(),
            attempt: 1,
            inputs: Arc::new(StepInputs::new(step_id, input, outputs)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_errors_classified() {
        assert!(StepError::from(ProviderError::Overloaded("busy".into())).is_transient());
        assert!(
            !StepError::from(ProviderError::InvalidRequest("bad".into())).is_transient()
        );
    }

    #[test]
    fn test_sink_errors_classified() {
        assert!(StepError::from(SinkError::Unavailable("503".into())).is_transient());
        assert!(!StepError::from(SinkError::Rejected("400".into())).is_transient());
    }

    #[test]
    fn test_timeout_is_transient() {
        let err = StepError::Timeout(Duration::from_millis(1500));
        assert!(err.is_transient());
        assert_eq!(err.to_string(), "timed out after 1.5s");
    }

    #[test]
    fn test_config_str() {
        let config = serde_json::json!({ "a": "x", "b": 1 });
        assert_eq!(config_str(&config, "a").unwrap(), Some("x"));
        assert_eq!(config_str(&config, "missing").unwrap(), None);
        assert!(config_str(&config, "b").is_err());
    }
}
