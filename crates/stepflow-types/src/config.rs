//! Engine configuration types.
//!
//! `EngineConfig` represents the `stepflow.toml` file that controls worker
//! pool size, step timeouts, the default retry policy, and how optional step
//! failures are reported.

use serde::{Deserialize, Serialize};

use crate::workflow::RetryPolicy;

/// Top-level engine configuration. All fields have sensible defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum number of steps running at the same time within one run.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Per-attempt step timeout in seconds, unless a node overrides it.
    #[serde(default = "default_step_timeout_secs")]
    pub step_timeout_secs: u64,

    /// How a run with failed optional steps is reported.
    #[serde(default)]
    pub optional_failure_policy: OptionalFailurePolicy,

    /// Capacity of the execution event broadcast channel.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    /// Default retry policy applied to nodes without an override.
    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_max_concurrency() -> usize {
    4
}

fn default_step_timeout_secs() -> u64 {
    300
}

fn default_event_capacity() -> usize {
    1024
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            step_timeout_secs: default_step_timeout_secs(),
            optional_failure_policy: OptionalFailurePolicy::default(),
            event_capacity: default_event_capacity(),
            retry: RetryPolicy::default(),
        }
    }
}

impl EngineConfig {
    /// Clamp values into their valid ranges.
    pub fn normalized(mut self) -> Self {
        self.max_concurrency = self.max_concurrency.max(1);
        self.step_timeout_secs = self.step_timeout_secs.max(1);
        self.event_capacity = self.event_capacity.max(1);
        self.retry = self.retry.normalized();
        self
    }
}

/// Final status of a run whose only failures are in optional steps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptionalFailurePolicy {
    /// Report `RunStatus::PartiallyCompleted`.
    #[default]
    PartiallyCompleted,
    /// Report `RunStatus::Succeeded` and list the failures as warnings.
    SucceededWithWarnings,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_config_default_values() {
        let config = EngineConfig::default();
        assert_eq!(config.max_concurrency, 4);
        assert_eq!(config.step_timeout_secs, 300);
        assert_eq!(
            config.optional_failure_policy,
            OptionalFailurePolicy::PartiallyCompleted
        );
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn test_engine_config_deserialize_with_defaults() {
        let config: EngineConfig = toml::from_str("").unwrap();
        assert_eq!(config.max_concurrency, 4);
        assert_eq!(config.event_capacity, 1024);
    }

    #[test]
    fn test_engine_config_deserialize_with_values() {
        let toml_str = r#"
max_concurrency = 8
step_timeout_secs = 60
optional_failure_policy = "succeeded_with_warnings"

[retry]
max_attempts = 5
base_delay_ms = 50
jitter = 0.0
"#;
        let config: EngineConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.max_concurrency, 8);
        assert_eq!(config.step_timeout_secs, 60);
        assert_eq!(
            config.optional_failure_policy,
            OptionalFailurePolicy::SucceededWithWarnings
        );
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.base_delay_ms, 50);
        // Unset retry fields keep their defaults
        assert_eq!(config.retry.max_delay_ms, 30_000);
    }

    #[test]
    fn test_engine_config_normalized() {
        let config = EngineConfig {
            max_concurrency: 0,
            step_timeout_secs: 0,
            ..EngineConfig::default()
        }
        .normalized();
        assert_eq!(config.max_concurrency, 1);
        assert_eq!(config.step_timeout_secs, 1);
    }
}
