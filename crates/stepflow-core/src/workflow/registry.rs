//! Step executor registry.
//!
//! Maps a node's type tag to a capability (`StepKind`) and the executor that
//! implements it. Tags are resolved during validation, so an unknown tag
//! never reaches the coordinator.

use std::collections::HashMap;

use stepflow_types::workflow::StepKind;

use super::step::{
    AiExecutor, BoxStepExecutor, InputExecutor, OutputExecutor, ProcessExecutor, StepExecutor,
};
use crate::llm::ProviderRegistry;
use crate::sink::SinkRegistry;

/// A registered executor and the capability it provides.
#[derive(Debug, Clone)]
pub struct RegisteredStep {
    pub kind: StepKind,
    pub executor: BoxStepExecutor,
}

#[derive(Debug, Clone, Default)]
pub struct StepRegistry {
    steps: HashMap<String, RegisteredStep>,
}

impl StepRegistry {
    /// An empty registry. Most callers want [`StepRegistry::with_defaults`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in `input`, `process`, `ai`, and `output` tags.
    pub fn with_defaults(providers: ProviderRegistry, sinks: SinkRegistry) -> Self {
        let mut registry = Self::new();
        registry.register(StepKind::Input.as_str(), StepKind::Input, InputExecutor::new());
        registry.register(StepKind::Process.as_str(), StepKind::Process, ProcessExecutor::new());
        registry.register(StepKind::Ai.as_str(), StepKind::Ai, AiExecutor::new(providers));
        registry.register(StepKind::Output.as_str(), StepKind::Output, OutputExecutor::new(sinks));
        registry
    }

    /// Bind `tag` to an executor. Replaces any previous binding of the tag.
    pub fn register<E: StepExecutor + 'static>(
        &mut self,
        tag: impl Into<String>,
        kind: StepKind,
        executor: E,
    ) {
        self.register_boxed(tag, kind, BoxStepExecutor::new(executor));
    }

    pub fn register_boxed(
        &mut self,
        tag: impl Into<String>,
        kind: StepKind,
        executor: BoxStepExecutor,
    ) {
        self.steps
            .insert(tag.into(), RegisteredStep { kind, executor });
    }

    pub fn resolve(&self, tag: &str) -> Option<&RegisteredStep> {
        self.steps.get(tag)
    }

    /// Registered tags, sorted.
    pub fn tags(&self) -> Vec<&str> {
        let mut tags: Vec<&str> = self.steps.keys().map(String::as_str).collect();
        tags.sort_unstable();
        tags
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::step::{StepContext, StepError};
    use serde_json::Value;

    struct Webhook;

    impl StepExecutor for Webhook {
        async fn execute(&self, _ctx: &StepContext, _config: &Value) -> Result<Value, StepError> {
            Ok(Value::Bool(true))
        }
    }

    #[test]
    fn test_defaults_cover_every_kind() {
        let registry = StepRegistry::with_defaults(ProviderRegistry::new(), SinkRegistry::new());
        for kind in StepKind::ALL {
            assert_eq!(registry.resolve(kind.as_str()).unwrap().kind, kind);
        }
        assert!(registry.resolve("webhook").is_none());
    }

    #[test]
    fn test_custom_tag_bound_to_capability() {
        let mut registry = StepRegistry::with_defaults(ProviderRegistry::new(), SinkRegistry::new());
        registry.register("webhook", StepKind::Output, Webhook);
        assert_eq!(registry.resolve("webhook").unwrap().kind, StepKind::Output);
        assert_eq!(
            registry.tags(),
            vec!["ai", "input", "output", "process", "webhook"]
        );
    }
}
