//! Sink registry for output steps.

use std::collections::HashMap;

use super::box_sink::BoxSink;

/// Registry of output sinks, indexed by name.
///
/// Mirrors the provider registry: the first sink registered becomes the
/// default unless one is chosen explicitly.
#[derive(Debug, Clone, Default)]
pub struct SinkRegistry {
    sinks: HashMap<String, BoxSink>,
    default: Option<String>,
}

impl SinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a sink under its own name. Replaces any sink with that name.
    pub fn register(&mut self, sink: BoxSink) {
        let name = sink.name().to_string();
        if self.default.is_none() {
            self.default = Some(name.clone());
        }
        self.sinks.insert(name, sink);
    }

    pub fn set_default(&mut self, name: impl Into<String>) {
        self.default = Some(name.into());
    }

    pub fn get(&self, name: &str) -> Option<&BoxSink> {
        self.sinks.get(name)
    }

    /// Look up `name`, or the default sink when `name` is `None`.
    pub fn resolve(&self, name: Option<&str>) -> Option<&BoxSink> {
        match name {
            Some(name) => self.get(name),
            None => self.default.as_deref().and_then(|d| self.get(d)),
        }
    }

    pub fn list_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.sinks.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{LogSink, MemorySink};

    #[test]
    fn first_registered_is_default() {
        let mut registry = SinkRegistry::new();
        registry.register(BoxSink::new(LogSink::new()));
        registry.register(BoxSink::new(MemorySink::new("memory")));

        assert_eq!(registry.resolve(None).unwrap().name(), "log");
        assert_eq!(registry.resolve(Some("memory")).unwrap().name(), "memory");
        assert!(registry.resolve(Some("s3")).is_none());
        assert_eq!(registry.list_names(), vec!["log", "memory"]);
    }

    #[test]
    fn set_default_overrides() {
        let mut registry = SinkRegistry::new();
        registry.register(BoxSink::new(LogSink::new()));
        registry.register(BoxSink::new(MemorySink::new("memory")));
        registry.set_default("memory");
        assert_eq!(registry.resolve(None).unwrap().name(), "memory");
    }
}
