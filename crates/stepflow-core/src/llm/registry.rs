//! Provider registry for runtime provider lookup.
//!
//! A name-indexed registry of boxed providers. The first provider registered
//! becomes the default unless one is chosen explicitly.

use std::collections::HashMap;

use super::box_provider::BoxProvider;

/// Registry of available providers, indexed by name.
#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, BoxProvider>,
    default: Option<String>,
}

impl ProviderRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider under the given name.
    ///
    /// If a provider with this name already exists, it is replaced.
    pub fn register(&mut self, name: impl Into<String>, provider: BoxProvider) {
        let name = name.into();
        if self.default.is_none() {
            self.default = Some(name.clone());
        }
        self.providers.insert(name, provider);
    }

    /// Make `name` the provider used when a step does not pick one.
    pub fn set_default(&mut self, name: impl Into<String>) {
        self.default = Some(name.into());
    }

    /// Look up a provider by name.
    pub fn get(&self, name: &str) -> Option<&BoxProvider> {
        self.providers.get(name)
    }

    /// Look up `name`, or the default provider when `name` is `None`.
    pub fn resolve(&self, name: Option<&str>) -> Option<&BoxProvider> {
        match name {
            Some(name) => self.get(name),
            None => self.default.as_deref().and_then(|d| self.get(d)),
        }
    }

    /// List all registered provider names, sorted.
    pub fn list_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.providers.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::provider::Provider;
    use stepflow_types::provider::{ProviderError, ProviderParams, ProviderResponse};

    struct Named(&'static str);

    impl Provider for Named {
        fn name(&self) -> &str {
            self.0
        }

        async fn request(
            &self,
            prompt: &str,
            _params: &ProviderParams,
        ) -> Result<ProviderResponse, ProviderError> {
            Ok(ProviderResponse {
                text: format!("{}:{prompt}", self.0),
                model: "test".to_string(),
                usage: None,
            })
        }
    }

    #[test]
    fn first_registered_is_default() {
        let mut registry = ProviderRegistry::new();
        registry.register("alpha", BoxProvider::new(Named("alpha")));
        registry.register("beta", BoxProvider::new(Named("beta")));

        assert_eq!(registry.resolve(None).unwrap().name(), "alpha");
        assert_eq!(registry.resolve(Some("beta")).unwrap().name(), "beta");
        assert!(registry.resolve(Some("gamma")).is_none());
        assert_eq!(registry.list_names(), vec!["alpha", "beta"]);
    }

    #[test]
    fn explicit_default_wins() {
        let mut registry = ProviderRegistry::new();
        registry.register("alpha", BoxProvider::new(Named("alpha")));
        registry.register("beta", BoxProvider::new(Named("beta")));
        registry.set_default("beta");
        assert_eq!(registry.resolve(None).unwrap().name(), "beta");
    }

    #[test]
    fn empty_registry_resolves_nothing() {
        let registry = ProviderRegistry::new();
        assert!(registry.is_empty());
        assert!(registry.resolve(None).is_none());
    }

    #[tokio::test]
    async fn boxed_provider_delegates() {
        let provider = BoxProvider::new(Named("alpha"));
        let response = provider
            .request("hello", &ProviderParams::default())
            .await
            .unwrap();
        assert_eq!(response.text, "alpha:hello");
    }
}
