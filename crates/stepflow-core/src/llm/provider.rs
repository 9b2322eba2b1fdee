//! Provider trait definition.
//!
//! This is the seam between the AI executor and the external integration
//! layer: one implementation per model backend. Uses RPITIT for `request`;
//! `BoxProvider` supplies the object-safe wrapper used by the registry.

use stepflow_types::provider::{ProviderError, ProviderParams, ProviderResponse};

/// Trait for AI model backends.
///
/// Implementations classify their own failures through `ProviderError`
/// (see `ProviderError::is_transient`); the AI executor maps those onto
/// retryable or permanent step errors.
pub trait Provider: Send + Sync {
    /// Human-readable provider name (e.g., "anthropic", "echo").
    fn name(&self) -> &str;

    /// Send a prompt and receive the full response.
    fn request(
        &self,
        prompt: &str,
        params: &ProviderParams,
    ) -> impl std::future::Future<Output = Result<ProviderResponse, ProviderError>> + Send;
}
