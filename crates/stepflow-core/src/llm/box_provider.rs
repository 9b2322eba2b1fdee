//! BoxProvider -- object-safe dynamic dispatch wrapper for `Provider`.
//!
//! 1. Define an object-safe `ProviderDyn` trait with boxed futures
//! 2. Blanket-impl `ProviderDyn` for all `T: Provider`
//! 3. `BoxProvider` wraps `Arc<dyn ProviderDyn>` and delegates

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use stepflow_types::provider::{ProviderError, ProviderParams, ProviderResponse};

use super::provider::Provider;

/// Object-safe version of [`Provider`] with boxed futures.
pub trait ProviderDyn: Send + Sync {
    fn name(&self) -> &str;

    fn request_boxed<'a>(
        &'a self,
        prompt: &'a str,
        params: &'a ProviderParams,
    ) -> Pin<Box<dyn Future<Output = Result<ProviderResponse, ProviderError>> + Send + 'a>>;
}

impl<T: Provider> ProviderDyn for T {
    fn name(&self) -> &str {
        Provider::name(self)
    }

    fn request_boxed<'a>(
        &'a self,
        prompt: &'a str,
        params: &'a ProviderParams,
    ) -> Pin<Box<dyn Future<Output = Result<ProviderResponse, ProviderError>> + Send + 'a>> {
        Box::pin(self.request(prompt, params))
    }
}

/// Type-erased provider for runtime selection.
///
/// Cheap to clone: worker tasks each hold a handle to the same provider.
#[derive(Clone)]
pub struct BoxProvider {
    inner: Arc<dyn ProviderDyn>,
}

impl BoxProvider {
    /// Wrap a concrete `Provider` in a type-erased handle.
    pub fn new<T: Provider + 'static>(provider: T) -> Self {
        Self {
            inner: Arc::new(provider),
        }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub async fn request(
        &self,
        prompt: &str,
        params: &ProviderParams,
    ) -> Result<ProviderResponse, ProviderError> {
        self.inner.request_boxed(prompt, params).await
    }
}

impl std::fmt::Debug for BoxProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxProvider")
            .field("name", &self.name())
            .finish()
    }
}
