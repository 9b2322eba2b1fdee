//! BoxSink -- object-safe dynamic dispatch wrapper for `OutputSink`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use super::output_sink::{Delivery, DeliveryReceipt, OutputSink, SinkError};

/// Object-safe version of [`OutputSink`] with boxed futures.
pub trait OutputSinkDyn: Send + Sync {
    fn name(&self) -> &str;

    fn deliver_boxed<'a>(
        &'a self,
        delivery: &'a Delivery,
    ) -> Pin<Box<dyn Future<Output = Result<DeliveryReceipt, SinkError>> + Send + 'a>>;
}

impl<T: OutputSink> OutputSinkDyn for T {
    fn name(&self) -> &str {
        OutputSink::name(self)
    }

    fn deliver_boxed<'a>(
        &'a self,
        delivery: &'a Delivery,
    ) -> Pin<Box<dyn Future<Output = Result<DeliveryReceipt, SinkError>> + Send + 'a>> {
        Box::pin(self.deliver(delivery))
    }
}

/// Type-erased, cheaply clonable sink handle.
#[derive(Clone)]
pub struct BoxSink {
    inner: Arc<dyn OutputSinkDyn>,
}

impl BoxSink {
    pub fn new<T: OutputSink + 'static>(sink: T) -> Self {
        Self {
            inner: Arc::new(sink),
        }
    }

    /// Wrap a sink the caller keeps a handle to (e.g. a `MemorySink` in tests).
    pub fn shared<T: OutputSink + 'static>(sink: Arc<T>) -> Self {
        Self { inner: sink }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub async fn deliver(&self, delivery: &Delivery) -> Result<DeliveryReceipt, SinkError> {
        self.inner.deliver_boxed(delivery).await
    }
}

impl std::fmt::Debug for BoxSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxSink").field("name", &self.name()).finish()
    }
}
