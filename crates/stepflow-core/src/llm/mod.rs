//! AI provider abstractions.
//!
//! - `Provider`: RPITIT trait for concrete backend implementations
//! - `BoxProvider`: object-safe wrapper for dynamic dispatch
//! - `ProviderRegistry`: name-indexed lookup used by the AI executor

pub mod box_provider;
pub mod provider;
pub mod registry;

pub use box_provider::BoxProvider;
pub use provider::Provider;
pub use registry::ProviderRegistry;
