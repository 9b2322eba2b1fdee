//! AI provider implementations.
//!
//! Only the offline `echo` provider lives here; networked backends are
//! registered by the embedding application.

pub mod echo;

pub use echo::EchoProvider;
