//! Infrastructure layer for stepflow.
//!
//! Concrete implementations of the ports defined in `stepflow-core`: the
//! `stepflow.toml` loader, a JSON-lines file sink, and the offline `echo`
//! provider.

pub mod config;
pub mod llm;
pub mod sink;
