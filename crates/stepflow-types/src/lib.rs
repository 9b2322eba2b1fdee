//! Shared domain types for stepflow.
//!
//! This crate contains the types exchanged between the engine and its
//! collaborators: workflow definitions, run/step results, engine
//! configuration, execution events, and provider request/response shapes.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod event;
pub mod provider;
pub mod workflow;
