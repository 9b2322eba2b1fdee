//! Workflow execution engine for stepflow.
//!
//! This crate holds the engine logic and the trait "ports" its external
//! collaborators implement (AI providers, output sinks). It depends only on
//! `stepflow-types` -- never on `stepflow-infra` or any IO-heavy crate.

pub mod event;
pub mod llm;
pub mod sink;
pub mod workflow;
