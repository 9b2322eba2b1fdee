//! Workflow engine core: validation, scheduling, and execution.
//!
//! - `definition` -- YAML/JSON parsing of workflow files
//! - `dag` -- graph validation and level computation
//! - `registry` -- step type tags bound to executors
//! - `step` -- the `StepExecutor` trait and built-in executors
//! - `context` -- per-run, append-only step results and template resolution
//! - `expression` -- JEXL evaluator for edge conditions and transforms
//! - `retry` -- exponential backoff around a single step
//! - `coordinator` -- bounded worker pool driving one run
//! - `engine` -- run registry: start, query, cancel, wait

pub mod context;
pub mod coordinator;
pub mod dag;
pub mod definition;
pub mod engine;
pub mod error;
pub mod expression;
pub mod registry;
pub mod retry;
pub mod step;

pub use context::{ExecutionContext, StepInputs};
pub use dag::{ExecutionPlan, PlannedStep, validate};
pub use definition::{DefinitionError, load_workflow_file, parse_workflow_json, parse_workflow_yaml};
pub use engine::{WorkflowEngine, ensure_completed};
pub use error::{EngineError, GraphValidationError};
pub use registry::StepRegistry;
pub use step::{BoxStepExecutor, StepContext, StepError, StepExecutor};
