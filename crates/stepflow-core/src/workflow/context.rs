//! Per-run execution context.
//!
//! `ExecutionContext` is the append-only store of step results for a single
//! run. Workers write through a `StepRecorder` bound to their own step, the
//! coordinator writes the skip and cancel decisions it owns, and downstream
//! steps read their declared dependencies through a `StepInputs` view.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde_json::{Map, Value, json};
use stepflow_types::config::OptionalFailurePolicy;
use stepflow_types::workflow::{RunStatus, StepResult, StepStatus};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContextError {
    #[error("step '{step_id}' already has a terminal result ({status})")]
    AlreadyTerminal { step_id: String, status: StepStatus },

    #[error("step '{step_id}' did not declare a dependency on '{requested}'")]
    UndeclaredDependency { step_id: String, requested: String },
}

// ---------------------------------------------------------------------------
// ExecutionContext
// ---------------------------------------------------------------------------

/// Append-only result store for one run.
#[derive(Debug)]
pub struct ExecutionContext {
    run_id: Uuid,
    input: Value,
    results: DashMap<String, StepResult>,
}

impl ExecutionContext {
    pub fn new(run_id: Uuid, input: Value) -> Self {
        Self {
            run_id,
            input,
            results: DashMap::new(),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Run input parameters.
    pub fn input(&self) -> &Value {
        &self.input
    }

    /// Record a result for `step_id`.
    ///
    /// A non-terminal entry may be replaced; a terminal one never is.
    pub fn record(&self, step_id: &str, mut result: StepResult) -> Result<(), ContextError> {
        result.step_id = step_id.to_string();
        match self.results.entry(step_id.to_string()) {
            Entry::Occupied(mut entry) => {
                let current = entry.get().status;
                if current.is_terminal() {
                    return Err(ContextError::AlreadyTerminal {
                        step_id: step_id.to_string(),
                        status: current,
                    });
                }
                entry.insert(result);
            }
            Entry::Vacant(entry) => {
                entry.insert(result);
            }
        }
        Ok(())
    }

    pub fn get(&self, step_id: &str) -> Option<StepResult> {
        self.results.get(step_id).map(|r| r.clone())
    }

    pub fn status(&self, step_id: &str) -> Option<StepStatus> {
        self.results.get(step_id).map(|r| r.status)
    }

    /// Output of a succeeded step.
    pub fn output(&self, step_id: &str) -> Option<Value> {
        self.results.get(step_id).and_then(|r| r.output.clone())
    }

    /// A writer restricted to a single step.
    pub fn recorder(self: &Arc<Self>, step_id: impl Into<String>) -> StepRecorder {
        StepRecorder {
            context: Arc::clone(self),
            step_id: step_id.into(),
        }
    }

    /// Build the read view for `step_id`, exposing only `dependencies`.
    pub fn inputs_for(&self, step_id: &str, dependencies: &[String]) -> StepInputs {
        let outputs = dependencies
            .iter()
            .map(|dep| (dep.clone(), self.output(dep)))
            .collect();
        StepInputs {
            step_id: step_id.to_string(),
            parameters: self.input.clone(),
            outputs,
        }
    }

    /// All results, ordered by step id.
    pub fn snapshot(&self) -> BTreeMap<String, StepResult> {
        self.results
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Derive the final run status from the recorded results.
    pub fn aggregate(
        &self,
        optional: &HashSet<String>,
        cancelled: bool,
        policy: OptionalFailurePolicy,
    ) -> RunOutcome {
        let snapshot = self.snapshot();

        let mut warnings = Vec::new();
        let mut required_failures: Vec<&StepResult> = Vec::new();
        for result in snapshot.values().filter(|r| r.is_failure()) {
            if optional.contains(&result.step_id) {
                warnings.push(describe_failure(result));
            } else {
                required_failures.push(result);
            }
        }

        if cancelled {
            return RunOutcome {
                status: RunStatus::Cancelled,
                error: None,
                warnings,
            };
        }

        if !required_failures.is_empty() {
            // Prefer the step that actually failed over the ones skipped
            // because of it.
            let culprit = required_failures
                .iter()
                .find(|r| r.status == StepStatus::Failed)
                .unwrap_or(&required_failures[0]);
            return RunOutcome {
                status: RunStatus::Failed,
                error: Some(describe_failure(culprit)),
                warnings,
            };
        }

        let status = if warnings.is_empty() {
            RunStatus::Succeeded
        } else {
            match policy {
                OptionalFailurePolicy::PartiallyCompleted => RunStatus::PartiallyCompleted,
                OptionalFailurePolicy::SucceededWithWarnings => RunStatus::Succeeded,
            }
        };

        RunOutcome {
            status,
            error: None,
            warnings,
        }
    }
}

fn describe_failure(result: &StepResult) -> String {
    match &result.error {
        Some(error) => format!("step '{}' {}: {error}", result.step_id, result.status),
        None => format!("step '{}' {}", result.step_id, result.status),
    }
}

/// Aggregated run status with the failure summary.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub status: RunStatus,
    pub error: Option<String>,
    pub warnings: Vec<String>,
}

// ---------------------------------------------------------------------------
// StepRecorder
// ---------------------------------------------------------------------------

/// Write handle owned by the worker executing one step.
#[derive(Debug, Clone)]
pub struct StepRecorder {
    context: Arc<ExecutionContext>,
    step_id: String,
}

impl StepRecorder {
    pub fn step_id(&self) -> &str {
        &self.step_id
    }

    pub fn record(&self, result: StepResult) -> Result<(), ContextError> {
        self.context.record(&self.step_id, result)
    }
}

// ---------------------------------------------------------------------------
// StepInputs
// ---------------------------------------------------------------------------

/// Read-only view of the data a step may consume.
#[derive(Debug, Clone, Default)]
pub struct StepInputs {
    step_id: String,
    parameters: Value,
    outputs: BTreeMap<String, Option<Value>>,
}

impl StepInputs {
    /// Build a view directly. The engine uses [`ExecutionContext::inputs_for`].
    pub fn new(
        step_id: impl Into<String>,
        parameters: Value,
        outputs: BTreeMap<String, Option<Value>>,
    ) -> Self {
        Self {
            step_id: step_id.into(),
            parameters,
            outputs,
        }
    }

    pub fn step_id(&self) -> &str {
        &self.step_id
    }

    /// Run input parameters.
    pub fn parameters(&self) -> &Value {
        &self.parameters
    }

    /// Declared dependency ids, sorted.
    pub fn dependencies(&self) -> impl Iterator<Item = &str> {
        self.outputs.keys().map(String::as_str)
    }

    /// Output of a declared dependency.
    ///
    /// `Ok(None)` means the dependency produced nothing (skipped, or failed
    /// while optional).
    pub fn get_output(&self, dependency: &str) -> Result<Option<&Value>, ContextError> {
        self.outputs
            .get(dependency)
            .map(Option::as_ref)
            .ok_or_else(|| ContextError::UndeclaredDependency {
                step_id: self.step_id.clone(),
                requested: dependency.to_string(),
            })
    }

    /// Dependencies that produced an output, in id order.
    pub fn outputs(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.outputs
            .iter()
            .filter_map(|(id, output)| output.as_ref().map(|v| (id.as_str(), v)))
    }

    /// Replace `{{ steps.<id>.output }}` and `{{ input.<field> }}` markers.
    ///
    /// Paths may continue into the value (`{{ steps.fetch.output.title }}`).
    /// Unresolvable markers are left untouched.
    pub fn resolve_template(&self, template: &str) -> String {
        let mut rendered = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(open) = rest.find("{{") {
            let Some(len) = rest[open + 2..].find("}}") else {
                break;
            };
            let close = open + 2 + len + 2;
            rendered.push_str(&rest[..open]);
            match self.lookup(rest[open + 2..open + 2 + len].trim()) {
                Some(value) => rendered.push_str(&value_to_string(value)),
                None => rendered.push_str(&rest[open..close]),
            }
            rest = &rest[close..];
        }

        rendered.push_str(rest);
        rendered
    }

    fn lookup(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let root = match segments.next()? {
            "steps" => {
                let step_id = segments.next()?;
                if segments.next()? != "output" {
                    return None;
                }
                self.outputs.get(step_id)?.as_ref()?
            }
            "input" => &self.parameters,
            _ => return None,
        };
        segments.try_fold(root, |value, segment| match value {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
    }

    /// JSON object JEXL expressions evaluate against.
    ///
    /// Shape: `{ "steps": { "<id>": { "output": ... } }, "input": ... }`.
    /// Dependencies without an output are omitted.
    pub fn to_expression_context(&self) -> Value {
        let steps: Map<String, Value> = self
            .outputs()
            .map(|(id, output)| (id.to_string(), json!({ "output": output })))
            .collect();
        json!({
            "steps": steps,
            "input": self.parameters,
        })
    }
}

/// Render a JSON value for string interpolation. Strings are inserted raw.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
