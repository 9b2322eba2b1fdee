//! Process step: deterministic transformation of upstream outputs.
//!
//! Config `operation` selects the transformation:
//! - `passthrough` (default): the single upstream output, or an object keyed
//!   by dependency id when there are several
//! - `merge`: shallow-merge object outputs in dependency id order
//! - `pick`: keep `fields` from `source` (or the passthrough value)
//! - `template`: render the `template` string
//! - `expression`: evaluate the JEXL `expression` over `{ steps, input }`
//!
//! Failures are permanent unless the node sets `retryable: true`.

use std::fmt;
use std::str::FromStr;

use serde_json::{Map, Value};

use super::{StepContext, StepError, StepExecutor, config_str, ensure_object};
use crate::workflow::context::StepInputs;
use crate::workflow::expression::ExpressionEvaluator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Passthrough,
    Merge,
    Pick,
    Template,
    Expression,
}

impl FromStr for Operation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "passthrough" => Ok(Operation::Passthrough),
            "merge" => Ok(Operation::Merge),
            "pick" => Ok(Operation::Pick),
            "template" => Ok(Operation::Template),
            "expression" => Ok(Operation::Expression),
            other => Err(format!("unknown process operation '{other}'")),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Operation::Passthrough => "passthrough",
            Operation::Merge => "merge",
            Operation::Pick => "pick",
            Operation::Template => "template",
            Operation::Expression => "expression",
        };
        f.write_str(s)
    }
}

fn operation(config: &Value) -> Result<Operation, String> {
    config_str(config, "operation")?.map_or(Ok(Operation::Passthrough), str::parse)
}

fn pick_fields(config: &Value) -> Result<Vec<&str>, String> {
    match config.get("fields") {
        Some(Value::Array(items)) => items
            .iter()
            .map(|f| {
                f.as_str()
                    .ok_or_else(|| format!("'fields' entries must be strings, got {f}"))
            })
            .collect(),
        Some(other) => Err(format!("'fields' must be a list, got {other}")),
        None => Err("pick requires 'fields'".to_string()),
    }
}

pub(crate) fn passthrough(inputs: &StepInputs) -> Value {
    let mut outputs = inputs.outputs();
    match (outputs.next(), outputs.next()) {
        (None, _) => Value::Null,
        (Some((_, only)), None) => only.clone(),
        _ => Value::Object(
            inputs
                .outputs()
                .map(|(id, v)| (id.to_string(), v.clone()))
                .collect(),
        ),
    }
}

fn merge(inputs: &StepInputs) -> Value {
    let mut merged = Map::new();
    for (id, output) in inputs.outputs() {
        match output {
            Value::Object(fields) => {
                merged.extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
            other => {
                merged.insert(id.to_string(), other.clone());
            }
        }
    }
    Value::Object(merged)
}

/// Pure transformation over the step's inputs.
fn transform(inputs: &StepInputs, config: &Value) -> Result<Value, String> {
    match operation(config)? {
        Operation::Passthrough => Ok(passthrough(inputs)),
        Operation::Merge => Ok(merge(inputs)),
        Operation::Pick => {
            let fields = pick_fields(config)?;
            let source = match config_str(config, "source")? {
                Some(dep) => inputs
                    .get_output(dep)
                    .map_err(|e| e.to_string())?
                    .cloned()
                    .ok_or_else(|| format!("dependency '{dep}' produced no output"))?,
                None => passthrough(inputs),
            };
            let object = match source {
                Value::Object(object) => object,
                other => return Err(format!("pick needs an object to pick from, got {other}")),
            };
            Ok(Value::Object(
                fields
                    .into_iter()
                    .filter_map(|f| object.get(f).map(|v| (f.to_string(), v.clone())))
                    .collect(),
            ))
        }
        Operation::Template => {
            let template = config_str(config, "template")?
                .ok_or_else(|| "template operation requires 'template'".to_string())?;
            Ok(Value::String(inputs.resolve_template(template)))
        }
        Operation::Expression => {
            let expression = config_str(config, "expression")?
                .ok_or_else(|| "expression operation requires 'expression'".to_string())?;
            ExpressionEvaluator::new()
                .evaluate(expression, &inputs.to_expression_context())
                .map_err(|e| e.to_string())
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProcessExecutor;

impl ProcessExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl StepExecutor for ProcessExecutor {
    fn validate_config(&self, config: &Value) -> Result<(), String> {
        ensure_object(config)?;
        let op = operation(config)?;
        match op {
            Operation::Pick => {
                pick_fields(config)?;
                config_str(config, "source")?;
            }
            Operation::Template | Operation::Expression => {
                let key = op.to_string();
                if config_str(config, &key)?.is_none() {
                    return Err(format!("{op} operation requires '{key}'"));
                }
            }
            Operation::Passthrough | Operation::Merge => {}
        }
        Ok(())
    }

    async fn execute(&self, ctx: &StepContext, config: &Value) -> Result<Value, StepError> {
        let retryable = config
            .get("retryable")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        transform(&ctx.inputs, config).map_err(|message| {
            if retryable {
                StepError::Transient(message)
            } else {
                StepError::Permanent(message)
            }
        })
    }
}
