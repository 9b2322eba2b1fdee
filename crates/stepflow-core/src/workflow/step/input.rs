//! Input step: turns run parameters into the first step output.
//!
//! Config keys:
//! - `value`: literal output, ignores parameters
//! - `defaults`: object merged underneath the parameters
//! - `required`: parameter names that must be present
//! - `field`: emit a single parameter instead of the whole object

use serde_json::{Map, Value};

use super::{StepContext, StepError, StepExecutor, config_str, ensure_object};

#[derive(Debug, Clone, Default)]
pub struct InputExecutor;

impl InputExecutor {
    pub fn new() -> Self {
        Self
    }
}

fn required_fields(config: &Value) -> Result<Vec<&str>, String> {
    match config.get("required") {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .ok_or_else(|| format!("'required' entries must be strings, got {item}"))
            })
            .collect(),
        Some(other) => Err(format!("'required' must be a list, got {other}")),
    }
}

impl StepExecutor for InputExecutor {
    fn validate_config(&self, config: &Value) -> Result<(), String> {
        ensure_object(config)?;
        config_str(config, "field")?;
        required_fields(config)?;
        match config.get("defaults") {
            None | Some(Value::Null) | Some(Value::Object(_)) => Ok(()),
            Some(other) => Err(format!("'defaults' must be an object, got {other}")),
        }
    }

    async fn execute(&self, ctx: &StepContext, config: &Value) -> Result<Value, StepError> {
        if let Some(value) = config.get("value") {
            return Ok(value.clone());
        }

        let mut merged: Map<String, Value> = config
            .get("defaults")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        match ctx.inputs.parameters() {
            Value::Object(params) => {
                merged.extend(params.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
            Value::Null => {}
            other => {
                // Scalar parameters are only usable as a whole.
                if merged.is_empty() && config.get("field").is_none() {
                    return Ok(other.clone());
                }
                return Err(StepError::permanent(format!(
                    "run input must be an object, got {other}"
                )));
            }
        }

        let missing: Vec<&str> = required_fields(config)
            .map_err(StepError::Permanent)?
            .into_iter()
            .filter(|name| merged.get(*name).is_none_or(Value::is_null))
            .collect();
        if !missing.is_empty() {
            return Err(StepError::permanent(format!(
                "missing required input: {}",
                missing.join(", ")
            )));
        }

        match config_str(config, "field").map_err(StepError::Permanent)? {
            Some(field) => merged
                .remove(field)
                .ok_or_else(|| StepError::permanent(format!("input field '{field}' not provided"))),
            None => Ok(Value::Object(merged)),
        }
    }
}
