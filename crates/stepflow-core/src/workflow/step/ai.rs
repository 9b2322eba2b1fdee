//! AI step: render a prompt and send it to a registered provider.
//!
//! Config keys: `prompt` (required, templated), `provider` (defaults to the
//! registry default), `model`, `system`, `temperature`, `max_tokens`.
//! Output: `{ "text", "model", "provider", "usage"? }`.

use serde_json::{Value, json};
use stepflow_types::provider::ProviderParams;

use super::{StepContext, StepError, StepExecutor, config_str, ensure_object};
use crate::llm::ProviderRegistry;

pub struct AiExecutor {
    providers: ProviderRegistry,
}

impl AiExecutor {
    pub fn new(providers: ProviderRegistry) -> Self {
        Self { providers }
    }
}

fn params(config: &Value) -> Result<ProviderParams, String> {
    let temperature = match config.get("temperature") {
        None | Some(Value::Null) => None,
        Some(v) => Some(
            v.as_f64()
                .ok_or_else(|| format!("'temperature' must be a number, got {v}"))?,
        ),
    };
    let max_tokens = match config.get("max_tokens") {
        None | Some(Value::Null) => None,
        Some(v) => Some(
            v.as_u64()
                .and_then(|n| u32::try_from(n).ok())
                .ok_or_else(|| format!("'max_tokens' must be a positive integer, got {v}"))?,
        ),
    };
    Ok(ProviderParams {
        model: config_str(config, "model")?.map(str::to_string),
        system: config_str(config, "system")?.map(str::to_string),
        temperature,
        max_tokens,
    })
}

impl StepExecutor for AiExecutor {
    fn validate_config(&self, config: &Value) -> Result<(), String> {
        ensure_object(config)?;
        if config_str(config, "prompt")?.is_none() {
            return Err("ai step requires 'prompt'".to_string());
        }
        config_str(config, "provider")?;
        params(config)?;
        Ok(())
    }

    async fn execute(&self, ctx: &StepContext, config: &Value) -> Result<Value, StepError> {
        let template = config_str(config, "prompt")
            .map_err(StepError::Permanent)?
            .ok_or_else(|| StepError::permanent("ai step requires 'prompt'"))?;
        let prompt = ctx.inputs.resolve_template(template);
        if prompt.trim().is_empty() {
            return Err(StepError::permanent("rendered prompt is empty"));
        }

        let requested = config_str(config, "provider").map_err(StepError::Permanent)?;
        let provider = self.providers.resolve(requested).ok_or_else(|| {
            StepError::permanent(match requested {
                Some(name) => format!("unknown provider '{name}'"),
                None => "no provider registered".to_string(),
            })
        })?;
        let params = params(config).map_err(StepError::Permanent)?;

        tracing::debug!(
            run_id = %ctx.run_id,
            step_id = %ctx.step_id,
            attempt = ctx.attempt,
            provider = provider.name(),
            prompt_chars = prompt.len(),
            "sending prompt"
        );

        let response = provider.request(&prompt, &params).await?;

        let mut output = json!({
            "text": response.text,
            "model": response.model,
            "provider": provider.name(),
        });
        if let Some(usage) = response.usage {
            output["usage"] = json!({
                "input_tokens": usage.input_tokens,
                "output_tokens": usage.output_tokens,
            });
        }
        Ok(output)
    }
}

impl std::fmt::Debug for AiExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AiExecutor")
            .field("providers", &self.providers.list_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::llm::{BoxProvider, Provider};
    use crate::workflow::step::test_support::ctx;
    use stepflow_types::provider::{ProviderError, ProviderResponse, TokenUsage};

    /// Records the last request and answers with a fixed text.
    #[derive(Default)]
    struct Recording {
        last: Mutex<Option<(String, ProviderParams)>>,
    }

    impl Provider for std::sync::Arc<Recording> {
        fn name(&self) -> &str {
            "recording"
        }

        async fn request(
            &self,
            prompt: &str,
            params: &ProviderParams,
        ) -> Result<ProviderResponse, ProviderError> {
            *self.last.lock().unwrap() = Some((prompt.to_string(), params.clone()));
            Ok(ProviderResponse {
                text: "a summary".to_string(),
                model: params.model.clone().unwrap_or_else(|| "default".into()),
                usage: Some(TokenUsage {
                    input_tokens: 10,
                    output_tokens: 3,
                }),
            })
        }
    }

    struct Refusing;

    impl Provider for Refusing {
        fn name(&self) -> &str {
            "refusing"
        }

        async fn request(
            &self,
            _prompt: &str,
            _params: &ProviderParams,
        ) -> Result<ProviderResponse, ProviderError> {
            Err(ProviderError::AuthenticationFailed)
        }
    }

    fn executor(recording: &std::sync::Arc<Recording>) -> AiExecutor {
        let mut registry = ProviderRegistry::new();
        registry.register("recording", BoxProvider::new(recording.clone()));
        registry.register("refusing", BoxProvider::new(Refusing));
        AiExecutor::new(registry)
    }

    #[tokio::test]
    async fn test_renders_prompt_and_forwards_params() {
        let recording = std::sync::Arc::new(Recording::default());
        let config = json!({
            "prompt": "Summarize: {{ steps.fetch.output }}",
            "model": "small",
            "temperature": 0.2,
            "max_tokens": 64
        });
        let out = executor(&recording)
            .execute(&ctx("sum", json!({}), &[("fetch", json!("the news"))]), &config)
            .await
            .unwrap();

        assert_eq!(out["text"], "a summary");
        assert_eq!(out["model"], "small");
        assert_eq!(out["provider"], "recording");
        assert_eq!(out["usage"]["output_tokens"], 3);

        let (prompt, params) = recording.last.lock().unwrap().clone().unwrap();
        assert_eq!(prompt, "Summarize: the news");
        assert_eq!(params.max_tokens, Some(64));
        assert_eq!(params.temperature, Some(0.2));
    }

    #[tokio::test]
    async fn test_unknown_provider_is_permanent() {
        let recording = std::sync::Arc::new(Recording::default());
        let err = executor(&recording)
            .execute(
                &ctx("sum", json!({}), &[]),
                &json!({ "prompt": "hi", "provider": "missing" }),
            )
            .await
            .unwrap_err();
        assert_eq!(err, StepError::permanent("unknown provider 'missing'"));
    }

    #[tokio::test]
    async fn test_authentication_failure_is_permanent() {
        let recording = std::sync::Arc::new(Recording::default());
        let err = executor(&recording)
            .execute(
                &ctx("sum", json!({}), &[]),
                &json!({ "prompt": "hi", "provider": "refusing" }),
            )
            .await
            .unwrap_err();
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_empty_prompt_is_permanent() {
        let recording = std::sync::Arc::new(Recording::default());
        let err = executor(&recording)
            .execute(&ctx("sum", json!({}), &[]), &json!({ "prompt": "   " }))
            .await
            .unwrap_err();
        assert!(!err.is_transient());
        assert!(recording.last.lock().unwrap().is_none());
    }

    #[test]
    fn test_validate_config() {
        let exec = AiExecutor::new(ProviderRegistry::new());
        assert!(exec.validate_config(&json!({ "prompt": "x" })).is_ok());
        assert!(exec.validate_config(&json!({})).is_err());
        assert!(exec.validate_config(&json!({ "prompt": "x", "temperature": "hot" })).is_err());
        assert!(exec.validate_config(&json!({ "prompt": "x", "max_tokens": -1 })).is_err());
    }
}
