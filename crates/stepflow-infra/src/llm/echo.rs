//! Offline provider that answers every prompt with the prompt itself.
//!
//! Lets AI steps run without network access or credentials, e.g. when
//! dry-running a workflow from the CLI.

use stepflow_core::llm::Provider;
use stepflow_types::provider::{ProviderError, ProviderParams, ProviderResponse, TokenUsage};

pub const ECHO_MODEL: &str = "echo-1";

#[derive(Debug, Clone)]
pub struct EchoProvider {
    name: String,
}

impl EchoProvider {
    pub fn new() -> Self {
        Self {
            name: "echo".to_string(),
        }
    }

    /// Register under a different name.
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Default for EchoProvider {
    fn default() -> Self {
        Self::new()
    }
}

/// Rough token estimate: whitespace-separated words.
fn estimate_tokens(text: &str) -> u32 {
    u32::try_from(text.split_whitespace().count()).unwrap_or(u32::MAX)
}

impl Provider for EchoProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn request(
        &self,
        prompt: &str,
        params: &ProviderParams,
    ) -> Result<ProviderResponse, ProviderError> {
        let mut text = prompt.to_string();
        if let Some(max_tokens) = params.max_tokens {
            let words: Vec<&str> = prompt.split_whitespace().collect();
            if words.len() > max_tokens as usize {
                text = words[..max_tokens as usize].join(" ");
            }
        }

        let input_tokens = estimate_tokens(prompt)
            + params.system.as_deref().map_or(0, estimate_tokens);
        let output_tokens = estimate_tokens(&text);
        tracing::debug!(provider = %self.name, input_tokens, output_tokens, "echo request");

        Ok(ProviderResponse {
            text,
            model: params.model.clone().unwrap_or_else(|| ECHO_MODEL.to_string()),
            usage: Some(TokenUsage {
                input_tokens,
                output_tokens,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn echoes_prompt_with_usage() {
        let provider = EchoProvider::new();
        let response = provider
            .request("hello there world", &ProviderParams::default())
            .await
            .unwrap();
        assert_eq!(response.text, "hello there world");
        assert_eq!(response.model, ECHO_MODEL);
        assert_eq!(
            response.usage,
            Some(TokenUsage {
                input_tokens: 3,
                output_tokens: 3,
            })
        );
    }

    #[tokio::test]
    async fn max_tokens_truncates_and_model_is_passed_through() {
        let provider = EchoProvider::named("offline");
        let params = ProviderParams {
            model: Some("custom".into()),
            system: Some("be brief".into()),
            max_tokens: Some(2),
            ..ProviderParams::default()
        };
        let response = provider.request("one two three four", &params).await.unwrap();
        assert_eq!(provider.name(), "offline");
        assert_eq!(response.text, "one two");
        assert_eq!(response.model, "custom");
        assert_eq!(response.usage.unwrap().input_tokens, 6);
    }
}
