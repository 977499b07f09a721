use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use crate::config::LlmConfig;
use crate::error::{RouteScribeError, Result};
use super::generator::{extract_code_block, GeneratedArtifact, TestGenerator};

const SYSTEM_PROMPT: &str = "You are an expert Python developer who writes pytest test suites for FastAPI applications. \
Reply with a single complete Python test module in one ```python code block. \
Only use imports, fixtures and models that are given to you or that the module defines itself.";

const ANTHROPIC_DEFAULT_MODEL: &str = "claude-3-5-sonnet-latest";
const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";

const OPENAI_DEFAULT_MODEL: &str = "gpt-4o";
const OPENAI_BASE_URL: &str = "https://api.openai.com";

/// Factory function to create the generator named by `config.provider`
pub fn create_generator(config: &LlmConfig) -> Result<Box<dyn TestGenerator>> {
    match config.provider.as_str() {
        "anthropic" => Ok(Box::new(AnthropicGenerator::new(config)?)),
        "openai" => Ok(Box::new(OpenAiGenerator::new(config)?)),
        _ => Err(RouteScribeError::Config(format!(
            "Unsupported LLM provider: {}",
            config.provider
        ))),
    }
}

/// Configured key, else the provider's environment variable
fn api_key(config: &LlmConfig, env_var: &str) -> Result<String> {
    config
        .api_key
        .clone()
        .filter(|key| !key.is_empty())
        .or_else(|| std::env::var(env_var).ok().filter(|key| !key.is_empty()))
        .ok_or_else(|| {
            RouteScribeError::Config(format!(
                "API key required for {} (set llm.api_key or {})",
                config.provider, env_var
            ))
        })
}

/// Anthropic Messages API
pub struct AnthropicGenerator {
    config: LlmConfig,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl AnthropicGenerator {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        Ok(Self {
            config: config.clone(),
            api_key: api_key(config, "ANTHROPIC_API_KEY")?,
            model: config
                .model
                .clone()
                .unwrap_or_else(|| ANTHROPIC_DEFAULT_MODEL.to_string()),
            client: reqwest::Client::new(),
        })
    }

    fn endpoint(&self) -> String {
        let base = self.config.base_url.as_deref().unwrap_or(ANTHROPIC_BASE_URL);
        format!("{}/v1/messages", base.trim_end_matches('/'))
    }
}

#[async_trait]
impl TestGenerator for AnthropicGenerator {
    async fn generate(&self, prompt: &str) -> Result<GeneratedArtifact> {
        let payload = json!({
            "model": self.model,
            "max_tokens": self.config.max_tokens.unwrap_or(2048),
            "temperature": self.config.temperature.unwrap_or(0.0),
            "system": SYSTEM_PROMPT,
            "messages": [
                {
                    "role": "user",
                    "content": prompt
                }
            ]
        });

        let response = self
            .client
            .post(self.endpoint())
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(|e| RouteScribeError::Generation(format!("Anthropic API request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(RouteScribeError::Generation(format!(
                "Anthropic API error {}: {}",
                status, error_text
            )));
        }

        let response_data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| RouteScribeError::Generation(format!("Failed to parse Anthropic response: {}", e)))?;

        let text = response_data["content"][0]["text"]
            .as_str()
            .ok_or_else(|| RouteScribeError::Generation("Anthropic response has no text content".to_string()))?;
        let tokens_used = response_data["usage"]["output_tokens"]
            .as_u64()
            .map(|t| t as u32);

        debug!("Anthropic response:\n{}", text);
        Ok(GeneratedArtifact::success(extract_code_block(text), tokens_used))
    }

    fn provider_name(&self) -> &str {
        "Anthropic"
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// OpenAI chat completions API
pub struct OpenAiGenerator {
    config: LlmConfig,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl OpenAiGenerator {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        Ok(Self {
            config: config.clone(),
            api_key: api_key(config, "OPENAI_API_KEY")?,
            model: config
                .model
                .clone()
                .unwrap_or_else(|| OPENAI_DEFAULT_MODEL.to_string()),
            client: reqwest::Client::new(),
        })
    }

    fn endpoint(&self) -> String {
        let base = self.config.base_url.as_deref().unwrap_or(OPENAI_BASE_URL);
        format!("{}/v1/chat/completions", base.trim_end_matches('/'))
    }
}

#[async_trait]
impl TestGenerator for OpenAiGenerator {
    async fn generate(&self, prompt: &str) -> Result<GeneratedArtifact> {
        let payload = json!({
            "model": self.model,
            "messages": [
                {
                    "role": "system",
                    "content": SYSTEM_PROMPT
                },
                {
                    "role": "user",
                    "content": prompt
                }
            ],
            "max_tokens": self.config.max_tokens.unwrap_or(2048),
            "temperature": self.config.temperature.unwrap_or(0.0)
        });

        let response = self
            .client
            .post(self.endpoint())
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(|e| RouteScribeError::Generation(format!("OpenAI API request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(RouteScribeError::Generation(format!(
                "OpenAI API error {}: {}",
                status, error_text
            )));
        }

        let response_data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| RouteScribeError::Generation(format!("Failed to parse OpenAI response: {}", e)))?;

        let text = response_data["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| RouteScribeError::Generation("OpenAI response has no message content".to_string()))?;
        let tokens_used = response_data["usage"]["completion_tokens"]
            .as_u64()
            .map(|t| t as u32);

        debug!("OpenAI response:\n{}", text);
        Ok(GeneratedArtifact::success(extract_code_block(text), tokens_used))
    }

    fn provider_name(&self) -> &str {
        "OpenAI"
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(provider: &str) -> LlmConfig {
        LlmConfig {
            provider: provider.to_string(),
            api_key: Some("test-key".to_string()),
            ..LlmConfig::default()
        }
    }

    #[test]
    fn test_factory_selects_provider_and_default_model() {
        let generator = create_generator(&config("anthropic")).unwrap();
        assert_eq!(generator.provider_name(), "Anthropic");
        assert_eq!(generator.model_name(), "claude-3-5-sonnet-latest");

        let mut openai = config("openai");
        openai.model = Some("gpt-4o-mini".to_string());
        let generator = create_generator(&openai).unwrap();
        assert_eq!(generator.provider_name(), "OpenAI");
        assert_eq!(generator.model_name(), "gpt-4o-mini");
    }

    #[test]
    fn test_unknown_provider_is_a_config_error() {
        assert!(matches!(create_generator(&config("cortex")), Err(RouteScribeError::Config(_))));
    }

    #[test]
    fn test_base_url_override() {
        let mut config = config("anthropic");
        config.base_url = Some("http://localhost:8080/".to_string());
        let generator = AnthropicGenerator::new(&config).unwrap();
        assert_eq!(generator.endpoint(), "http://localhost:8080/v1/messages");
    }
}
