use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Text produced for one endpoint, with usage metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedArtifact {
    /// Generated test source
    pub content: String,

    /// Output tokens reported by the provider
    pub tokens_used: Option<u32>,

    /// "success" unless the provider says otherwise
    pub status: String,
}

impl GeneratedArtifact {
    pub fn success(content: impl Into<String>, tokens_used: Option<u32>) -> Self {
        Self {
            content: content.into(),
            tokens_used,
            status: "success".to_string(),
        }
    }
}

/// Trait for providers that turn a rendered prompt into a test file
#[async_trait::async_trait]
pub trait TestGenerator: Send + Sync {
    /// Generate test source for the prompt
    async fn generate(&self, prompt: &str) -> Result<GeneratedArtifact>;

    /// Get the provider name (e.g., "Anthropic", "OpenAI")
    fn provider_name(&self) -> &str;

    /// Get the model name being used
    fn model_name(&self) -> &str;
}

/// Body of the first fenced ```python block, or the whole reply when there is none
pub fn extract_code_block(text: &str) -> String {
    if !text.contains("```python") {
        return text.to_string();
    }
    match regex::Regex::new(r"(?s)```python(.*?)```") {
        Ok(re) => re
            .captures(text)
            .and_then(|cap| cap.get(1))
            .map(|m| m.as_str().to_string())
            .unwrap_or_else(|| text.to_string()),
        Err(_) => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracts_fenced_python() {
        let reply = "Here you go:\n```python\nimport pytest\n\ndef test_a():\n    assert True\n```\nGood luck.";
        assert_eq!(extract_code_block(reply), "\nimport pytest\n\ndef test_a():\n    assert True\n");
    }

    #[test]
    fn test_plain_reply_is_kept() {
        assert_eq!(extract_code_block("def test_a():\n    pass\n"), "def test_a():\n    pass\n");
        assert_eq!(extract_code_block("```python\nunterminated"), "```python\nunterminated");
    }
}
