//! The model tier registry.
//!
//! Callers see a single [`SummaryModel`] interface. Tiers configured with a
//! real provider and API key talk to an OpenAI-compatible endpoint; anything
//! else resolves to a deterministic local generator, which is also what the
//! tests use.

use std::sync::Arc;
use std::time::Instant;

use async_openai::config::OpenAIConfig;
use async_openai::types::{
    ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage,
    CreateChatCompletionRequestArgs,
};
use async_trait::async_trait;
use miette::Diagnostic;
use nudge_db::models::ModelKey;
use thiserror::Error;

use crate::config::LlmConfig;

pub const PROMPT_VERSION: &str = "v0";

const SUMMARY_SYSTEM_PROMPT: &str = "You distill articles into compact summaries. Respond in \
plain text with a one-line thesis, a few key points, and a closing line on why it matters. \
Stay under 120 words and add nothing that is not in the provided text.";

#[derive(Debug, Clone)]
pub struct SummaryOutput {
    pub text: String,
    pub provider: String,
    pub model: String,
    pub latency_ms: i32,
}

#[derive(Debug, Error, Diagnostic)]
pub enum SummaryModelError {
    #[error("model request failed")]
    Request(#[from] async_openai::error::OpenAIError),

    #[error("model returned an empty response")]
    EmptyResponse,
}

#[async_trait]
pub trait SummaryModel: Send + Sync {
    async fn generate(
        &self,
        text: &str,
        prompt_version: &str,
    ) -> Result<SummaryOutput, SummaryModelError>;
}

/// Deterministic, non-networked generator. Keeps the end-to-end pipeline
/// exercisable before a real provider is wired up for a tier.
pub struct PlaceholderModel {
    model_key: ModelKey,
}

impl PlaceholderModel {
    pub fn new(model_key: ModelKey) -> Self {
        Self { model_key }
    }
}

#[async_trait]
impl SummaryModel for PlaceholderModel {
    async fn generate(
        &self,
        _text: &str,
        prompt_version: &str,
    ) -> Result<SummaryOutput, SummaryModelError> {
        let start = Instant::now();

        let text = "Thesis: The text is summarized in a neutral, third-person format by a \
placeholder generator.\n\
Key points:\n\
- The summary is produced from the item's canonical text after character-based truncation.\n\
- Model tier metadata is recorded for benchmarking without calling a real provider.\n\
Why it matters: the full pipeline can be exercised before choosing a vendor."
            .to_string();

        Ok(SummaryOutput {
            text,
            provider: "placeholder".to_string(),
            model: format!("{}:{}", self.model_key, prompt_version),
            latency_ms: start.elapsed().as_millis() as i32,
        })
    }
}

/// A tier backed by an OpenAI-compatible chat completion endpoint.
pub struct OpenAiModel {
    client: async_openai::Client<OpenAIConfig>,
    provider: String,
    model: String,
}

impl OpenAiModel {
    pub fn new(provider: &str, model: &str, base_url: Option<&str>, api_key: &str) -> Self {
        let mut config = OpenAIConfig::new().with_api_key(api_key);
        if let Some(base_url) = base_url {
            config = config.with_api_base(base_url);
        }

        Self {
            client: async_openai::Client::with_config(config),
            provider: provider.to_string(),
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl SummaryModel for OpenAiModel {
    async fn generate(
        &self,
        text: &str,
        _prompt_version: &str,
    ) -> Result<SummaryOutput, SummaryModelError> {
        let start = Instant::now();

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .temperature(0.2)
            .max_tokens(512u32)
            .messages([
                ChatCompletionRequestSystemMessage::from(SUMMARY_SYSTEM_PROMPT).into(),
                ChatCompletionRequestUserMessage::from(text.to_string()).into(),
            ])
            .build()?;

        let response = self.client.chat().create(request).await?;

        let text = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .filter(|content| !content.trim().is_empty())
            .ok_or(SummaryModelError::EmptyResponse)?;

        Ok(SummaryOutput {
            text,
            provider: self.provider.clone(),
            model: self.model.clone(),
            latency_ms: start.elapsed().as_millis() as i32,
        })
    }
}

#[derive(Debug, Error, Diagnostic)]
#[error("invalid default model key {0:?}; expected one of strong, mid, budget")]
pub struct InvalidDefaultModelKey(String);

pub struct ModelRegistry {
    default_key: ModelKey,
    strong: Arc<dyn SummaryModel>,
    mid: Arc<dyn SummaryModel>,
    budget: Arc<dyn SummaryModel>,
}

impl ModelRegistry {
    pub fn from_config(config: &LlmConfig) -> Result<Self, InvalidDefaultModelKey> {
        let default_key = config
            .default_model_key
            .trim()
            .to_lowercase()
            .parse::<ModelKey>()
            .map_err(|_| InvalidDefaultModelKey(config.default_model_key.clone()))?;

        Ok(Self {
            default_key,
            strong: Self::build_tier(config, ModelKey::Strong),
            mid: Self::build_tier(config, ModelKey::Mid),
            budget: Self::build_tier(config, ModelKey::Budget),
        })
    }

    fn build_tier(config: &LlmConfig, key: ModelKey) -> Arc<dyn SummaryModel> {
        let tier = config.tier(key);
        match tier.api_key {
            Some(api_key) if tier.provider != "placeholder" => Arc::new(OpenAiModel::new(
                tier.provider,
                tier.model,
                tier.base_url,
                api_key,
            )),
            _ => Arc::new(PlaceholderModel::new(key)),
        }
    }

    pub fn default_key(&self) -> ModelKey {
        self.default_key
    }

    pub fn model(&self, key: ModelKey) -> Arc<dyn SummaryModel> {
        match key {
            ModelKey::Strong => Arc::clone(&self.strong),
            ModelKey::Mid => Arc::clone(&self.mid),
            ModelKey::Budget => Arc::clone(&self.budget),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn placeholder_output_is_deterministic_and_within_the_word_cap() {
        let model = PlaceholderModel::new(ModelKey::Mid);
        let first = model.generate("ignored", PROMPT_VERSION).await.unwrap();
        let second = model.generate("ignored", PROMPT_VERSION).await.unwrap();

        assert_eq!(first.text, second.text);
        assert_eq!(first.provider, "placeholder");
        assert_eq!(first.model, "mid:v0");
        assert!(first.text.split_whitespace().count() <= 120);
    }

    #[test]
    fn registry_rejects_unknown_default_keys() {
        let config = LlmConfig {
            default_model_key: "turbo".to_string(),
            ..LlmConfig::default()
        };
        assert!(ModelRegistry::from_config(&config).is_err());
    }

    #[test]
    fn registry_defaults_are_usable() {
        let registry = ModelRegistry::from_config(&LlmConfig::default()).unwrap();
        assert_eq!(registry.default_key(), ModelKey::Mid);
    }
}
