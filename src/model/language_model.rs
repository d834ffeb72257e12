use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;

use crate::{
    constants::{DEFAULT_MAX_TOKENS, DEFAULT_SEED, DEFAULT_TEMPERATURE},
    model::{
        ChatTemplate, LocalLangModel, ModelSource,
        custom::{CustomLangModel, CustomLangModelInferFunc},
    },
    utils::BoxStream,
    value::Message,
};

/// Configuration parameters that control one streaming generation call.
///
/// ## `temperature`
/// Sampling temperature. `0.0` (the default) selects the most likely token every step, which
/// makes replies deterministic.
///
/// ## `top_p`
/// Nucleus sampling cutoff, only consulted when `temperature > 0`.
///
/// ## `max_tokens`
/// Upper bound on generated tokens for a single reply.
///
/// ## `seed`
/// Seed of the sampler.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InferenceConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            temperature: Some(DEFAULT_TEMPERATURE),
            top_p: None,
            max_tokens: Some(DEFAULT_MAX_TOKENS),
            seed: None,
        }
    }
}

impl InferenceConfig {
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub(crate) fn temperature_or_default(&self) -> f64 {
        self.temperature.unwrap_or(DEFAULT_TEMPERATURE)
    }

    pub(crate) fn max_tokens_or_default(&self) -> usize {
        self.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS)
    }

    pub(crate) fn seed_or_default(&self) -> u64 {
        self.seed.unwrap_or(DEFAULT_SEED)
    }
}

pub trait LangModelInference {
    /// Serializes the conversation into a single prompt with the model's chat template.
    fn apply_chat_template(&self, msgs: &[Message]) -> anyhow::Result<String>;

    /// Number of tokens `text` encodes to, without special tokens.
    fn count_tokens(&self, text: &str) -> anyhow::Result<usize>;

    /// Generates a reply to `prompt`, yielding decoded text fragments as they are produced.
    ///
    /// The stream is finite, ends on an end-of-sequence token or `max_tokens`, and cannot be
    /// restarted. Dropping it early stops generation.
    fn stream_generate<'a>(
        &'a self,
        prompt: String,
        config: InferenceConfig,
    ) -> BoxStream<'a, anyhow::Result<String>>;
}

#[derive(Clone)]
enum LangModelInner {
    Local(LocalLangModel),
    Custom(CustomLangModel),
}

#[derive(Clone)]
pub struct LangModel {
    inner: LangModelInner,
}

static SHARED: OnceCell<LangModel> = OnceCell::const_new();

impl LangModel {
    pub async fn try_new_local(
        source: ModelSource,
        add_generation_prompt: bool,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            inner: LangModelInner::Local(
                LocalLangModel::try_new(source, add_generation_prompt).await?,
            ),
        })
    }

    pub fn new_custom(f: Arc<CustomLangModelInferFunc>, chat_template: ChatTemplate) -> Self {
        Self {
            inner: LangModelInner::Custom(CustomLangModel {
                infer_func: f,
                chat_template,
            }),
        }
    }

    /// The process-wide local model.
    ///
    /// The first caller loads it; concurrent callers wait for that single load and every later
    /// call returns the same handle, whatever `source` it passes. A failed load is not cached, so
    /// the next caller retries.
    pub async fn shared(source: ModelSource, add_generation_prompt: bool) -> anyhow::Result<Self> {
        SHARED
            .get_or_try_init(|| Self::try_new_local(source, add_generation_prompt))
            .await
            .cloned()
    }
}

impl LangModelInference for LangModel {
    fn apply_chat_template(&self, msgs: &[Message]) -> anyhow::Result<String> {
        match &self.inner {
            LangModelInner::Local(model) => model.apply_chat_template(msgs),
            LangModelInner::Custom(model) => model.apply_chat_template(msgs),
        }
    }

    fn count_tokens(&self, text: &str) -> anyhow::Result<usize> {
        match &self.inner {
            LangModelInner::Local(model) => model.count_tokens(text),
            LangModelInner::Custom(model) => model.count_tokens(text),
        }
    }

    fn stream_generate<'a>(
        &'a self,
        prompt: String,
        config: InferenceConfig,
    ) -> BoxStream<'a, anyhow::Result<String>> {
        match &self.inner {
            LangModelInner::Local(model) => model.stream_generate(prompt, config),
            LangModelInner::Custom(model) => model.stream_generate(prompt, config),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_greedy_with_token_cap() {
        let config = InferenceConfig::default();
        assert_eq!(config.temperature, Some(0.0));
        assert_eq!(config.max_tokens, Some(2048));
        assert_eq!(config.seed_or_default(), DEFAULT_SEED);

        let config = config.with_max_tokens(1000).with_temperature(0.7).with_seed(7);
        assert_eq!(config.max_tokens_or_default(), 1000);
        assert_eq!(config.temperature_or_default(), 0.7);
        assert_eq!(config.seed_or_default(), 7);
    }

    #[test]
    fn config_serializes_camel_case_and_skips_unset() {
        let json = serde_json::to_value(InferenceConfig::default()).unwrap();
        assert_eq!(json, serde_json::json!({"temperature": 0.0, "maxTokens": 2048}));
    }
}
