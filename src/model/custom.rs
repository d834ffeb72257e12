use std::sync::Arc;

use crate::{
    model::{ChatTemplate, InferenceConfig, LangModelInference},
    utils::BoxStream,
    value::Message,
};

pub type CustomLangModelInferFunc = dyn Fn(String, InferenceConfig) -> BoxStream<'static, anyhow::Result<String>>
    + Send
    + Sync;

/// A model whose generation is supplied by a closure.
///
/// Token counts are approximated by whitespace-separated words since there is no tokenizer.
#[derive(Clone)]
pub struct CustomLangModel {
    pub infer_func: Arc<CustomLangModelInferFunc>,
    pub chat_template: ChatTemplate,
}

impl LangModelInference for CustomLangModel {
    fn apply_chat_template(&self, msgs: &[Message]) -> anyhow::Result<String> {
        self.chat_template.apply(msgs)
    }

    fn count_tokens(&self, text: &str) -> anyhow::Result<usize> {
        Ok(text.split_whitespace().count())
    }

    fn stream_generate<'a>(
        &'a self,
        prompt: String,
        config: InferenceConfig,
    ) -> BoxStream<'a, anyhow::Result<String>> {
        (self.infer_func)(prompt, config)
    }
}
