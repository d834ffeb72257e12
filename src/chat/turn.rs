use std::time::Instant;

use futures::StreamExt as _;
use serde::{Deserialize, Serialize};

use super::{Conversation, GenerationStats};
use crate::{
    constants::HEADER_TAG,
    model::{InferenceConfig, LangModel, LangModelInference as _, strip_header_tag},
    utils::{BoxStream, log},
    value::{Message, Role},
};

/// Configuration for a chat turn.
///
/// ## `strip_header_tag`
/// When set, the first occurrence of `header_tag` in a reply is removed before it is shown or
/// stored. Models prompted without an opened assistant turn tend to start their reply with it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnConfig {
    pub inference: InferenceConfig,
    pub strip_header_tag: bool,
    pub header_tag: String,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            inference: InferenceConfig::default(),
            strip_header_tag: true,
            header_tag: HEADER_TAG.to_owned(),
        }
    }
}

impl TurnConfig {
    pub fn with_inference(mut self, inference: InferenceConfig) -> Self {
        self.inference = inference;
        self
    }

    pub fn with_strip_header_tag(mut self, strip_header_tag: bool) -> Self {
        self.strip_header_tag = strip_header_tag;
        self
    }

    pub fn with_header_tag(mut self, header_tag: impl Into<String>) -> Self {
        self.header_tag = header_tag.into();
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    /// Everything the assistant has said so far in this turn.
    Partial { content: String },
    /// The reply is complete and stored in the conversation.
    Finished {
        message: Message,
        stats: GenerationStats,
    },
}

/// Runs user turns against a shared model.
#[derive(Clone)]
pub struct TurnOrchestrator {
    model: LangModel,
    config: TurnConfig,
}

impl TurnOrchestrator {
    pub fn new(model: LangModel, config: TurnConfig) -> Self {
        Self { model, config }
    }

    /// Appends `text` as a user message, streams the reply, then appends it as an assistant
    /// message.
    ///
    /// Blank input yields nothing and leaves `conversation` untouched. If generation fails, the
    /// stream ends with the error; the user message stays and the partial reply is discarded.
    pub fn handle_user_turn<'a>(
        &'a self,
        conversation: &'a mut Conversation,
        text: impl Into<String>,
    ) -> BoxStream<'a, anyhow::Result<TurnEvent>> {
        let text = text.into();
        let strm = async_stream::try_stream! {
            if text.trim().is_empty() {
                return;
            }
            conversation.append(Role::User, text);
            let prompt = conversation.to_prompt(&self.model)?;

            let started = Instant::now();
            let mut fragments = self
                .model
                .stream_generate(prompt.clone(), self.config.inference.clone());
            if self.config.strip_header_tag {
                fragments = strip_header_tag(fragments, self.config.header_tag.clone());
            }

            let mut response = String::new();
            while let Some(fragment) = fragments.next().await {
                let fragment = fragment?;
                if fragment.is_empty() {
                    continue;
                }
                response.push_str(&fragment);
                yield TurnEvent::Partial { content: response.clone() };
            }
            let elapsed = started.elapsed().as_secs_f64();

            conversation.append(Role::Assistant, response.clone());
            let stats = GenerationStats::new(
                self.model.count_tokens(&response)?,
                self.model.count_tokens(&prompt)?,
                elapsed,
            );
            log::info(format!("{stats}"));
            yield TurnEvent::Finished {
                message: Message::assistant(response),
                stats,
            };
        };
        Box::pin(strm)
    }
}
