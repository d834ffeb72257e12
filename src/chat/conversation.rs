use serde::Serialize;

use crate::{
    model::LangModelInference,
    value::{Message, Role},
};

/// The ordered messages of one chat session.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, role: Role, content: impl Into<String>) {
        self.messages.push(Message::new(role, content));
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Renders the whole conversation with the model's chat template.
    pub fn to_prompt(&self, model: &impl LangModelInference) -> anyhow::Result<String> {
        model.apply_chat_template(&self.messages)
    }
}
