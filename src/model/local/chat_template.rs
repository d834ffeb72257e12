use std::sync::OnceLock;

use anyhow::{Context, bail};
use minijinja::{Environment, Error, ErrorKind, context};
use minijinja_contrib::{add_to_environment, pycompat::unknown_method_callback};
use parking_lot::{Mutex, MutexGuard};
use serde::Deserialize;

use crate::value::Message;

/// Global Environment (initialized once)
static ENV: OnceLock<Mutex<Environment<'static>>> = OnceLock::new();

fn get_env() -> MutexGuard<'static, Environment<'static>> {
    ENV.get_or_init(|| {
        let mut e = Environment::new();
        add_to_environment(&mut e);
        e.set_unknown_method_callback(unknown_method_callback);
        // Hugging Face renders chat templates with both enabled.
        e.set_trim_blocks(true);
        e.set_lstrip_blocks(true);
        e.add_function("raise_exception", |msg: String| -> Result<String, Error> {
            Err(Error::new(ErrorKind::InvalidOperation, msg))
        });
        Mutex::new(e)
    })
    .lock()
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TemplateField {
    Single(String),
    Named(Vec<NamedTemplate>),
}

#[derive(Deserialize)]
struct NamedTemplate {
    name: String,
    template: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SpecialToken {
    Text(String),
    Added { content: String },
}

impl SpecialToken {
    fn into_content(self) -> String {
        match self {
            SpecialToken::Text(s) => s,
            SpecialToken::Added { content } => content,
        }
    }
}

/// The parts of `tokenizer_config.json` a chat template needs.
#[derive(Deserialize)]
struct TokenizerConfig {
    chat_template: Option<TemplateField>,
    bos_token: Option<SpecialToken>,
    eos_token: Option<SpecialToken>,
}

/// A Jinja chat template registered in the process-global environment under `key`.
#[derive(Debug, Clone)]
pub struct ChatTemplate {
    key: String,
    bos_token: Option<String>,
    eos_token: Option<String>,
    add_generation_prompt: bool,
}

impl ChatTemplate {
    /// Registers `source` under `key`. A key that is already registered keeps its first source.
    pub fn new(key: impl Into<String>, source: impl Into<String>) -> anyhow::Result<Self> {
        let key = key.into();
        let mut env = get_env();
        if env.get_template(&key).is_err() {
            env.add_template_owned(key.clone(), source.into())
                .with_context(|| format!("invalid chat template for {key}"))?;
        }

        Ok(Self {
            key,
            bos_token: None,
            eos_token: None,
            add_generation_prompt: false,
        })
    }

    /// Builds a template from the contents of a `tokenizer_config.json`.
    ///
    /// `chat_template` may be a plain string or a list of named templates, in which case the one
    /// named `default` wins.
    pub fn from_tokenizer_config(key: impl Into<String>, json: &str) -> anyhow::Result<Self> {
        let config: TokenizerConfig =
            serde_json::from_str(json).context("tokenizer_config.json is not valid")?;
        let source = match config.chat_template {
            Some(TemplateField::Single(source)) => source,
            Some(TemplateField::Named(templates)) => {
                let pick = templates
                    .iter()
                    .position(|t| t.name == "default")
                    .unwrap_or(0);
                match templates.into_iter().nth(pick) {
                    Some(t) => t.template,
                    None => bail!("tokenizer_config.json has an empty chat_template list"),
                }
            }
            None => bail!("tokenizer_config.json has no chat_template"),
        };

        let mut template = Self::new(key, source)?;
        template.bos_token = config.bos_token.map(SpecialToken::into_content);
        template.eos_token = config.eos_token.map(SpecialToken::into_content);
        Ok(template)
    }

    pub fn with_bos_token(mut self, token: impl Into<String>) -> Self {
        self.bos_token = Some(token.into());
        self
    }

    pub fn with_eos_token(mut self, token: impl Into<String>) -> Self {
        self.eos_token = Some(token.into());
        self
    }

    /// Whether the rendered prompt ends with an opened assistant turn. Off by default, so the
    /// model writes the assistant header itself.
    pub fn with_add_generation_prompt(mut self, add_generation_prompt: bool) -> Self {
        self.add_generation_prompt = add_generation_prompt;
        self
    }

    pub fn eos_token(&self) -> Option<&str> {
        self.eos_token.as_deref()
    }

    pub fn apply(&self, messages: &[Message]) -> anyhow::Result<String> {
        let ctx = context!(
            messages => messages,
            bos_token => self.bos_token.as_deref().unwrap_or_default(),
            eos_token => self.eos_token.as_deref().unwrap_or_default(),
            add_generation_prompt => self.add_generation_prompt,
        );
        let env = get_env();
        let template = env
            .get_template(&self.key)
            .with_context(|| format!("chat template {} is not registered", self.key))?;
        template.render(ctx).context("minijinja::render failed")
    }
}
