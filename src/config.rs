use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{chat::TurnConfig, model::ModelSource, server::DEFAULT_SESSION_IDLE_SECS};

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8501;

/// Everything the server reads once at start.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    pub source: ModelSource,
    pub turn: TurnConfig,
    /// Whether prompts end with an opened assistant turn.
    pub add_generation_prompt: bool,
    pub host: String,
    pub port: u16,
    /// Seconds a browser session may stay untouched before its conversation is dropped.
    pub session_idle_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            source: ModelSource::default(),
            turn: TurnConfig::default(),
            add_generation_prompt: false,
            host: DEFAULT_HOST.to_owned(),
            port: DEFAULT_PORT,
            session_idle_secs: DEFAULT_SESSION_IDLE_SECS,
        }
    }
}

impl AppConfig {
    pub fn with_source(mut self, source: ModelSource) -> Self {
        self.source = source;
        self
    }

    pub fn with_turn(mut self, turn: TurnConfig) -> Self {
        self.turn = turn;
        self
    }

    pub fn with_address(mut self, host: impl Into<String>, port: u16) -> Self {
        self.host = host.into();
        self.port = port;
        self
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inference = &self.turn.inference;
        write!(
            f,
            "model={} file={} tokenizer={} max_tokens={} temperature={} strip_header_tag={} \
             add_generation_prompt={} address={} session_idle_secs={}",
            self.source.model,
            self.source.model_file,
            self.source.tokenizer_location(),
            inference.max_tokens_or_default(),
            inference.temperature_or_default(),
            self.turn.strip_header_tag,
            self.add_generation_prompt,
            self.address(),
            self.session_idle_secs,
        )?;
        if let Some(adapter) = &self.source.adapter {
            write!(f, " adapter={adapter}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_values() {
        let config = AppConfig::default();
        assert_eq!(config.address(), "127.0.0.1:8501");
        assert!(config.turn.strip_header_tag);
        assert!(!config.add_generation_prompt);
        assert_eq!(config.turn.inference.max_tokens, Some(2048));
        assert_eq!(config.turn.inference.temperature, Some(0.0));
        assert_eq!(config.source, ModelSource::default());
        assert_eq!(config.session_idle_secs, 3600);
    }

    #[test]
    fn summary_names_model_and_address() {
        let config = AppConfig::default()
            .with_source(ModelSource::new("my/repo").with_adapter("my/lora"))
            .with_address("0.0.0.0", 9000);
        let summary = config.to_string();
        assert!(summary.contains("model=my/repo"));
        assert!(summary.contains("address=0.0.0.0:9000"));
        assert!(summary.ends_with("adapter=my/lora"));
    }
}
