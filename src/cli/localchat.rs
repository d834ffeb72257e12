use std::time::Duration;

use anyhow::Context;
use clap::{ArgAction, Parser, builder::BoolishValueParser};

use crate::{
    chat::{TurnConfig, TurnOrchestrator},
    config::{AppConfig, DEFAULT_HOST, DEFAULT_PORT},
    constants::{
        DEFAULT_MAX_TOKENS, DEFAULT_MODEL, DEFAULT_MODEL_FILE, DEFAULT_TEMPERATURE, HEADER_TAG,
        PAGE_TITLE,
    },
    model::{InferenceConfig, LangModel, ModelSource},
    server::{AppState, DEFAULT_SESSION_IDLE_SECS, SessionStore, router},
    utils::log,
};

/// Every option can also be set through the environment or a `.env` file.
#[derive(Parser, Debug)]
#[command(name = "localchat", version, about = "Chat with a local GGUF model in the browser", long_about = None)]
struct Cli {
    #[arg(long, env = "MODEL", default_value = DEFAULT_MODEL, help = "Hugging Face repo id, directory, or .gguf file")]
    model: String,

    #[arg(long, env = "MODEL_FILE", default_value = DEFAULT_MODEL_FILE, help = "GGUF file inside the repo or directory")]
    model_file: String,

    #[arg(
        long,
        env = "TOKENIZER",
        help = "Repo id or directory holding tokenizer.json and tokenizer_config.json. Defaults to the model directory for local models."
    )]
    tokenizer: Option<String>,

    #[arg(long, env = "ADAPTER", help = "Adapter weights. Not supported by GGUF models; setting it fails the load.")]
    adapter: Option<String>,

    #[arg(long, env = "MAX_TOKENS", default_value_t = DEFAULT_MAX_TOKENS)]
    max_tokens: usize,

    #[arg(long, env = "TEMPERATURE", default_value_t = DEFAULT_TEMPERATURE)]
    temperature: f64,

    #[arg(long, env = "TOP_P", help = "Nucleus sampling cutoff, used when temperature > 0")]
    top_p: Option<f64>,

    #[arg(long, env = "SEED")]
    seed: Option<u64>,

    #[arg(
        long,
        env = "STRIP_HEADER_TAG",
        default_value_t = true,
        action = ArgAction::Set,
        value_parser = BoolishValueParser::new(),
        help = format!("Remove a leading {HEADER_TAG} from replies")
    )]
    strip_header_tag: bool,

    #[arg(
        long,
        env = "ADD_GENERATION_PROMPT",
        default_value_t = false,
        action = ArgAction::Set,
        value_parser = BoolishValueParser::new()
    )]
    add_generation_prompt: bool,

    #[arg(long, env = "HOST", default_value = DEFAULT_HOST)]
    host: String,

    #[arg(long, env = "PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    #[arg(
        long,
        env = "SESSION_IDLE_SECS",
        default_value_t = DEFAULT_SESSION_IDLE_SECS,
        help = "Drop a browser session's conversation after this many idle seconds"
    )]
    session_idle_secs: u64,

    #[arg(long, env = "RUST_LOG", default_value = "info")]
    log_level: String,
}

impl From<Cli> for AppConfig {
    fn from(cli: Cli) -> Self {
        let mut source = ModelSource::new(cli.model).with_model_file(cli.model_file);
        source.tokenizer = cli.tokenizer;
        source.adapter = cli.adapter;

        let mut inference = InferenceConfig::default()
            .with_max_tokens(cli.max_tokens)
            .with_temperature(cli.temperature);
        inference.top_p = cli.top_p;
        inference.seed = cli.seed;

        AppConfig {
            source,
            turn: TurnConfig::default()
                .with_inference(inference)
                .with_strip_header_tag(cli.strip_header_tag),
            add_generation_prompt: cli.add_generation_prompt,
            host: cli.host,
            port: cli.port,
            session_idle_secs: cli.session_idle_secs,
        }
    }
}

pub async fn localchat_cli(args: Vec<String>) -> anyhow::Result<()> {
    // Loaded before parsing so the file can supply any option.
    let dotenv = dotenvy::dotenv();
    let cli = Cli::parse_from(args);
    log::init(&cli.log_level);
    if let Ok(path) = &dotenv {
        log::info(format!("Loaded environment from {}", path.display()));
    }

    let config = AppConfig::from(cli);
    serve(config).await
}

/// Loads the model, then serves the chat page until interrupted.
pub async fn serve(config: AppConfig) -> anyhow::Result<()> {
    log::info(format!("Configuration: {config}"));

    let model = LangModel::shared(config.source.clone(), config.add_generation_prompt)
        .await
        .context("failed to load the model")?;
    let sessions = SessionStore::with_idle_ttl(Duration::from_secs(config.session_idle_secs));
    let state = AppState::new(TurnOrchestrator::new(model, config.turn.clone()))
        .with_session_store(sessions);

    let listener = tokio::net::TcpListener::bind(config.address())
        .await
        .with_context(|| format!("failed to bind {}", config.address()))?;
    log::info(format!(
        "{PAGE_TITLE} is running on http://{}",
        listener.local_addr()?
    ));

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::warn(format!("Cannot listen for Ctrl-C: {e}"));
        std::future::pending::<()>().await;
    }
    log::info("Shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> AppConfig {
        let argv = std::iter::once("localchat").chain(args.iter().copied());
        AppConfig::from(Cli::try_parse_from(argv).unwrap())
    }

    #[test]
    fn flags_map_onto_the_config() {
        let config = parse(&[
            "--model", "./models", "--model-file", "tiny.gguf", "--tokenizer", "./tok",
            "--max-tokens", "1000", "--temperature", "0.7", "--top-p", "0.9", "--seed", "7",
            "--strip-header-tag", "false", "--add-generation-prompt", "yes",
            "--host", "0.0.0.0", "--port", "9000", "--session-idle-secs", "60",
        ]);
        assert_eq!(config.source.model, "./models");
        assert_eq!(config.source.model_file, "tiny.gguf");
        assert_eq!(config.source.tokenizer.as_deref(), Some("./tok"));
        assert_eq!(config.turn.inference.max_tokens, Some(1000));
        assert_eq!(config.turn.inference.temperature, Some(0.7));
        assert_eq!(config.turn.inference.top_p, Some(0.9));
        assert_eq!(config.turn.inference.seed, Some(7));
        assert!(!config.turn.strip_header_tag);
        assert!(config.add_generation_prompt);
        assert_eq!(config.turn.header_tag, HEADER_TAG);
        assert_eq!(config.address(), "0.0.0.0:9000");
        assert_eq!(config.session_idle_secs, 60);
    }

    #[test]
    fn rejects_malformed_values() {
        for args in [
            ["localchat", "--port", "99999"],
            ["localchat", "--max-tokens", "-1"],
            ["localchat", "--strip-header-tag", "maybe"],
        ] {
            assert!(Cli::try_parse_from(args).is_err(), "{args:?}");
        }
    }
}
