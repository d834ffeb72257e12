use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use hf_hub::api::tokio::Api;
use serde::{Deserialize, Serialize};

use crate::{
    constants::{DEFAULT_MODEL, DEFAULT_MODEL_FILE, DEFAULT_TOKENIZER},
    utils::log,
};

/// Where the weights and tokenizer of a local model come from.
///
/// `model` and `tokenizer` are each either a Hugging Face repo id or a local path. A local
/// `model` may point at the `.gguf` file itself or at the directory holding `model_file`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelSource {
    pub model: String,

    pub model_file: String,

    /// Defaults to the directory of a local model, or to a known tokenizer repo otherwise.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokenizer: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub adapter: Option<String>,
}

impl Default for ModelSource {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_owned(),
            model_file: DEFAULT_MODEL_FILE.to_owned(),
            tokenizer: None,
            adapter: None,
        }
    }
}

/// Files of a model on local disk.
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedModelFiles {
    pub weights: PathBuf,
    pub tokenizer: PathBuf,
    pub tokenizer_config: PathBuf,
}

impl ModelSource {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }

    pub fn with_model_file(mut self, model_file: impl Into<String>) -> Self {
        self.model_file = model_file.into();
        self
    }

    pub fn with_tokenizer(mut self, tokenizer: impl Into<String>) -> Self {
        self.tokenizer = Some(tokenizer.into());
        self
    }

    pub fn with_adapter(mut self, adapter: impl Into<String>) -> Self {
        self.adapter = Some(adapter.into());
        self
    }

    /// Directory, repo id, or path the tokenizer files are read from.
    pub fn tokenizer_location(&self) -> String {
        if let Some(tokenizer) = &self.tokenizer {
            return tokenizer.clone();
        }
        match self.local_weights() {
            Some(weights) => weights
                .parent()
                .map(|dir| dir.to_string_lossy().into_owned())
                .unwrap_or_else(|| ".".to_owned()),
            None => DEFAULT_TOKENIZER.to_owned(),
        }
    }

    /// Whether `model` refers to files on disk rather than a hub repo.
    pub fn is_local(&self) -> bool {
        self.local_weights().is_some()
    }

    fn local_weights(&self) -> Option<PathBuf> {
        let path = Path::new(&self.model);
        if path.is_file() {
            Some(path.to_path_buf())
        } else if path.is_dir() {
            Some(path.join(&self.model_file))
        } else {
            None
        }
    }

    /// Downloads (or finds in the hub cache) every file the model needs.
    pub async fn resolve(&self) -> anyhow::Result<ResolvedModelFiles> {
        if let Some(adapter) = &self.adapter {
            bail!("adapter {adapter} was configured, but adapters cannot be applied to GGUF models");
        }

        let mut api = None;

        let weights = match self.local_weights() {
            Some(path) => {
                if !path.is_file() {
                    bail!("model file {} does not exist", path.display());
                }
                path
            }
            None => {
                log::info(format!("Fetching {} from {}", self.model_file, self.model));
                hub(&mut api)?
                    .model(self.model.clone())
                    .get(&self.model_file)
                    .await
                    .with_context(|| {
                        format!("failed to fetch {} from {}", self.model_file, self.model)
                    })?
            }
        };

        let location = self.tokenizer_location();
        let dir = Path::new(&location);
        let (tokenizer, tokenizer_config) = if dir.is_dir() {
            let tokenizer = dir.join("tokenizer.json");
            let tokenizer_config = dir.join("tokenizer_config.json");
            for file in [&tokenizer, &tokenizer_config] {
                if !file.is_file() {
                    bail!("tokenizer file {} does not exist", file.display());
                }
            }
            (tokenizer, tokenizer_config)
        } else {
            log::info(format!("Fetching tokenizer from {location}"));
            let repo = hub(&mut api)?.model(location.clone());
            let tokenizer = repo
                .get("tokenizer.json")
                .await
                .with_context(|| format!("failed to fetch tokenizer.json from {location}"))?;
            let tokenizer_config = repo
                .get("tokenizer_config.json")
                .await
                .with_context(|| format!("failed to fetch tokenizer_config.json from {location}"))?;
            (tokenizer, tokenizer_config)
        };

        Ok(ResolvedModelFiles {
            weights,
            tokenizer,
            tokenizer_config,
        })
    }
}

fn hub(api: &mut Option<Api>) -> anyhow::Result<&Api> {
    if api.is_none() {
        *api = Some(Api::new().context("failed to initialize the Hugging Face hub client")?);
    }
    api.as_ref().context("hub client missing")
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("localchat-{name}-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn defaults_point_at_hub_repos() {
        let source = ModelSource::default();
        assert_eq!(source.model, "bartowski/Llama-3.2-1B-Instruct-GGUF");
        assert_eq!(source.model_file, "Llama-3.2-1B-Instruct-Q4_K_M.gguf");
        assert!(!source.is_local());
        assert_eq!(source.tokenizer_location(), "unsloth/Llama-3.2-1B-Instruct");
    }

    #[test]
    fn explicit_tokenizer_wins() {
        let source = ModelSource::new("some/repo").with_tokenizer("other/repo");
        assert_eq!(source.tokenizer_location(), "other/repo");
    }

    #[test]
    fn local_gguf_reads_tokenizer_next_to_it() {
        let dir = scratch_dir("gguf");
        let weights = dir.join("tiny.gguf");
        fs::write(&weights, b"").unwrap();

        let source = ModelSource::new(weights.to_string_lossy());
        assert!(source.is_local());
        assert_eq!(source.tokenizer_location(), dir.to_string_lossy());
        fs::remove_dir_all(dir).unwrap();
    }

    crate::async_test! {
        async fn resolves_local_directory() {
            let dir = scratch_dir("resolve");
            for file in ["model.gguf", "tokenizer.json", "tokenizer_config.json"] {
                fs::write(dir.join(file), b"{}").unwrap();
            }

            let files = ModelSource::new(dir.to_string_lossy())
                .with_model_file("model.gguf")
                .resolve()
                .await
                .unwrap();
            assert_eq!(files.weights, dir.join("model.gguf"));
            assert_eq!(files.tokenizer, dir.join("tokenizer.json"));
            assert_eq!(files.tokenizer_config, dir.join("tokenizer_config.json"));
            fs::remove_dir_all(dir).unwrap();
        }
    }

    crate::async_test! {
        async fn missing_local_files_are_reported() {
            let dir = scratch_dir("missing");
            let err = ModelSource::new(dir.to_string_lossy())
                .with_model_file("absent.gguf")
                .resolve()
                .await
                .unwrap_err();
            assert!(err.to_string().contains("absent.gguf"));
            fs::remove_dir_all(dir).unwrap();
        }
    }

    crate::async_test! {
        async fn adapter_is_rejected() {
            let err = ModelSource::default()
                .with_adapter("my/lora")
                .resolve()
                .await
                .unwrap_err();
            assert!(err.to_string().contains("my/lora"));
        }
    }
}
