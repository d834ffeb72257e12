use std::path::Path;

use anyhow::{Context, bail};
use candle_core::{DType, Device, Tensor, quantized::gguf_file};
use candle_transformers::{
    generation::{LogitsProcessor, Sampling},
    models::quantized_llama::ModelWeights,
};

use crate::{constants::CONTEXT_LENGTH, utils::log};

pub fn get_accelerator() -> &'static str {
    #[cfg(feature = "cuda")]
    {
        "cuda"
    }
    #[cfg(all(feature = "metal", not(feature = "cuda")))]
    {
        "metal"
    }
    #[cfg(not(any(feature = "cuda", feature = "metal")))]
    {
        "cpu"
    }
}

pub fn get_device() -> anyhow::Result<Device> {
    let device = match get_accelerator() {
        "cuda" => Device::new_cuda(0)?,
        "metal" => Device::new_metal(0)?,
        _ => Device::Cpu,
    };
    Ok(device)
}

/// How much of a new prompt has to be run through the model.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PrefillPlan {
    /// Drop the cache and run the whole prompt from position 0.
    Restart,
    /// The cache already holds the first `n` prompt tokens.
    Extend(usize),
}

/// The cache can only be reused when it is a strict prefix of the new prompt, since candle's
/// cache cannot be rewound.
pub(crate) fn plan_prefill(history: &[u32], tokens: &[u32]) -> PrefillPlan {
    let lcp = history
        .iter()
        .zip(tokens.iter())
        .take_while(|(h, t)| h == t)
        .count();
    if lcp == 0 || lcp < history.len() || lcp == tokens.len() {
        PrefillPlan::Restart
    } else {
        PrefillPlan::Extend(lcp)
    }
}

/// A model that turns tokens into next-token logits, one position at a time.
pub(crate) trait LogitsSource {
    /// Number of positions held in the cache.
    fn context_len(&self) -> usize;

    /// Runs the prompt and returns the logits of its last position.
    fn prefill(&mut self, tokens: &[u32]) -> anyhow::Result<Tensor>;

    /// Feeds one token at the next position and returns the logits for the position after it.
    fn decode(&mut self, last_token: u32) -> anyhow::Result<Tensor>;
}

/// Quantized llama weights plus the tokens whose keys and values are in its cache.
pub struct LanguageModelInferencer {
    model: ModelWeights,
    device: Device,
    history: Vec<u32>,
}

impl std::fmt::Debug for LanguageModelInferencer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LanguageModelInferencer")
            .field("device", &self.device)
            .field("history_len", &self.history.len())
            .finish()
    }
}

impl LanguageModelInferencer {
    pub fn load(path: impl AsRef<Path>, device: Device) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let mut file = std::fs::File::open(path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        let content = gguf_file::Content::read(&mut file)
            .map_err(|e| e.with_path(path))
            .context("failed to parse gguf header")?;
        log::debug(format!(
            "{} tensors in {}",
            content.tensor_infos.len(),
            path.display()
        ));
        let model = ModelWeights::from_gguf(content, &mut file, &device)
            .context("failed to load model weights")?;
        Ok(Self {
            model,
            device,
            history: Vec::new(),
        })
    }

    pub fn clear(&mut self) {
        self.history.clear();
    }

    fn last_logits(logits: Tensor) -> anyhow::Result<Tensor> {
        Ok(logits.squeeze(0)?.to_dtype(DType::F32)?)
    }
}

impl LogitsSource for LanguageModelInferencer {
    fn context_len(&self) -> usize {
        self.history.len()
    }

    fn prefill(&mut self, tokens: &[u32]) -> anyhow::Result<Tensor> {
        if tokens.is_empty() {
            bail!("Token must not be empty");
        }
        if tokens.len() >= CONTEXT_LENGTH {
            bail!(
                "Context length limit exceed: prompt has {} tokens, limit is {CONTEXT_LENGTH}",
                tokens.len()
            );
        }

        match plan_prefill(&self.history, tokens) {
            PrefillPlan::Restart => {
                // Starting again at position 0 overwrites the cache.
                self.clear();
                let input = Tensor::new(tokens, &self.device)?.unsqueeze(0)?;
                let logits = self.model.forward(&input, 0)?;
                self.history = tokens.to_vec();
                Self::last_logits(logits)
            }
            PrefillPlan::Extend(lcp) => {
                log::debug(format!(
                    "Reusing {lcp} cached tokens, {} new",
                    tokens.len() - lcp
                ));
                // The attention mask only covers a fresh window, so continuation runs per token.
                let mut logits = None;
                for &token in &tokens[lcp..] {
                    logits = Some(self.decode(token)?);
                }
                logits.context("no new tokens to prefill")
            }
        }
    }

    fn decode(&mut self, last_token: u32) -> anyhow::Result<Tensor> {
        if self.history.len() >= CONTEXT_LENGTH {
            bail!("Context length limit exceed");
        }
        let input = Tensor::new(&[last_token], &self.device)?.unsqueeze(0)?;
        let logits = self.model.forward(&input, self.history.len())?;
        self.history.push(last_token);
        Self::last_logits(logits)
    }
}

/// Picks the next token from a row of logits.
pub struct Sampler {
    inner: LogitsProcessor,
}

impl Sampler {
    /// Greedy when `temperature <= 0`, nucleus sampling when `top_p` is set, plain sampling
    /// otherwise.
    pub fn new(temperature: f64, top_p: Option<f64>, seed: u64) -> Self {
        let sampling = if temperature <= 0.0 {
            Sampling::ArgMax
        } else {
            match top_p {
                Some(p) if p > 0.0 && p < 1.0 => Sampling::TopP { p, temperature },
                _ => Sampling::All { temperature },
            }
        };
        Self {
            inner: LogitsProcessor::from_sampling(seed, sampling),
        }
    }

    pub fn sample(&mut self, logits: &Tensor) -> anyhow::Result<u32> {
        Ok(self.inner.sample(logits)?)
    }
}
