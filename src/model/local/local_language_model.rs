use std::{collections::HashSet, sync::Arc, thread, time::Instant};

use anyhow::Context;
use tokio::sync::mpsc;

use super::{
    chat_template::ChatTemplate,
    inferencer::{LanguageModelInferencer, LogitsSource, Sampler, get_accelerator, get_device},
    model_source::ModelSource,
    tokenizer::Tokenizer,
};
use crate::{
    constants::CONTEXT_LENGTH,
    model::{InferenceConfig, LangModelInference},
    utils::{BoxStream, log},
    value::Message,
};

/// End-of-turn markers of common chat formats, honored when the vocabulary has them.
const EOS_CANDIDATES: [&str; 4] = ["<|eot_id|>", "<|end_of_text|>", "<|im_end|>", "</s>"];

struct Request {
    prompt: String,
    config: InferenceConfig,
    tx_resp: mpsc::UnboundedSender<anyhow::Result<String>>,
}

/// Handle to a GGUF model served by a dedicated worker thread.
///
/// Clones share the worker. Requests are queued and served one at a time.
#[derive(Clone, Debug)]
pub struct LocalLangModel {
    tx: Arc<mpsc::Sender<Request>>,
    chat_template: ChatTemplate,
    tokenizer: Arc<Tokenizer>,
}

impl LocalLangModel {
    pub async fn try_new(source: ModelSource, add_generation_prompt: bool) -> anyhow::Result<Self> {
        log::info(format!(
            "Loading {} ({}) on {}",
            source.model,
            source.model_file,
            get_accelerator()
        ));
        let files = source.resolve().await?;

        let tokenizer = Tokenizer::from_file(&files.tokenizer)?;
        let tokenizer_config = std::fs::read_to_string(&files.tokenizer_config)
            .with_context(|| format!("failed to read {}", files.tokenizer_config.display()))?;
        let chat_template =
            ChatTemplate::from_tokenizer_config(source.tokenizer_location(), &tokenizer_config)?
                .with_add_generation_prompt(add_generation_prompt);
        let eos_ids = eos_token_ids(&tokenizer, chat_template.eos_token());
        log::debug(format!("End-of-sequence ids: {eos_ids:?}"));

        let started = Instant::now();
        let weights = files.weights.clone();
        let inferencer = tokio::task::spawn_blocking(move || {
            LanguageModelInferencer::load(&weights, get_device()?)
        })
        .await
        .context("model loading task panicked")??;
        log::info(format!(
            "Model loaded from {} in {:.1}s",
            files.weights.display(),
            started.elapsed().as_secs_f64()
        ));

        let tokenizer = Arc::new(tokenizer);
        let (tx, rx) = mpsc::channel(1);
        let worker = Worker {
            inferencer,
            tokenizer: tokenizer.clone(),
            eos_ids,
            context_limit: CONTEXT_LENGTH,
        };
        thread::Builder::new()
            .name("localchat-inference".to_owned())
            .spawn(move || worker.run(rx))
            .context("failed to spawn the inference thread")?;

        Ok(Self {
            tx: Arc::new(tx),
            chat_template,
            tokenizer,
        })
    }
}

fn eos_token_ids(tokenizer: &Tokenizer, eos_token: Option<&str>) -> HashSet<u32> {
    eos_token
        .into_iter()
        .chain(EOS_CANDIDATES)
        .filter_map(|token| tokenizer.token_to_id(token))
        .collect()
}

struct Worker<M> {
    inferencer: M,
    tokenizer: Arc<Tokenizer>,
    eos_ids: HashSet<u32>,
    context_limit: usize,
}

impl<M: LogitsSource> Worker<M> {
    fn run(mut self, mut rx: mpsc::Receiver<Request>) {
        while let Some(req) = rx.blocking_recv() {
            let Request {
                prompt,
                config,
                tx_resp,
            } = req;
            if let Err(e) = self.generate(&prompt, &config, &tx_resp) {
                log::error(format!("Generation failed: {e:#}"));
                // The receiver may already be gone.
                let _ = tx_resp.send(Err(e));
            }
        }
        log::debug("Inference worker stopped");
    }

    fn generate(
        &mut self,
        prompt: &str,
        config: &InferenceConfig,
        tx_resp: &mpsc::UnboundedSender<anyhow::Result<String>>,
    ) -> anyhow::Result<()> {
        let input_tokens = self.tokenizer.encode(prompt, false)?;
        let mut sampler = Sampler::new(
            config.temperature_or_default(),
            config.top_p,
            config.seed_or_default(),
        );

        let mut logits = self.inferencer.prefill(&input_tokens)?;
        let mut agg_tokens = Vec::<u32>::new();

        for _ in 0..config.max_tokens_or_default() {
            let new_token = sampler.sample(&logits)?;
            if self.eos_ids.contains(&new_token) {
                break;
            }

            agg_tokens.push(new_token);
            let s = self.tokenizer.decode(&agg_tokens, false)?;
            // Incomplete UTF-8 sequence; wait for the rest of it.
            if !s.ends_with('�') {
                agg_tokens.clear();
                if tx_resp.send(Ok(s)).is_err() {
                    log::debug("Reply stream dropped, stopping generation");
                    return Ok(());
                }
            }

            if self.inferencer.context_len() >= self.context_limit {
                log::warn("Context length limit reached, reply truncated");
                break;
            }
            logits = self.inferencer.decode(new_token)?;
        }

        // The held-back tail will not be completed any more.
        if !agg_tokens.is_empty() {
            let s = self.tokenizer.decode(&agg_tokens, false)?;
            let _ = tx_resp.send(Ok(s));
        }
        Ok(())
    }
}

impl LangModelInference for LocalLangModel {
    fn apply_chat_template(&self, msgs: &[Message]) -> anyhow::Result<String> {
        self.chat_template.apply(msgs)
    }

    fn count_tokens(&self, text: &str) -> anyhow::Result<usize> {
        Ok(self.tokenizer.encode(text, false)?.len())
    }

    fn stream_generate<'a>(
        &'a self,
        prompt: String,
        config: InferenceConfig,
    ) -> BoxStream<'a, anyhow::Result<String>> {
        let (tx_resp, mut rx_resp) = mpsc::unbounded_channel();
        let req = Request {
            prompt,
            config,
            tx_resp,
        };
        let tx = self.tx.clone();
        let strm = async_stream::stream! {
            if tx.send(req).await.is_err() {
                yield Err(anyhow::anyhow!("inference worker is not running"));
                return;
            }
            while let Some(resp) = rx_resp.recv().await {
                yield resp;
            }
        };
        Box::pin(strm)
    }
}
