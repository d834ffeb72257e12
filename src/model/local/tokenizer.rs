use std::path::Path;

use anyhow::anyhow;

/// Thin wrapper over a Hugging Face `tokenizer.json`.
#[derive(Debug, Clone)]
pub struct Tokenizer {
    inner: tokenizers::Tokenizer,
}

impl Tokenizer {
    pub fn new(config: &str) -> anyhow::Result<Self> {
        let inner = config
            .parse::<tokenizers::Tokenizer>()
            .map_err(|e| anyhow!("tokenizer.json is not valid: {e}"))?;
        Ok(Self { inner })
    }

    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let inner = tokenizers::Tokenizer::from_file(path)
            .map_err(|e| anyhow!("failed to load tokenizer from {}: {e}", path.display()))?;
        Ok(Self { inner })
    }

    pub fn encode(&self, text: &str, add_special_tokens: bool) -> anyhow::Result<Vec<u32>> {
        let encoding = self
            .inner
            .encode(text, add_special_tokens)
            .map_err(|e| anyhow!("tokenizer::encode failed: {e}"))?;
        Ok(encoding.get_ids().to_vec())
    }

    pub fn decode(&self, ids: &[u32], skip_special_tokens: bool) -> anyhow::Result<String> {
        self.inner
            .decode(ids, skip_special_tokens)
            .map_err(|e| anyhow!("tokenizer::decode failed: {e}"))
    }

    pub fn token_to_id(&self, token: &str) -> Option<u32> {
        self.inner.token_to_id(token)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// A word-level tokenizer small enough to inline.
    pub(crate) const WORD_LEVEL: &str = r#"{
        "version": "1.0",
        "truncation": null,
        "padding": null,
        "added_tokens": [
            {"id": 0, "content": "<unk>", "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true},
            {"id": 1, "content": "<|eot_id|>", "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true}
        ],
        "normalizer": null,
        "pre_tokenizer": {"type": "Whitespace"},
        "post_processor": null,
        "decoder": null,
        "model": {
            "type": "WordLevel",
            "vocab": {"<unk>": 0, "<|eot_id|>": 1, "hello": 2, "world": 3, "!": 4, "\ufffd": 5},
            "unk_token": "<unk>"
        }
    }"#;

    #[test]
    fn encodes_and_looks_up_special_tokens() {
        let tokenizer = Tokenizer::new(WORD_LEVEL).unwrap();
        assert_eq!(tokenizer.encode("hello world !", false).unwrap(), vec![2, 3, 4]);
        assert_eq!(tokenizer.encode("hello mars", false).unwrap(), vec![2, 0]);
        assert_eq!(tokenizer.token_to_id("<|eot_id|>"), Some(1));
        assert_eq!(tokenizer.token_to_id("</s>"), None);
    }

    #[test]
    fn decode_can_skip_special_tokens() {
        let tokenizer = Tokenizer::new(WORD_LEVEL).unwrap();
        assert_eq!(tokenizer.decode(&[2, 1], true).unwrap(), "hello");
        assert!(tokenizer.decode(&[2, 1], false).unwrap().contains("<|eot_id|>"));
    }

    #[test]
    fn invalid_config_is_an_error() {
        assert!(Tokenizer::new("{}").is_err());
    }
}
