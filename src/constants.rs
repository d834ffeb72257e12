/// Assistant-turn header that Llama 3 style chat templates wrap around each reply.
pub const HEADER_TAG: &str = "<|start_header_id|>assistant<|end_header_id|>";

pub const DEFAULT_MODEL: &str = "bartowski/Llama-3.2-1B-Instruct-GGUF";
pub const DEFAULT_MODEL_FILE: &str = "Llama-3.2-1B-Instruct-Q4_K_M.gguf";
pub const DEFAULT_TOKENIZER: &str = "unsloth/Llama-3.2-1B-Instruct";

pub const DEFAULT_MAX_TOKENS: usize = 2048;
pub const DEFAULT_TEMPERATURE: f64 = 0.0;
pub const DEFAULT_SEED: u64 = 299_792_458;

/// Positions covered by the rotary tables of the quantized llama weights.
pub const CONTEXT_LENGTH: usize = 4096;

pub const PAGE_TITLE: &str = "Local Chatbot";
