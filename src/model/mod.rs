pub(crate) mod custom;
pub(crate) mod header_filter;
pub(crate) mod language_model;
pub(crate) mod local;

pub use custom::{CustomLangModel, CustomLangModelInferFunc};
pub use header_filter::{HeaderTagFilter, strip_header_tag};
pub use language_model::{InferenceConfig, LangModel, LangModelInference};
pub use local::{ChatTemplate, LocalLangModel, ModelSource, Tokenizer};
