mod chat_template;
mod inferencer;
mod local_language_model;
mod model_source;
mod tokenizer;

pub use chat_template::*;
pub use local_language_model::*;
pub use model_source::*;
pub use tokenizer::*;
