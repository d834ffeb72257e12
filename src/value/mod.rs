pub(crate) mod message;

pub use message::{Message, Role};
