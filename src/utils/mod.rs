pub(crate) mod log;
pub(crate) mod stream;

pub use stream::*;
