extern crate alloc;

pub mod chat;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub(crate) mod constants;
pub mod model;
pub mod server;
pub mod utils;
pub mod value;

#[cfg(feature = "cli")]
pub use cli::localchat_cli;
