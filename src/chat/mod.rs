mod conversation;
mod stats;
mod turn;

pub use conversation::*;
pub use stats::*;
pub use turn::*;
