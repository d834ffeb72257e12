mod localchat;

pub use localchat::*;
