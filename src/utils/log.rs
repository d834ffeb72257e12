pub fn debug(s: impl Into<String> + std::fmt::Display) {
    log::debug!("{}", s);
}

pub fn info(s: impl Into<String> + std::fmt::Display) {
    log::info!("{}", s);
}

pub fn warn(s: impl Into<String> + std::fmt::Display) {
    log::warn!("{}", s);
}

pub fn error(s: impl Into<String> + std::fmt::Display) {
    log::error!("{}", s);
}

/// Installs the process logger. `RUST_LOG` overrides the given default filter.
pub fn init(default_filter: &str) {
    let env = env_logger::Env::default().default_filter_or(default_filter);
    let _ = env_logger::Builder::from_env(env)
        .format_timestamp_millis()
        .try_init();
}
