use log::LevelFilter;

/// Initialize logging for the hosting application.
/// Should be called once at startup; safe to call again (later calls no-op).
pub fn init_logging() {
    let _ = env_logger::builder()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .try_init();
}

/// Log level helper to determine if debug logging is enabled
pub fn is_debug_enabled() -> bool {
    log::log_enabled!(log::Level::Debug)
}
