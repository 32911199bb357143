//! Logging setup

/// `RUST_LOG` wins; the configured level is the fallback.
pub fn init_logging(level: &str) {
    let directives = std::env::var("RUST_LOG").unwrap_or_else(|_| level.to_string());
    pretty_env_logger::formatted_timed_builder()
        .parse_filters(&directives)
        .format_timestamp_millis()
        .init();
}
