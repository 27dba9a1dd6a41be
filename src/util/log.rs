use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LogSection;

/// Initialize structured logging with tracing.
///
/// Log level can be controlled via RUST_LOG env var.
/// Falls back to the configured level ("info" by default).
pub fn init_logging(log: &LogSection) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&log.level));

    if log.format == "json" {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_target(true).with_current_span(true))
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_target(true).with_thread_ids(false))
            .with(filter)
            .init();
    }
}
