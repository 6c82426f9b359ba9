//! Logging initialization
//!
//! Respects RUST_LOG, then the configured filter, then defaults to "info".
//!
//! ```rust,no_run
//! memload::utils::init_logging(None);
//! ```

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

const DEFAULT_FILTER: &str = "info";

/// Filter directive in effect: RUST_LOG, then `configured`, then "info"
pub fn filter_directive(configured: Option<&str>) -> String {
    match std::env::var("RUST_LOG") {
        Ok(env) if !env.is_empty() => env,
        _ => configured.unwrap_or(DEFAULT_FILTER).to_string(),
    }
}

fn env_filter(configured: Option<&str>) -> EnvFilter {
    EnvFilter::try_new(filter_directive(configured)).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Initialize human-readable logging to stderr
///
/// Does nothing if a global subscriber is already installed.
pub fn init_logging(filter: Option<&str>) {
    let _ = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(false)
                .with_ansi(std::env::var("NO_COLOR").is_err()),
        )
        .with(env_filter(filter))
        .try_init();
}

/// Initialize logging with JSON output (for log aggregation)
#[cfg(feature = "json-logging")]
pub fn init_json_logging(filter: Option<&str>) {
    let _ = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_current_span(true)
                .with_span_list(true),
        )
        .with(env_filter(filter))
        .try_init();
}

/// Initialize logging from [`LoggingConfig`]
pub fn init_logging_from_config(config: Option<&LoggingConfig>) {
    let filter = config.and_then(|c| c.filter.as_deref());

    if config.map(|c| c.json_format).unwrap_or(false) {
        #[cfg(feature = "json-logging")]
        {
            init_json_logging(filter);
        }
        #[cfg(not(feature = "json-logging"))]
        {
            // Fall back to regular logging if json-logging feature not enabled
            init_logging(filter);
        }
    } else {
        init_logging(filter);
    }
}
