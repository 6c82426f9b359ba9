//! Shared utilities

pub mod logging;

pub use logging::{filter_directive, init_logging, init_logging_from_config};
#[cfg(feature = "json-logging")]
pub use logging::init_json_logging;
