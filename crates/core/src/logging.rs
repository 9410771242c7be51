//! Structured logging infrastructure for the trust protocol.
//!
//! This module provides centralized logging initialization with support
//! for structured JSON output and environment-based configuration.

use crate::config::LoggingConfig;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn default_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialize the logging system with structured output.
///
/// Log level can be configured via the `RUST_LOG` environment variable.
/// If not set, defaults to `info` level.
///
/// # Example
/// ```no_run
/// use trustproto_core::logging;
///
/// logging::init();
/// tracing::info!("Ledger node started");
/// ```
pub fn init() {
    tracing_subscriber::registry()
        .with(default_filter())
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
}

/// Initialize the logging system with JSON output for production environments.
///
/// ```no_run
/// use trustproto_core::logging;
///
/// logging::init_json();
/// tracing::info!(component = "decay_sweep", "Sweep scheduled");
/// ```
pub fn init_json() {
    tracing_subscriber::registry()
        .with(default_filter())
        .with(fmt::layer().json().with_target(true).with_thread_ids(true))
        .init();
}

/// Pick the output format from configuration.
pub fn init_from_config(config: &LoggingConfig) {
    if config.json {
        init_json();
    } else {
        init();
    }
}
