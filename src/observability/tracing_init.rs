//! Tracing initialization with configurable logging formats.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use super::AuditLayer;
use crate::config::{LogFormat, LoggingConfig};

/// Initialize the global tracing subscriber.
///
/// This sets up:
/// - Console logging with configurable format (pretty, compact, JSON)
/// - Environment-based log filtering
/// - The [`AuditLayer`] log sink, when one is given and `capture_events` is on
///
/// Fails if a global subscriber is already installed.
pub fn init_tracing(config: &LoggingConfig, audit: Option<AuditLayer>) -> Result<(), TracingError> {
    let filter = build_env_filter(config);
    let offered = audit.is_some();
    let audit = capture_layer(config, audit);

    let result = match (&config.format, config.timestamps) {
        (LogFormat::Pretty, true) => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .pretty()
                .with_target(true)
                .with_thread_ids(false)
                .with_file(config.file_line)
                .with_line_number(config.file_line);
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt_layer)
                .with(audit)
                .try_init()
        }
        (LogFormat::Pretty, false) => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .pretty()
                .with_target(true)
                .with_thread_ids(false)
                .with_file(config.file_line)
                .with_line_number(config.file_line)
                .without_time();
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt_layer)
                .with(audit)
                .try_init()
        }
        (LogFormat::Compact, true) => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .compact()
                .with_target(true)
                .with_file(config.file_line)
                .with_line_number(config.file_line);
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt_layer)
                .with(audit)
                .try_init()
        }
        (LogFormat::Compact, false) => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .compact()
                .with_target(true)
                .with_file(config.file_line)
                .with_line_number(config.file_line)
                .without_time();
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt_layer)
                .with(audit)
                .try_init()
        }
        (LogFormat::Json, true) => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_file(config.file_line)
                .with_line_number(config.file_line);
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt_layer)
                .with(audit)
                .try_init()
        }
        (LogFormat::Json, false) => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_file(config.file_line)
                .with_line_number(config.file_line)
                .without_time();
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt_layer)
                .with(audit)
                .try_init()
        }
    };

    result.map_err(|e| TracingError::Init(e.to_string()))?;
    tracing::debug!(format = ?config.format, "Tracing initialized");
    if offered && !config.capture_events {
        tracing::warn!("Audit layer ignored: logging.capture_events is off");
    }
    Ok(())
}

/// The audit layer to install, if host events are to be captured.
fn capture_layer(config: &LoggingConfig, audit: Option<AuditLayer>) -> Option<AuditLayer> {
    audit.filter(|_| config.capture_events)
}

/// Build the environment filter from logging config.
fn build_env_filter(config: &LoggingConfig) -> EnvFilter {
    let base_level = config.level.as_directive();

    // Check for RUST_LOG environment variable first
    if let Ok(env_filter) = std::env::var("RUST_LOG") {
        EnvFilter::try_new(env_filter).unwrap_or_else(|_| EnvFilter::new(base_level))
    } else {
        EnvFilter::new(filter_directives(config))
    }
}

/// Directives used when `RUST_LOG` is not set.
fn filter_directives(config: &LoggingConfig) -> String {
    let base_level = config.level.as_directive();
    match &config.filter {
        Some(filter) if EnvFilter::try_new(format!("{base_level},{filter}")).is_ok() => {
            format!("{base_level},{filter}")
        }
        Some(filter) => {
            eprintln!("Ignoring invalid log filter {filter:?}");
            base_level.to_string()
        }
        // Default filter that quiets noisy crates
        None => format!("{base_level},sqlx=warn"),
    }
}

/// Tracing initialization errors.
#[derive(Debug, thiserror::Error)]
pub enum TracingError {
    #[error("Failed to initialize tracing: {0}")]
    Init(String),
}
