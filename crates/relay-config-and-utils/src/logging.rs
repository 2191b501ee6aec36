//! Logging initialization.
//!
//! Thin wrapper over the observability crate: structured JSONL to
//! `<base>/logs/outbox.jsonl` plus compact stderr output.

use crate::{CoreResult, Paths};
use std::path::PathBuf;

/// Service name stamped on every log line.
const SERVICE_NAME: &str = "relay-outbox";

/// Initialize logging for the CLI.
///
/// `RUST_LOG` takes precedence over `level`. Returns the log file path.
///
/// ```ignore
/// init_logging("info", &paths)?;
/// tracing::info!("Queue opened");
/// ```
pub fn init_logging(level: &str, paths: &Paths) -> CoreResult<PathBuf> {
    let level = parse_level(level);

    let log_path = observability::init_with_config(observability::LogConfig {
        service_name: SERVICE_NAME.into(),
        default_level: level.as_str().to_ascii_lowercase(),
        log_path: Some(paths.log_file()),
        also_stderr: true,
    })?;

    Ok(log_path)
}

/// Parse a log level string into a tracing Level. Unknown values mean INFO.
pub fn parse_level(level: &str) -> tracing::Level {
    match level.trim().to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" | "warning" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    }
}
