//! # Observability
//!
//! Centralized structured logging for the relay outbox tools.
//!
//! Binaries call [`init_with_config`] once at startup and use the standard
//! `tracing` macros everywhere else. Every event is appended as one JSON
//! line to a log file (`~/.relay-outbox/logs/outbox.jsonl` unless
//! overridden), optionally mirrored to stderr in compact form.
//!
//! ```rust,ignore
//! observability::init_with_config(observability::LogConfig {
//!     service_name: "relay-outbox".into(),
//!     default_level: "debug".into(),
//!     also_stderr: true,
//!     ..Default::default()
//! })?;
//! tracing::info!(pending = 3, "queue opened");
//! ```
//!
//! Fields whose names look like credentials (`access_token`, `authorization`,
//! ...) are masked before they reach the file.

mod json_layer;
mod sink;

use std::io;
use std::path::PathBuf;

pub use json_layer::{JsonLayer, LogEntry, REDACTED};
pub use sink::LogFileWriter;

/// Configuration for the logging system.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Name of the service, included in every log line.
    pub service_name: String,

    /// Default filter (e.g. "debug", "info,relay_outbox=trace").
    /// `RUST_LOG` takes precedence when set.
    pub default_level: String,

    /// Log file path. Defaults to `~/.relay-outbox/logs/outbox.jsonl`.
    pub log_path: Option<PathBuf>,

    /// Also emit compact logs to stderr.
    pub also_stderr: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown".into(),
            default_level: "info".into(),
            log_path: None,
            also_stderr: false,
        }
    }
}

/// Initialize logging for `service_name` with default settings.
pub fn init(service_name: &str) -> io::Result<PathBuf> {
    init_with_config(LogConfig {
        service_name: service_name.into(),
        ..Default::default()
    })
}

/// Initialize logging with custom configuration.
///
/// Returns the log file path in use. Fails if the log file cannot be opened
/// or a global subscriber is already installed.
pub fn init_with_config(config: LogConfig) -> io::Result<PathBuf> {
    sink::init_subscriber(&config)
}

/// Re-export tracing macros for convenience.
pub use tracing::{debug, error, info, instrument, trace, warn};

/// Re-export Level for advanced filtering.
pub use tracing::Level;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LogConfig::default();
        assert_eq!(config.service_name, "unknown");
        assert_eq!(config.default_level, "info");
        assert!(config.log_path.is_none());
        assert!(!config.also_stderr);
    }
}
