//! Configuration, paths and logging bootstrap for the relay outbox tools.

mod config;
mod error;
mod logging;
mod paths;

pub use config::{Config, DEFAULT_BASE_URL, DEFAULT_LOG_LEVEL, DEFAULT_REQUEST_TIMEOUT_SECS};
pub use error::{CoreError, CoreResult};
pub use logging::{init_logging, parse_level};
pub use paths::Paths;
