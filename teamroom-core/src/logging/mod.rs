//! Logging subsystem for teamroom
//!
//! Events are emitted with `tracing` and written to stderr by a
//! `tracing-subscriber` fmt layer, as plain text or JSON. `RUST_LOG`
//! overrides the configured level when set.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

mod error;
mod level;

pub use error::LoggingError;
pub use level::LogLevel;

/// Configuration for the logging subsystem
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// The minimum log level to display
    pub level: LogLevel,
    pub with_timestamp: bool,
    /// Whether to include target module information
    pub with_target: bool,
    pub json_format: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            with_timestamp: true,
            with_target: true,
            json_format: false,
        }
    }
}

impl LogConfig {
    pub fn new(level: LogLevel) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    pub fn with_timestamp(mut self, enabled: bool) -> Self {
        self.with_timestamp = enabled;
        self
    }

    pub fn with_target(mut self, enabled: bool) -> Self {
        self.with_target = enabled;
        self
    }

    pub fn json_format(mut self, enabled: bool) -> Self {
        self.json_format = enabled;
        self
    }
}

/// Initialize the logging subsystem with default configuration
pub fn init_logging() -> Result<(), LoggingError> {
    init_logging_with_config(LogConfig::default())
}

/// Initialize the logging subsystem with custom configuration
///
/// # Example
/// ```
/// use teamroom_core::logging::{init_logging_with_config, LogConfig, LogLevel};
///
/// let config = LogConfig::new(LogLevel::Debug).with_target(false);
/// init_logging_with_config(config).expect("Failed to initialize logging");
/// ```
pub fn init_logging_with_config(config: LogConfig) -> Result<(), LoggingError> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str()));

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(config.with_target);

    let fmt_layer = match (config.json_format, config.with_timestamp) {
        (true, true) => fmt_layer.json().boxed(),
        (true, false) => fmt_layer.json().without_time().boxed(),
        (false, true) => fmt_layer.boxed(),
        (false, false) => fmt_layer.without_time().boxed(),
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter)
        .try_init()
        .map_err(|e| LoggingError::InitializationFailed(e.to_string()))
}
