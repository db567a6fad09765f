use serde::{Deserialize, Serialize};
use sluice_error::SluiceError;
use tracing::Level;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFilter {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl From<LogFilter> for Level {
    fn from(filter: LogFilter) -> Self {
        match filter {
            LogFilter::Trace => Level::TRACE,
            LogFilter::Debug => Level::DEBUG,
            LogFilter::Info => Level::INFO,
            LogFilter::Warn => Level::WARN,
            LogFilter::Error => Level::ERROR,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Most verbose level written by the fmt subscriber
    #[serde(default)]
    pub level: LogFilter,
}

/// Install the global fmt subscriber.
///
/// Fails if another subscriber is already installed.
pub fn init_tracing(config: &LoggingConfig) -> Result<(), SluiceError> {
    tracing_subscriber::fmt()
        .with_max_level(Level::from(config.level))
        .with_target(true)
        .try_init()
        .map_err(|e| SluiceError::LoggingError(e.to_string()))
}
