use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum SluiceError {
    #[error("Failed to parse configuration: {0}")]
    ConfigError(String),

    #[error("Unable to install log subscriber: {0}")]
    LoggingError(String),
}

impl From<serde_yaml_ng::Error> for SluiceError {
    fn from(err: serde_yaml_ng::Error) -> Self {
        SluiceError::ConfigError(err.to_string())
    }
}
