use crate::logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use sluice_error::SluiceError;
use sluice_messaging::{ConnectionOptions, DEFAULT_MAX_FRAME_BYTES};
use sluice_types::OverflowPolicy;
use std::{path::Path, str::FromStr, time::Duration};

fn default_request_timeout_ms() -> u64 {
    5_000
}

fn default_max_inflight() -> usize {
    1024
}

fn default_max_frame_bytes() -> usize {
    DEFAULT_MAX_FRAME_BYTES
}

fn default_completed_history() -> usize {
    1024
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub protocol: ProtocolConfig,

    #[serde(default)]
    pub diagnostics: DiagnosticsConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ProtocolConfig {
    /// How long a request may go without any message from the plugin
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Outstanding request limit, 0 for unlimited
    #[serde(default = "default_max_inflight")]
    pub max_inflight: usize,

    /// What to do when the limit is reached
    #[serde(default)]
    pub overflow_policy: OverflowPolicy,

    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,

    /// Ended requests remembered for late-delivery detection
    #[serde(default = "default_completed_history")]
    pub completed_history: usize,

    /// Version string the host reports for itself
    #[serde(default)]
    pub host_version: Option<String>,

    /// Build identity the host reports next to its version
    #[serde(default)]
    pub host_informational_version: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct DiagnosticsConfig {
    /// Install the process-wide recorder on bootstrap
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
            max_inflight: default_max_inflight(),
            overflow_policy: OverflowPolicy::default(),
            max_frame_bytes: default_max_frame_bytes(),
            completed_history: default_completed_history(),
            host_version: None,
            host_informational_version: None,
        }
    }
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
        }
    }
}

impl ProtocolConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn to_options(&self) -> ConnectionOptions {
        ConnectionOptions {
            request_timeout: self.request_timeout(),
            max_inflight: self.max_inflight,
            overflow_policy: self.overflow_policy,
            max_frame_bytes: self.max_frame_bytes,
            completed_history: self.completed_history,
            host_version: self.host_version.clone(),
            host_informational_version: self.host_informational_version.clone(),
        }
    }
}

impl FromStr for RuntimeConfig {
    type Err = SluiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let config: Self = serde_yaml_ng::from_str(s)?;
        config.validate()?;
        Ok(config)
    }
}

impl RuntimeConfig {
    /// Load the runtime config from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SluiceError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| SluiceError::ConfigError(e.to_string()))?;
        Self::from_str(&content)
    }

    pub fn validate(&self) -> Result<(), SluiceError> {
        if self.protocol.request_timeout_ms == 0 {
            return Err(SluiceError::ConfigError(
                "protocol.request_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.protocol.max_frame_bytes == 0 {
            return Err(SluiceError::ConfigError(
                "protocol.max_frame_bytes must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
