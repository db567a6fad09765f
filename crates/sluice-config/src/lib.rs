pub mod logging;
pub mod runtime;

pub use logging::{LogFilter, LoggingConfig, init_tracing};
pub use runtime::{DiagnosticsConfig, ProtocolConfig, RuntimeConfig};
