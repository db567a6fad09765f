//! Host-side plugin communication and network diagnostics.
//!
//! ```no_run
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = sluice::RuntimeConfig::from_file("/etc/sluice/sluice.yaml")?;
//! let runtime = sluice::bootstrap(&config)?;
//! let (reader, writer) = tokio::io::split(tokio::io::duplex(64 * 1024).0);
//! let connection = runtime.connect(reader, writer);
//! let resources = connection
//!     .request(sluice::MessageMethod::ListResources, Default::default())
//!     .await?;
//! # let _ = resources;
//! # Ok(())
//! # }
//! ```

mod runtime;

pub use runtime::{Runtime, bootstrap};

pub use sluice_config::{
    DiagnosticsConfig, LogFilter, LoggingConfig, ProtocolConfig, RuntimeConfig, init_tracing,
};
pub use sluice_diagnostics::{
    DiagnosticsRecorder, DiagnosticsStream, DiagnosticsSummary, ProtocolDiagnostics, RequestInfo,
    SourceMetrics,
};
pub use sluice_error::SluiceError;
pub use sluice_logging::{
    LogEntry, LogEntryKind, LogRecord, LogSink, MemoryLogSink, NullLogSink, TracingLogSink,
};
pub use sluice_messaging::{
    ConnectionOptions, Dispatched, HandlerError, MessagingError, PendingOperation,
    PluginConnection, ProtocolError, RequestHandler,
};
pub use sluice_types::{
    CancelReason, LogLevel, Message, MessageKind, MessageMethod, OperationState, OverflowPolicy,
    RequestId, TelemetryEvent,
};

pub mod diagnostics {
    pub use sluice_diagnostics::{global, set_global};
}

pub mod protocol {
    pub use sluice_messaging::protocol::*;
}
