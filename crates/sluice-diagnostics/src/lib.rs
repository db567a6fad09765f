//! Network diagnostics: a stream wrapper that reports exactly one
//! [`TelemetryEvent`] per wrapped operation, and the sinks that receive it.

pub mod recorder;
pub mod stream;

pub use recorder::{DiagnosticsRecorder, DiagnosticsSummary, SourceMetrics};
pub use sluice_types::TelemetryEvent;
pub use stream::{DiagnosticsStream, RequestInfo};

use once_cell::sync::OnceCell;
use std::sync::Arc;

/// Receives the outcome of instrumented network operations.
///
/// Called at most once per [`DiagnosticsStream`].
pub trait ProtocolDiagnostics: Send + Sync {
    fn on_event(&self, event: &TelemetryEvent);
}

static GLOBAL_DIAGNOSTICS: OnceCell<Arc<dyn ProtocolDiagnostics>> = OnceCell::new();

/// Install the process-wide diagnostics sink. Returns `false` if one was already set.
pub fn set_global(sink: Arc<dyn ProtocolDiagnostics>) -> bool {
    GLOBAL_DIAGNOSTICS.set(sink).is_ok()
}

pub fn global() -> Option<Arc<dyn ProtocolDiagnostics>> {
    GLOBAL_DIAGNOSTICS.get().cloned()
}
