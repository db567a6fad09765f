use std::backtrace::Backtrace;
use std::fmt;

/// Why an operation was cancelled, with the stack of the code that cancelled it.
///
/// The trace is whatever the caller hands in at the moment cancellation is
/// recognised. Capturing it later, when the error is reported, would point at
/// the reporter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelReason {
    reason: String,
    stack_trace: String,
}

impl CancelReason {
    pub fn new(reason: impl Into<String>, stack_trace: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            stack_trace: stack_trace.into(),
        }
    }

    /// Snapshot the current call stack alongside `reason`.
    pub fn capture(reason: impl Into<String>) -> Self {
        Self::new(reason, Backtrace::force_capture().to_string())
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn stack_trace(&self) -> &str {
        &self.stack_trace
    }
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reason)
    }
}
