//! Structured log entries for plugin traffic.
//!
//! Every entry renders to one [`LogRecord`] of the shape
//! `{ "timestamp", "category", "message": { .. } }`. Optional fields that have
//! no value are left out of `message` entirely.

pub mod entry;
pub mod runtime;
pub mod sink;

pub use entry::{ComponentInfo, LogEntry, LogEntryKind, LogRecord};
pub use runtime::{OperatingSystem, operating_system};
pub use sink::{LogSink, MemoryLogSink, NullLogSink, SinkError, TracingLogSink, emit};
