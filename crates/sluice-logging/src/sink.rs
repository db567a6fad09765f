use crate::entry::{LogEntry, LogRecord};
use sluice_types::LogLevel;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Mutex;
use tracing::{debug, error, info, trace, warn};

pub type SinkError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Destination for formatted records.
///
/// Records from concurrent operations may arrive in any order.
pub trait LogSink: Send + Sync {
    fn write(&self, record: &LogRecord) -> Result<(), SinkError>;
}

/// Format `entry` and hand it to `sink`. Sink failures are reported and dropped.
pub fn emit(sink: &dyn LogSink, entry: &LogEntry) {
    let record = entry.to_record();
    match catch_unwind(AssertUnwindSafe(|| sink.write(&record))) {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            warn!(category = record.category, error = %err, "log sink rejected record");
        }
        Err(_) => {
            warn!(category = record.category, "log sink panicked");
        }
    }
}

/// Forwards records to the `tracing` subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogSink;

impl LogSink for TracingLogSink {
    fn write(&self, record: &LogRecord) -> Result<(), SinkError> {
        let json = record.to_json();
        match record.level {
            LogLevel::Debug => trace!(target: "sluice::plugin", category = record.category, "{json}"),
            LogLevel::Verbose => debug!(target: "sluice::plugin", category = record.category, "{json}"),
            LogLevel::Information | LogLevel::Minimal => {
                info!(target: "sluice::plugin", category = record.category, "{json}")
            }
            LogLevel::Warning => warn!(target: "sluice::plugin", category = record.category, "{json}"),
            LogLevel::Error => error!(target: "sluice::plugin", category = record.category, "{json}"),
        }
        Ok(())
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullLogSink;

impl LogSink for NullLogSink {
    fn write(&self, _record: &LogRecord) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Keeps every record in memory. Useful for hosts that surface plugin logs
/// themselves and for tests.
#[derive(Debug, Default)]
pub struct MemoryLogSink {
    records: Mutex<Vec<LogRecord>>,
}

impl MemoryLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<LogRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    pub fn category(&self, category: &str) -> Vec<LogRecord> {
        self.records()
            .into_iter()
            .filter(|record| record.category == category)
            .collect()
    }

    pub fn clear(&self) {
        if let Ok(mut records) = self.records.lock() {
            records.clear();
        }
    }
}

impl LogSink for MemoryLogSink {
    fn write(&self, record: &LogRecord) -> Result<(), SinkError> {
        self.records
            .lock()
            .map_err(|_| "memory sink poisoned")?
            .push(record.clone());
        Ok(())
    }
}
