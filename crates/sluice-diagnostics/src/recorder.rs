use crate::ProtocolDiagnostics;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use sluice_types::TelemetryEvent;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

/// Aggregates telemetry from every instrumented stream in the process.
#[derive(Debug, Clone)]
pub struct DiagnosticsRecorder {
    pub events: Arc<AtomicU64>,
    pub successes: Arc<AtomicU64>,
    pub failures: Arc<AtomicU64>,
    pub retries: Arc<AtomicU64>,
    pub cancellations: Arc<AtomicU64>,
    pub bytes_transferred: Arc<AtomicU64>,
    /// Per-source breakdown
    pub sources: Arc<DashMap<String, SourceMetrics>>,
}

#[derive(Debug, Clone)]
pub struct SourceMetrics {
    pub source: String,
    pub requests: u64,
    pub failures: u64,
    pub bytes_transferred: u64,
    pub total_duration: Duration,
    pub consecutive_failures: u32,
    pub last_status: Option<u16>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
}

impl SourceMetrics {
    fn new(source: &str) -> Self {
        Self {
            source: source.to_string(),
            requests: 0,
            failures: 0,
            bytes_transferred: 0,
            total_duration: Duration::ZERO,
            consecutive_failures: 0,
            last_status: None,
            last_success: None,
            last_failure: None,
        }
    }

    pub fn average_duration(&self) -> Option<Duration> {
        let requests = u32::try_from(self.requests).ok().filter(|n| *n > 0)?;
        Some(self.total_duration / requests)
    }
}

impl Default for DiagnosticsRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl DiagnosticsRecorder {
    pub fn new() -> Self {
        Self {
            events: Arc::new(AtomicU64::new(0)),
            successes: Arc::new(AtomicU64::new(0)),
            failures: Arc::new(AtomicU64::new(0)),
            retries: Arc::new(AtomicU64::new(0)),
            cancellations: Arc::new(AtomicU64::new(0)),
            bytes_transferred: Arc::new(AtomicU64::new(0)),
            sources: Arc::new(DashMap::new()),
        }
    }

    pub fn record(&self, event: &TelemetryEvent) {
        self.events.fetch_add(1, Ordering::Relaxed);
        self.bytes_transferred
            .fetch_add(event.bytes_transferred, Ordering::Relaxed);
        if event.is_success {
            self.successes.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
        if event.is_retry {
            self.retries.fetch_add(1, Ordering::Relaxed);
        }
        if event.is_cancelled {
            self.cancellations.fetch_add(1, Ordering::Relaxed);
        }

        let mut metrics = self
            .sources
            .entry(event.source.clone())
            .or_insert_with(|| SourceMetrics::new(&event.source));

        metrics.requests += 1;
        metrics.bytes_transferred += event.bytes_transferred;
        metrics.total_duration += event.request_duration;
        if event.http_status_code.is_some() {
            metrics.last_status = event.http_status_code;
        }
        if event.is_success {
            metrics.last_success = Some(Utc::now());
            metrics.consecutive_failures = 0;
        } else {
            metrics.failures += 1;
            metrics.last_failure = Some(Utc::now());
            metrics.consecutive_failures += 1;
        }
    }

    pub fn source(&self, source: &str) -> Option<SourceMetrics> {
        self.sources.get(source).map(|entry| entry.clone())
    }

    pub fn get_summary(&self) -> DiagnosticsSummary {
        DiagnosticsSummary {
            events: self.events.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            cancellations: self.cancellations.load(Ordering::Relaxed),
            bytes_transferred: self.bytes_transferred.load(Ordering::Relaxed),
            source_count: self.sources.len(),
        }
    }
}

impl ProtocolDiagnostics for DiagnosticsRecorder {
    fn on_event(&self, event: &TelemetryEvent) {
        debug!(
            source = %event.source,
            url = %event.url,
            status = ?event.http_status_code,
            bytes = event.bytes_transferred,
            elapsed_ms = event.request_duration.as_millis(),
            success = event.is_success,
            retry = event.is_retry,
            cancelled = event.is_cancelled,
            "network operation finished"
        );
        self.record(event);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticsSummary {
    pub events: u64,
    pub successes: u64,
    pub failures: u64,
    pub retries: u64,
    pub cancellations: u64,
    pub bytes_transferred: u64,
    pub source_count: usize,
}
