use serde::Serialize;
use std::time::Duration;

/// Outcome of one instrumented network read sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TelemetryEvent {
    /// Logical origin, e.g. the name of the remote source.
    pub source: String,
    pub url: String,
    /// Time to first byte, when the caller measured it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub header_duration: Option<Duration>,
    /// Elapsed from request issuance to emission of this event.
    pub request_duration: Duration,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_status_code: Option<u16>,
    pub bytes_transferred: u64,
    pub is_success: bool,
    pub is_retry: bool,
    pub is_cancelled: bool,
}
