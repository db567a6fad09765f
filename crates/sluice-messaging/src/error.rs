use crate::protocol::ProtocolError;
use sluice_types::{CancelReason, OverflowPolicy, RequestId};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MessagingError {
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("plugin faulted request {request_id}: {detail}")]
    RemoteFault { request_id: RequestId, detail: String },
    #[error("request {request_id} timed out after {timeout:?}")]
    Timeout {
        request_id: RequestId,
        timeout: Duration,
    },
    #[error("request {request_id} cancelled: {reason}")]
    Cancelled {
        request_id: RequestId,
        reason: CancelReason,
    },
    #[error("request overflow (policy {policy:?})")]
    Overflow { policy: OverflowPolicy },
    #[error("no outstanding request with ID {0}")]
    UnknownRequest(RequestId),
    #[error("connection is closed")]
    Closed,
}

impl MessagingError {
    /// Id of the request this error resolved, when it belongs to one.
    pub fn request_id(&self) -> Option<&RequestId> {
        match self {
            Self::RemoteFault { request_id, .. }
            | Self::Timeout { request_id, .. }
            | Self::Cancelled { request_id, .. }
            | Self::UnknownRequest(request_id) => Some(request_id),
            Self::Protocol(_) | Self::Overflow { .. } | Self::Closed => None,
        }
    }

    /// Whether the whole connection is gone rather than a single request.
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            Self::Closed
                | Self::Protocol(ProtocolError::ConnectionClosed)
                | Self::Protocol(ProtocolError::Io(_))
        )
    }
}
