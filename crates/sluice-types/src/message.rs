use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Correlation token linking a request to its response, fault or cancellation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh time-ordered id for an outbound request.
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for RequestId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    Request,
    Response,
    Fault,
    Cancel,
    Progress,
}

impl MessageKind {
    /// Kinds that complete the operation they refer to.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Response | Self::Fault | Self::Cancel)
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Plugin capability being invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageMethod {
    Handshake,
    Initialize,
    GetOperationClaims,
    GetCredentials,
    ListResources,
    GetResource,
    SetLogLevel,
    Log,
    MonitorProcessExit,
    Close,
}

impl fmt::Display for MessageMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub request_id: RequestId,
    pub method: MessageMethod,
    pub kind: MessageKind,
    #[serde(default)]
    pub payload: Value,
}

impl Message {
    pub fn new(
        request_id: RequestId,
        method: MessageMethod,
        kind: MessageKind,
        payload: Value,
    ) -> Self {
        Self {
            request_id,
            method,
            kind,
            payload,
        }
    }

    pub fn request(request_id: RequestId, method: MessageMethod, payload: Value) -> Self {
        Self::new(request_id, method, MessageKind::Request, payload)
    }

    pub fn response(request_id: RequestId, method: MessageMethod, payload: Value) -> Self {
        Self::new(request_id, method, MessageKind::Response, payload)
    }

    pub fn fault(request_id: RequestId, method: MessageMethod, message: impl Into<String>) -> Self {
        let payload = serde_json::to_value(Fault {
            message: message.into(),
        })
        .unwrap_or(Value::Null);
        Self::new(request_id, method, MessageKind::Fault, payload)
    }

    pub fn cancel(request_id: RequestId, method: MessageMethod, reason: Option<String>) -> Self {
        let payload = serde_json::to_value(CancelPayload { reason }).unwrap_or(Value::Null);
        Self::new(request_id, method, MessageKind::Cancel, payload)
    }

    pub fn progress(request_id: RequestId, method: MessageMethod) -> Self {
        Self::new(request_id, method, MessageKind::Progress, Value::Null)
    }
}

/// Body of a `Fault` message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fault {
    pub message: String,
}

/// Body of a `Cancel` message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Host-side lifecycle of one outstanding request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationState {
    Sent,
    ReceivedPartial,
    Succeeded,
    Failed,
    Cancelled,
    TimedOut,
}

impl OperationState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed | Self::Cancelled | Self::TimedOut
        )
    }
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// State reported in communication log entries.
///
/// Covers every [`OperationState`] plus the states a message can be in that
/// have no pending operation behind them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageState {
    Sent,
    Received,
    ReceivedPartial,
    Succeeded,
    Failed,
    Cancelled,
    TimedOut,
    Discarded,
}

impl From<OperationState> for MessageState {
    fn from(state: OperationState) -> Self {
        match state {
            OperationState::Sent => Self::Sent,
            OperationState::ReceivedPartial => Self::ReceivedPartial,
            OperationState::Succeeded => Self::Succeeded,
            OperationState::Failed => Self::Failed,
            OperationState::Cancelled => Self::Cancelled,
            OperationState::TimedOut => Self::TimedOut,
        }
    }
}

impl fmt::Display for MessageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}
