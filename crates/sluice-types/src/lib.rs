pub mod cancel;
pub mod message;
pub mod plugins;
pub mod telemetry;

pub use cancel::CancelReason;
pub use message::{
    CancelPayload, Fault, Message, MessageKind, MessageMethod, MessageState, OperationState,
    RequestId,
};
pub use plugins::{LogLevel, OverflowPolicy};
pub use telemetry::TelemetryEvent;
