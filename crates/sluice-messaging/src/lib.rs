//! Request/response correlation between a host and one plugin process.
//!
//! A [`PluginConnection`] owns both halves of the plugin pipe. Outbound
//! requests are tracked until a response, fault, cancellation, timeout or
//! connection loss ends them, whichever happens first.

pub mod connection;
pub mod error;
mod pending;
pub mod protocol;

pub use connection::{
    ConnectionOptions, DEFAULT_CANCEL_REASON, Dispatched, HandlerError, PluginConnection,
    RequestHandler,
};
pub use error::MessagingError;
pub use pending::PendingOperation;
pub use protocol::{
    DEFAULT_MAX_FRAME_BYTES, PROTOCOL_VERSION, ProtocolError, decode_message, encode_message,
    frame_codec,
};
