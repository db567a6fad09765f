use crate::error::MessagingError;
use crate::pending::{Outcome, PendingOperation, PendingTable};
use crate::protocol::{
    DEFAULT_MAX_FRAME_BYTES, ProtocolError, decode_frame, encode_frame, frame_codec,
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use once_cell::sync::OnceCell;
use serde::Deserialize;
use serde_json::{Value, json};
use sluice_logging::{LogEntry, LogSink, emit};
use sluice_types::{
    CancelPayload, CancelReason, Fault, LogLevel, Message, MessageKind, MessageMethod,
    MessageState, OperationState, OverflowPolicy, RequestId,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};
use tracing::{debug, warn};

/// How long host-initiated notices may wait on a plugin that is not reading.
const NOTICE_TIMEOUT: Duration = Duration::from_millis(250);

/// Reason recorded when the plugin cancels without saying why.
pub const DEFAULT_CANCEL_REASON: &str = "Cancelled by plugin";

pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Answers requests the plugin sends to the host.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle(&self, method: MessageMethod, payload: Value) -> Result<Value, HandlerError>;
}

#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    pub request_timeout: Duration,
    /// Upper bound on outstanding requests. Zero disables the limit.
    pub max_inflight: usize,
    pub overflow_policy: OverflowPolicy,
    pub max_frame_bytes: usize,
    /// How many ended requests are remembered to recognise late deliveries.
    pub completed_history: usize,
    /// Version the host reports for itself in the entry assembly log.
    pub host_version: Option<String>,
    /// Free-form build identity of the host, such as a release tag or commit.
    pub host_informational_version: Option<String>,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(5),
            max_inflight: 1024,
            overflow_policy: OverflowPolicy::Queue,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            completed_history: 1024,
            host_version: None,
            host_informational_version: None,
        }
    }
}

/// What [`PluginConnection::dispatch`] did with a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatched {
    /// The message ended the request in this state.
    Resolved(OperationState),
    Progress,
    /// A plugin-initiated request, answered in the background.
    InboundRequest,
    /// The request had already ended in this state. Message discarded.
    LateOrDuplicate(OperationState),
    /// No such request. Message discarded.
    Unknown,
}

#[derive(Debug, Deserialize)]
struct LogRequest {
    #[serde(default)]
    level: LogLevel,
    message: String,
}

type FrameWriter = FramedWrite<Box<dyn AsyncWrite + Send + Unpin>, LengthDelimitedCodec>;

struct Shared {
    pending: PendingTable,
    writer: Mutex<FrameWriter>,
    log_sink: Arc<dyn LogSink>,
    handler: OnceCell<Arc<dyn RequestHandler>>,
    inflight: Option<Arc<Semaphore>>,
    options: ConnectionOptions,
    closed: AtomicBool,
}

/// One host-side session with a plugin over a pair of byte streams.
pub struct PluginConnection {
    shared: Arc<Shared>,
    reader: JoinHandle<()>,
}

impl PluginConnection {
    /// Start a session. Must be called from within a tokio runtime.
    pub fn new<R, W>(
        reader: R,
        writer: W,
        options: ConnectionOptions,
        log_sink: Arc<dyn LogSink>,
    ) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let codec = frame_codec(options.max_frame_bytes);
        let writer: Box<dyn AsyncWrite + Send + Unpin> = Box::new(writer);
        let inflight = (options.max_inflight > 0)
            .then(|| Arc::new(Semaphore::new(options.max_inflight)));

        let shared = Arc::new(Shared {
            pending: PendingTable::new(options.completed_history),
            writer: Mutex::new(FramedWrite::new(writer, codec.clone())),
            log_sink,
            handler: OnceCell::new(),
            inflight,
            options,
            closed: AtomicBool::new(false),
        });

        shared.log(&LogEntry::assembly());
        shared.log(&LogEntry::entry_assembly(
            shared.options.host_version.clone(),
            shared.options.host_informational_version.clone(),
        ));

        let frames = FramedRead::new(reader, codec);
        let reader = tokio::spawn(read_loop(Arc::clone(&shared), frames));

        Self { shared, reader }
    }

    /// Install the handler for plugin-initiated requests. Only the first call wins.
    pub fn set_handler(&self, handler: Arc<dyn RequestHandler>) -> bool {
        self.shared.handler.set(handler).is_ok()
    }

    pub fn options(&self) -> &ConnectionOptions {
        &self.shared.options
    }

    /// Write a request and register it as outstanding.
    pub async fn send(
        &self,
        method: MessageMethod,
        payload: Value,
    ) -> Result<RequestId, MessagingError> {
        let shared = &self.shared;
        if shared.is_closed() {
            return Err(ProtocolError::ConnectionClosed.into());
        }

        let permit = shared.acquire_permit().await?;
        let request_id = RequestId::generate();
        shared.pending.insert(request_id.clone(), method, permit);
        // A concurrent shutdown may have swept the table before the insert.
        if shared.is_closed() {
            shared.pending.rollback(&request_id);
            return Err(ProtocolError::ConnectionClosed.into());
        }

        shared.log_communication(&request_id, method, MessageKind::Request, MessageState::Sent, None);
        let message = Message::request(request_id.clone(), method, payload);
        if let Err(err) = shared.write(&message).await {
            shared.pending.rollback(&request_id);
            warn!(request_id = %request_id, method = %method, error = %err, "failed to send request");
            shared.log_communication(
                &request_id,
                method,
                MessageKind::Request,
                MessageState::Failed,
                Some(format!("send failed: {err}")),
            );
            if matches!(err, ProtocolError::Io(_)) {
                shared.shutdown("outbound stream failed");
            }
            return Err(err.into());
        }

        debug!(request_id = %request_id, method = %method, "request sent");
        Ok(request_id)
    }

    /// Apply one inbound message to the pending table.
    pub fn dispatch(&self, message: Message) -> Dispatched {
        self.shared.dispatch(message)
    }

    /// Wait until `request_id` ends or `timeout` passes without any sign of life.
    ///
    /// Each progress message restarts the deadline. A request can be awaited once.
    pub async fn await_response(
        &self,
        request_id: &RequestId,
        timeout: Duration,
    ) -> Result<Value, MessagingError> {
        self.shared.await_response(request_id, timeout).await
    }

    /// `send` followed by `await_response` with the configured timeout.
    pub async fn request(
        &self,
        method: MessageMethod,
        payload: Value,
    ) -> Result<Value, MessagingError> {
        let request_id = self.send(method, payload).await?;
        self.await_response(&request_id, self.shared.options.request_timeout)
            .await
    }

    /// Cancel an outstanding request on this side and tell the plugin.
    ///
    /// Returns `false` when the request had already ended or never existed.
    pub async fn cancel_locally(&self, request_id: &RequestId, reason: CancelReason) -> bool {
        let shared = &self.shared;
        let details = reason.reason().to_string();
        let Some(operation) =
            shared
                .pending
                .complete(request_id, OperationState::Cancelled, || Outcome::Cancelled(reason))
        else {
            debug!(request_id = %request_id, "cancel ignored, request not outstanding");
            return false;
        };

        shared.log_communication(
            request_id,
            operation.method,
            MessageKind::Cancel,
            MessageState::Cancelled,
            Some(details.clone()),
        );

        let notice = Message::cancel(request_id.clone(), operation.method, Some(details));
        match tokio::time::timeout(NOTICE_TIMEOUT, shared.write(&notice)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                debug!(request_id = %request_id, error = %err, "cancel notice not delivered")
            }
            Err(_) => debug!(request_id = %request_id, "cancel notice abandoned, plugin not reading"),
        }
        true
    }

    /// Narrate something about a request into the log sink.
    pub fn log_task(&self, request_id: &RequestId, message: impl Into<String>, level: LogLevel) {
        self.shared
            .log(&LogEntry::task_log(request_id.clone(), message, level));
    }

    pub fn pending(&self, request_id: &RequestId) -> Option<PendingOperation> {
        self.shared.pending.get(request_id)
    }

    pub fn pending_count(&self) -> usize {
        self.shared.pending.len()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// End the session. Outstanding requests fail with `ConnectionClosed`.
    pub async fn close(&self) {
        self.reader.abort();
        self.shared.shutdown("connection closed by host");
        let flush = async {
            let mut writer = self.shared.writer.lock().await;
            SinkExt::<Bytes>::close(&mut *writer).await
        };
        match tokio::time::timeout(NOTICE_TIMEOUT, flush).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => debug!(error = %err, "error closing plugin stream"),
            Err(_) => debug!("plugin stream not closed cleanly, plugin not reading"),
        }
    }
}

impl Drop for PluginConnection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

impl Shared {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn log(&self, entry: &LogEntry) {
        emit(self.log_sink.as_ref(), entry);
    }

    fn log_communication(
        &self,
        request_id: &RequestId,
        method: MessageMethod,
        kind: MessageKind,
        state: MessageState,
        details: Option<String>,
    ) {
        self.log(&LogEntry::communication(
            request_id.clone(),
            method,
            kind,
            state,
            details,
        ));
    }

    async fn acquire_permit(&self) -> Result<Option<OwnedSemaphorePermit>, MessagingError> {
        let Some(semaphore) = self.inflight.as_ref() else {
            return Ok(None);
        };

        match self.options.overflow_policy {
            OverflowPolicy::Queue => Ok(Some(
                semaphore
                    .clone()
                    .acquire_owned()
                    .await
                    .map_err(|_| MessagingError::Closed)?,
            )),
            OverflowPolicy::Reject | OverflowPolicy::Shed => semaphore
                .clone()
                .try_acquire_owned()
                .map(Some)
                .map_err(|_| MessagingError::Overflow {
                    policy: self.options.overflow_policy,
                }),
        }
    }

    async fn write(&self, message: &Message) -> Result<(), ProtocolError> {
        if self.is_closed() {
            return Err(ProtocolError::ConnectionClosed);
        }
        let frame = encode_frame(message)?;
        let mut writer = self.writer.lock().await;
        writer.send(frame).await?;
        Ok(())
    }

    fn dispatch(self: &Arc<Self>, message: Message) -> Dispatched {
        let Message {
            request_id,
            method,
            kind,
            payload,
        } = message;

        match kind {
            MessageKind::Request => {
                self.spawn_inbound(request_id, method, payload);
                Dispatched::InboundRequest
            }
            MessageKind::Progress => match self.pending.progress(&request_id) {
                Some(method) => {
                    self.log_communication(
                        &request_id,
                        method,
                        kind,
                        MessageState::ReceivedPartial,
                        None,
                    );
                    Dispatched::Progress
                }
                None => self.discard(&request_id, method, kind),
            },
            MessageKind::Response => self.resolve(
                request_id,
                method,
                kind,
                OperationState::Succeeded,
                || Outcome::Succeeded(payload),
                None,
            ),
            MessageKind::Fault => {
                let detail = fault_detail(payload);
                let details = Some(detail.clone());
                self.resolve(
                    request_id,
                    method,
                    kind,
                    OperationState::Failed,
                    || Outcome::Failed(detail),
                    details,
                )
            }
            MessageKind::Cancel => {
                let reason = cancel_reason(payload);
                let details = Some(reason.clone());
                self.resolve(
                    request_id,
                    method,
                    kind,
                    OperationState::Cancelled,
                    || Outcome::Cancelled(CancelReason::capture(reason)),
                    details,
                )
            }
        }
    }

    fn resolve(
        &self,
        request_id: RequestId,
        method: MessageMethod,
        kind: MessageKind,
        state: OperationState,
        outcome: impl FnOnce() -> Outcome,
        details: Option<String>,
    ) -> Dispatched {
        match self.pending.complete(&request_id, state, outcome) {
            Some(operation) => {
                debug!(request_id = %request_id, method = %operation.method, state = %state, "request resolved");
                self.log_communication(&request_id, operation.method, kind, state.into(), details);
                Dispatched::Resolved(state)
            }
            None => self.discard(&request_id, method, kind),
        }
    }

    fn discard(&self, request_id: &RequestId, method: MessageMethod, kind: MessageKind) -> Dispatched {
        match self.pending.completed_state(request_id) {
            Some(state) => {
                warn!(request_id = %request_id, kind = %kind, state = %state, "late or duplicate delivery discarded");
                self.log_communication(
                    request_id,
                    method,
                    kind,
                    MessageState::Discarded,
                    Some(format!("late or duplicate delivery, request already {state}")),
                );
                Dispatched::LateOrDuplicate(state)
            }
            None => {
                warn!(request_id = %request_id, kind = %kind, "message for unknown request discarded");
                self.log_communication(
                    request_id,
                    method,
                    kind,
                    MessageState::Discarded,
                    Some("unknown request ID".to_string()),
                );
                Dispatched::Unknown
            }
        }
    }

    fn spawn_inbound(self: &Arc<Self>, request_id: RequestId, method: MessageMethod, payload: Value) {
        self.log_communication(&request_id, method, MessageKind::Request, MessageState::Received, None);
        let shared = Arc::clone(self);
        tokio::spawn(async move {
            let reply = shared.answer(&request_id, method, payload).await;
            let (state, details) = match reply.kind {
                MessageKind::Response => (MessageState::Succeeded, None),
                _ => (MessageState::Failed, Some(fault_detail(reply.payload.clone()))),
            };
            match shared.write(&reply).await {
                Ok(()) => shared.log_communication(&request_id, method, reply.kind, state, details),
                Err(err) => {
                    warn!(request_id = %request_id, method = %method, error = %err, "failed to answer plugin request")
                }
            }
        });
    }

    async fn answer(&self, request_id: &RequestId, method: MessageMethod, payload: Value) -> Message {
        match self.handler.get() {
            Some(handler) => match handler.handle(method, payload).await {
                Ok(body) => Message::response(request_id.clone(), method, body),
                Err(err) => Message::fault(request_id.clone(), method, err.to_string()),
            },
            None if method == MessageMethod::Log => {
                match serde_json::from_value::<LogRequest>(payload) {
                    Ok(request) => {
                        self.log(&LogEntry::task_log(
                            request_id.clone(),
                            request.message,
                            request.level,
                        ));
                        Message::response(request_id.clone(), method, json!({}))
                    }
                    Err(err) => Message::fault(
                        request_id.clone(),
                        method,
                        format!("invalid log request: {err}"),
                    ),
                }
            }
            None => Message::fault(
                request_id.clone(),
                method,
                format!("host does not handle {method}"),
            ),
        }
    }

    async fn await_response(
        &self,
        request_id: &RequestId,
        timeout: Duration,
    ) -> Result<Value, MessagingError> {
        let Some((mut receiver, progress)) = self.pending.take_waiter(request_id) else {
            return Err(MessagingError::UnknownRequest(request_id.clone()));
        };

        let outcome = match progress {
            // Already ended, the outcome is waiting in the channel.
            None => receiver.await,
            Some(progress) => {
                let deadline = tokio::time::sleep(timeout);
                tokio::pin!(deadline);
                loop {
                    tokio::select! {
                        outcome = &mut receiver => break outcome,
                        _ = progress.notified() => {
                            deadline.as_mut().reset(Instant::now() + timeout);
                        }
                        _ = &mut deadline => {
                            if let Some(operation) = self.pending.complete(
                                request_id,
                                OperationState::TimedOut,
                                || Outcome::TimedOut,
                            ) {
                                warn!(request_id = %request_id, method = %operation.method, timeout_ms = timeout.as_millis(), "request timed out");
                                self.log_communication(
                                    request_id,
                                    operation.method,
                                    MessageKind::Request,
                                    MessageState::TimedOut,
                                    Some(format!("no response within {timeout:?}")),
                                );
                            }
                            // Either our timeout or whatever beat it is in the channel now.
                            break (&mut receiver).await;
                        }
                    }
                }
            }
        };

        let request_id = request_id.clone();
        match outcome.map_err(|_| MessagingError::Closed)? {
            Outcome::Succeeded(payload) => Ok(payload),
            Outcome::Failed(detail) => Err(MessagingError::RemoteFault { request_id, detail }),
            Outcome::Cancelled(reason) => Err(MessagingError::Cancelled { request_id, reason }),
            Outcome::TimedOut => Err(MessagingError::Timeout {
                request_id,
                timeout,
            }),
            Outcome::ConnectionLost => Err(ProtocolError::ConnectionClosed.into()),
        }
    }

    /// Mark the session dead and fail everything still outstanding.
    fn shutdown(&self, detail: &str) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!(pending = self.pending.len(), detail, "plugin connection closed");
        }
        if let Some(semaphore) = &self.inflight {
            semaphore.close();
        }
        for request_id in self.pending.ids() {
            if let Some(operation) =
                self.pending
                    .complete(&request_id, OperationState::Failed, || Outcome::ConnectionLost)
            {
                self.log_communication(
                    &request_id,
                    operation.method,
                    MessageKind::Request,
                    MessageState::Failed,
                    Some(detail.to_string()),
                );
            }
        }
    }
}

async fn read_loop<R>(shared: Arc<Shared>, mut frames: FramedRead<R, LengthDelimitedCodec>)
where
    R: AsyncRead + Unpin,
{
    while let Some(frame) = frames.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(err) => {
                warn!(error = %err, "plugin stream unusable");
                shared.shutdown(&format!("stream error: {err}"));
                return;
            }
        };
        // Framing is intact, so one bad message only costs that message.
        match decode_frame(&frame) {
            Ok(message) => {
                shared.dispatch(message);
            }
            Err(err) => warn!(error = %err, bytes = frame.len(), "discarding undecodable message"),
        }
    }
    shared.shutdown("plugin closed the connection");
}

fn fault_detail(payload: Value) -> String {
    match serde_json::from_value::<Fault>(payload.clone()) {
        Ok(fault) => fault.message,
        Err(_) if payload.is_null() => "plugin reported a fault".to_string(),
        Err(_) => payload.to_string(),
    }
}

fn cancel_reason(payload: Value) -> String {
    serde_json::from_value::<CancelPayload>(payload)
        .ok()
        .and_then(|cancel| cancel.reason)
        .filter(|reason| !reason.is_empty())
        .unwrap_or_else(|| DEFAULT_CANCEL_REASON.to_string())
}
