use crate::ProtocolDiagnostics;
use sluice_types::TelemetryEvent;
use std::io::{self, IoSlice, Read, Seek, SeekFrom, Write};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncSeek, AsyncWrite, ReadBuf};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Static facts about the network request whose body is being read.
#[derive(Debug, Clone)]
pub struct RequestInfo {
    pub source: String,
    pub url: String,
    pub is_retry: bool,
    pub header_duration: Option<Duration>,
    /// When the request was issued; `request_duration` is measured from here.
    pub started_at: Instant,
    pub http_status_code: Option<u16>,
}

impl RequestInfo {
    pub fn new(source: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            url: url.into(),
            is_retry: false,
            header_duration: None,
            started_at: Instant::now(),
            http_status_code: None,
        }
    }

    pub fn retry(mut self, is_retry: bool) -> Self {
        self.is_retry = is_retry;
        self
    }

    pub fn header_duration(mut self, duration: Duration) -> Self {
        self.header_duration = Some(duration);
        self
    }

    pub fn status(mut self, code: u16) -> Self {
        self.http_status_code = Some(code);
        self
    }

    pub fn started_at(mut self, started_at: Instant) -> Self {
        self.started_at = started_at;
        self
    }
}

/// Holds the sink until the first report; taking it under the lock is the latch.
struct SinkLatch(Mutex<Option<Arc<dyn ProtocolDiagnostics>>>);

impl SinkLatch {
    fn new(sink: Option<Arc<dyn ProtocolDiagnostics>>) -> Self {
        Self(Mutex::new(sink))
    }

    fn take(&self) -> Option<Arc<dyn ProtocolDiagnostics>> {
        match self.0.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }

    fn is_armed(&self) -> bool {
        match self.0.lock() {
            Ok(guard) => guard.is_some(),
            Err(poisoned) => poisoned.into_inner().is_some(),
        }
    }
}

struct Reporter {
    latch: SinkLatch,
    info: RequestInfo,
    bytes_read: u64,
    cancellation: Option<CancellationToken>,
}

impl Reporter {
    fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }

    fn observe_read(&mut self, read: usize, capacity: usize) {
        if read > 0 {
            self.bytes_read += read as u64;
        } else if capacity > 0 {
            self.raise(true, false);
        }
    }

    fn observe_error(&self) {
        self.raise(false, self.is_cancelled());
    }

    fn release(&self) {
        if self.is_cancelled() {
            self.raise(false, true);
        } else {
            self.raise(true, false);
        }
    }

    fn raise(&self, is_success: bool, is_cancelled: bool) {
        let Some(sink) = self.latch.take() else {
            return;
        };

        let event = TelemetryEvent {
            source: self.info.source.clone(),
            url: self.info.url.clone(),
            header_duration: self.info.header_duration,
            request_duration: self.info.started_at.elapsed(),
            http_status_code: self.info.http_status_code,
            bytes_transferred: self.bytes_read,
            is_success,
            is_retry: self.info.is_retry,
            is_cancelled,
        };

        if catch_unwind(AssertUnwindSafe(|| sink.on_event(&event))).is_err() {
            warn!(source = %event.source, url = %event.url, "diagnostics sink panicked");
        }
    }
}

impl Drop for Reporter {
    fn drop(&mut self) {
        self.release();
    }
}

/// Byte stream wrapper that reports how a network read sequence ended.
///
/// Exactly one [`TelemetryEvent`] reaches the sink, from whichever happens
/// first: a read that hits end-of-data, a read that fails, or the wrapper
/// being dropped or unwrapped. Data passes through untouched; only the byte
/// count of successful reads is observed.
pub struct DiagnosticsStream<S> {
    inner: S,
    reporter: Reporter,
}

impl<S> DiagnosticsStream<S> {
    /// A `None` sink disables instrumentation.
    pub fn new(inner: S, sink: Option<Arc<dyn ProtocolDiagnostics>>, info: RequestInfo) -> Self {
        Self {
            inner,
            reporter: Reporter {
                latch: SinkLatch::new(sink),
                info,
                bytes_read: 0,
                cancellation: None,
            },
        }
    }

    /// Classify failures and early release as cancellation once `token` fires.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.reporter.cancellation = Some(token);
        self
    }

    pub fn bytes_transferred(&self) -> u64 {
        self.reporter.bytes_read
    }

    /// Whether the event has already been sent (or instrumentation is off).
    pub fn is_reported(&self) -> bool {
        !self.reporter.latch.is_armed()
    }

    pub fn info(&self) -> &RequestInfo {
        &self.reporter.info
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    /// Report (if still pending) and hand back the wrapped stream.
    pub fn into_inner(self) -> S {
        let Self { inner, reporter } = self;
        drop(reporter);
        inner
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for DiagnosticsStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let capacity = buf.remaining();
        let before = buf.filled().len();

        match Pin::new(&mut this.inner).poll_read(cx, buf) {
            Poll::Ready(Ok(())) => {
                let read = buf.filled().len() - before;
                this.reporter.observe_read(read, capacity);
                Poll::Ready(Ok(()))
            }
            Poll::Ready(Err(err)) => {
                this.reporter.observe_error();
                Poll::Ready(Err(err))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for DiagnosticsStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write_vectored(cx, bufs)
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

impl<S: AsyncSeek + Unpin> AsyncSeek for DiagnosticsStream<S> {
    fn start_seek(self: Pin<&mut Self>, position: SeekFrom) -> io::Result<()> {
        Pin::new(&mut self.get_mut().inner).start_seek(position)
    }

    fn poll_complete(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<u64>> {
        Pin::new(&mut self.get_mut().inner).poll_complete(cx)
    }
}

impl<S: Read> Read for DiagnosticsStream<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.inner.read(buf) {
            Ok(read) => {
                self.reporter.observe_read(read, buf.len());
                Ok(read)
            }
            Err(err) => {
                self.reporter.observe_error();
                Err(err)
            }
        }
    }
}

impl<S: Write> Write for DiagnosticsStream<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<S: Seek> Seek for DiagnosticsStream<S> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.inner.seek(pos)
    }
}
