use once_cell::sync::OnceCell;
use sluice_config::{RuntimeConfig, init_tracing};
use sluice_diagnostics::{DiagnosticsRecorder, DiagnosticsStream, RequestInfo};
use sluice_error::SluiceError;
use sluice_logging::{LogSink, TracingLogSink};
use sluice_messaging::{ConnectionOptions, PluginConnection};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, warn};

static RECORDER: OnceCell<DiagnosticsRecorder> = OnceCell::new();

/// Handle returned by [`bootstrap`]. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Runtime {
    config: RuntimeConfig,
    options: ConnectionOptions,
    recorder: Option<DiagnosticsRecorder>,
}

/// Install process-wide logging and diagnostics for `config`.
///
/// Safe to call more than once. Whatever the first call installed stays in place.
pub fn bootstrap(config: &RuntimeConfig) -> Result<Runtime, SluiceError> {
    config.validate()?;

    if let Err(err) = init_tracing(&config.logging) {
        debug!(error = %err, "keeping existing tracing subscriber");
    }

    let recorder = config.diagnostics.enabled.then(|| {
        RECORDER
            .get_or_init(|| {
                let recorder = DiagnosticsRecorder::new();
                if !sluice_diagnostics::set_global(Arc::new(recorder.clone())) {
                    warn!("another diagnostics sink is installed, recorder will only see local streams");
                }
                recorder
            })
            .clone()
    });

    info!(
        request_timeout_ms = config.protocol.request_timeout_ms,
        max_inflight = config.protocol.max_inflight,
        diagnostics = config.diagnostics.enabled,
        "sluice runtime ready"
    );

    Ok(Runtime {
        config: config.clone(),
        options: config.protocol.to_options(),
        recorder,
    })
}

impl Runtime {
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    /// The process recorder, when diagnostics are enabled.
    pub fn recorder(&self) -> Option<&DiagnosticsRecorder> {
        self.recorder.as_ref()
    }

    /// Open a session whose log entries go to `tracing`.
    pub fn connect<R, W>(&self, reader: R, writer: W) -> PluginConnection
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        self.connect_with_sink(reader, writer, Arc::new(TracingLogSink))
    }

    pub fn connect_with_sink<R, W>(
        &self,
        reader: R,
        writer: W,
        log_sink: Arc<dyn LogSink>,
    ) -> PluginConnection
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        PluginConnection::new(reader, writer, self.options.clone(), log_sink)
    }

    /// Wrap a network stream so its outcome reaches the process diagnostics sink.
    pub fn instrument<S>(&self, stream: S, info: RequestInfo) -> DiagnosticsStream<S> {
        let sink = if self.config.diagnostics.enabled {
            sluice_diagnostics::global()
        } else {
            None
        };
        DiagnosticsStream::new(stream, sink, info)
    }
}
