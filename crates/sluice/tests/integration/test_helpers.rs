// Helpers shared by the integration tests

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use sluice::protocol::{decode_message, encode_message, frame_codec};
use sluice::{
    LogRecord, MemoryLogSink, Message, PluginConnection, RequestId, Runtime, RuntimeConfig,
};
use std::sync::Arc;
use tokio::io::{DuplexStream, ReadHalf, WriteHalf};
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};

pub struct FakePlugin {
    inbound: FramedRead<ReadHalf<DuplexStream>, LengthDelimitedCodec>,
    outbound: FramedWrite<WriteHalf<DuplexStream>, LengthDelimitedCodec>,
}

impl FakePlugin {
    pub async fn recv(&mut self) -> Message {
        let frame = self
            .inbound
            .next()
            .await
            .expect("host closed the pipe")
            .expect("frame read failed");
        decode_message(&frame).expect("undecodable frame from host")
    }

    pub async fn send(&mut self, message: Message) {
        let bytes = encode_message(&message).expect("encode failed");
        self.outbound
            .send(Bytes::from(bytes))
            .await
            .expect("write to host failed");
    }

    /// Answer every request with `respond` until the host hangs up.
    pub fn serve<F>(mut self, respond: F) -> tokio::task::JoinHandle<()>
    where
        F: Fn(Message) -> Option<Message> + Send + 'static,
    {
        tokio::spawn(async move {
            while let Some(Ok(frame)) = self.inbound.next().await {
                let Ok(message) = decode_message(&frame) else {
                    continue;
                };
                if let Some(reply) = respond(message) {
                    self.send(reply).await;
                }
            }
        })
    }
}

pub fn test_runtime() -> Runtime {
    sluice::bootstrap(&RuntimeConfig::default()).expect("bootstrap failed")
}

pub fn connect(runtime: &Runtime) -> (Arc<PluginConnection>, FakePlugin, Arc<MemoryLogSink>) {
    let (host, plugin) = tokio::io::duplex(256 * 1024);
    let (host_reader, host_writer) = tokio::io::split(host);
    let (plugin_reader, plugin_writer) = tokio::io::split(plugin);
    let sink = Arc::new(MemoryLogSink::new());
    let connection = runtime.connect_with_sink(host_reader, host_writer, sink.clone());

    let codec = frame_codec(runtime.options().max_frame_bytes);
    let plugin = FakePlugin {
        inbound: FramedRead::new(plugin_reader, codec.clone()),
        outbound: FramedWrite::new(plugin_writer, codec),
    };
    (Arc::new(connection), plugin, sink)
}

pub fn communication_for(sink: &MemoryLogSink, request_id: &RequestId) -> Vec<LogRecord> {
    sink.category("communication")
        .into_iter()
        .filter(|record| record.field("request ID") == Some(request_id.as_str()))
        .collect()
}

pub fn states_for(sink: &MemoryLogSink, request_id: &RequestId) -> Vec<String> {
    communication_for(sink, request_id)
        .iter()
        .filter_map(|record| record.field("state").map(str::to_string))
        .collect()
}
