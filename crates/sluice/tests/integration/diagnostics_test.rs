use super::test_helpers::test_runtime;
use sluice::{DiagnosticsConfig, RequestInfo, RuntimeConfig};
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn instrumented_download_reaches_the_recorder() {
    let runtime = test_runtime();
    let recorder = runtime.recorder().expect("diagnostics enabled by default");

    let body: &[u8] = b"{\"versions\":[\"1.0.0\",\"1.1.0\"]}";
    let info = RequestInfo::new("feed-a.test", "https://feed-a.test/pkg/index.json").status(200);
    let mut stream = runtime.instrument(body, info);

    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await.unwrap();
    assert!(stream.is_reported());
    drop(stream);

    let metrics = recorder.source("feed-a.test").unwrap();
    assert_eq!(metrics.requests, 1);
    assert_eq!(metrics.failures, 0);
    assert_eq!(metrics.bytes_transferred, buf.len() as u64);
    assert_eq!(metrics.last_status, Some(200));
}

#[tokio::test]
async fn abandoned_cancelled_download_counts_as_cancelled() {
    let runtime = test_runtime();
    let recorder = runtime.recorder().unwrap();

    let token = CancellationToken::new();
    let body: &[u8] = b"partial body that nobody finishes reading";
    let mut stream = runtime
        .instrument(body, RequestInfo::new("feed-b.test", "https://feed-b.test/x").retry(true))
        .with_cancellation(token.clone());

    let mut chunk = [0u8; 7];
    stream.read_exact(&mut chunk).await.unwrap();
    token.cancel();
    drop(stream);

    let metrics = recorder.source("feed-b.test").unwrap();
    assert_eq!(metrics.requests, 1);
    assert_eq!(metrics.failures, 1);
    assert_eq!(metrics.bytes_transferred, 7);
}

#[tokio::test]
async fn disabled_diagnostics_report_nothing() {
    let config = RuntimeConfig {
        diagnostics: DiagnosticsConfig { enabled: false },
        ..RuntimeConfig::default()
    };
    let runtime = sluice::bootstrap(&config).unwrap();
    assert!(runtime.recorder().is_none());

    let body: &[u8] = b"abc";
    let mut stream = runtime.instrument(body, RequestInfo::new("feed-c.test", "https://feed-c.test/"));
    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await.unwrap();
    assert_eq!(stream.bytes_transferred(), 3);
    drop(stream);

    // Other tests share the process recorder; this source must never show up.
    let shared = test_runtime();
    assert!(shared.recorder().unwrap().source("feed-c.test").is_none());
}

#[tokio::test]
async fn bootstrap_rejects_invalid_config() {
    let mut config = RuntimeConfig::default();
    config.protocol.request_timeout_ms = 0;
    assert!(matches!(
        sluice::bootstrap(&config),
        Err(sluice::SluiceError::ConfigError(_))
    ));
}
