use super::test_helpers::{communication_for, connect, states_for, test_runtime};
use serde_json::json;
use sluice::{
    CancelReason, Dispatched, LogLevel, Message, MessageKind, MessageMethod, MessagingError,
    OperationState, RequestId,
};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn list_resources_round_trip() {
    let runtime = test_runtime();
    let (connection, mut plugin, sink) = connect(&runtime);

    let request_id = connection
        .send(MessageMethod::ListResources, json!({}))
        .await
        .unwrap();
    let request = plugin.recv().await;
    assert_eq!(request.request_id, request_id);
    assert_eq!(request.method, MessageMethod::ListResources);

    plugin
        .send(Message::response(
            request_id.clone(),
            MessageMethod::ListResources,
            json!({ "items": [] }),
        ))
        .await;

    let payload = connection
        .await_response(&request_id, Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(payload, json!({ "items": [] }));
    assert!(connection.pending(&request_id).is_none());
    assert_eq!(connection.pending_count(), 0);
    assert_eq!(states_for(&sink, &request_id), ["Sent", "Succeeded"]);
}

#[tokio::test]
async fn concurrent_requests_correlate_out_of_order() {
    let runtime = test_runtime();
    let (connection, mut plugin, _sink) = connect(&runtime);

    let mut waiters = Vec::new();
    for n in 0..8 {
        let connection = Arc::clone(&connection);
        waiters.push(tokio::spawn(async move {
            connection
                .request(MessageMethod::GetResource, json!({ "n": n }))
                .await
        }));
    }

    let mut requests = Vec::new();
    for _ in 0..8 {
        requests.push(plugin.recv().await);
    }
    for request in requests.into_iter().rev() {
        let n = request.payload["n"].clone();
        plugin
            .send(Message::response(
                request.request_id,
                request.method,
                json!({ "echo": n }),
            ))
            .await;
    }

    for (n, waiter) in waiters.into_iter().enumerate() {
        let payload = waiter.await.unwrap().unwrap();
        assert_eq!(payload, json!({ "echo": n }));
    }
    assert_eq!(connection.pending_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn duplicate_deliveries_race_to_a_single_resolution() {
    let runtime = test_runtime();
    let (connection, _plugin, sink) = connect(&runtime);
    let request_id = connection
        .send(MessageMethod::GetResource, json!({}))
        .await
        .unwrap();

    let waiter = {
        let connection = Arc::clone(&connection);
        let request_id = request_id.clone();
        tokio::spawn(async move {
            connection
                .await_response(&request_id, Duration::from_millis(5))
                .await
        })
    };

    let mut dispatchers = Vec::new();
    for _ in 0..16 {
        let connection = Arc::clone(&connection);
        let response = Message::response(
            request_id.clone(),
            MessageMethod::GetResource,
            json!({ "ok": true }),
        );
        dispatchers.push(tokio::spawn(async move { connection.dispatch(response) }));
    }

    let mut resolved = 0;
    for dispatcher in dispatchers {
        match dispatcher.await.unwrap() {
            Dispatched::Resolved(OperationState::Succeeded) => resolved += 1,
            Dispatched::LateOrDuplicate(_) => {}
            other => panic!("unexpected dispatch outcome {other:?}"),
        }
    }
    let result = waiter.await.unwrap();

    let terminal: Vec<_> = states_for(&sink, &request_id)
        .into_iter()
        .filter(|state| state == "Succeeded" || state == "TimedOut")
        .collect();
    assert_eq!(terminal.len(), 1);
    match result {
        Ok(payload) => {
            assert_eq!(resolved, 1);
            assert_eq!(terminal, ["Succeeded"]);
            assert_eq!(payload, json!({ "ok": true }));
        }
        Err(MessagingError::Timeout { .. }) => {
            assert_eq!(resolved, 0);
            assert_eq!(terminal, ["TimedOut"]);
        }
        Err(other) => panic!("unexpected result {other}"),
    }
    assert_eq!(connection.pending_count(), 0);
}

#[tokio::test]
async fn cancelled_request_ignores_the_late_response() {
    let runtime = test_runtime();
    let (connection, mut plugin, sink) = connect(&runtime);

    let request_id = connection
        .send(MessageMethod::GetResource, json!({ "id": "pkg" }))
        .await
        .unwrap();
    let _request = plugin.recv().await;

    assert!(
        connection
            .cancel_locally(&request_id, CancelReason::capture("download abandoned"))
            .await
    );
    let notice = plugin.recv().await;
    assert_eq!(notice.kind, MessageKind::Cancel);
    assert_eq!(notice.request_id, request_id);

    plugin
        .send(Message::response(
            request_id.clone(),
            MessageMethod::GetResource,
            json!({ "bytes": 10 }),
        ))
        .await;

    match connection
        .await_response(&request_id, Duration::from_secs(1))
        .await
    {
        Err(MessagingError::Cancelled { reason, .. }) => {
            assert_eq!(reason.reason(), "download abandoned")
        }
        other => panic!("expected cancellation, got {other:?}"),
    }

    // The late response travels through the reader task; wait for it to land.
    for _ in 0..100 {
        if states_for(&sink, &request_id).len() == 3 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let records = communication_for(&sink, &request_id);
    assert_eq!(states_for(&sink, &request_id), ["Sent", "Cancelled", "Discarded"]);
    assert_eq!(records[1].field("details"), Some("download abandoned"));
}

#[tokio::test]
async fn unknown_request_id_is_logged_exactly_once() {
    let runtime = test_runtime();
    let (connection, mut plugin, sink) = connect(&runtime);
    let ghost = RequestId::from("never-issued");

    plugin
        .send(Message::fault(ghost.clone(), MessageMethod::GetResource, "nope"))
        .await;

    for _ in 0..100 {
        if !communication_for(&sink, &ghost).is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let records = communication_for(&sink, &ghost);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].field("message kind"), Some("Fault"));
    assert_eq!(records[0].field("details"), Some("unknown request ID"));
    assert_eq!(connection.pending_count(), 0);
    assert!(!connection.is_closed());
}

#[tokio::test]
async fn plugin_hangup_fails_every_pending_request() {
    let runtime = test_runtime();
    let (connection, plugin, _sink) = connect(&runtime);

    let first = connection
        .send(MessageMethod::Initialize, json!({}))
        .await
        .unwrap();
    let second = connection
        .send(MessageMethod::GetOperationClaims, json!({}))
        .await
        .unwrap();
    drop(plugin);

    for request_id in [first, second] {
        let err = connection
            .await_response(&request_id, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(err.is_session_fatal(), "{err}");
    }
    assert!(connection.is_closed());
}

#[tokio::test]
async fn served_plugin_answers_through_request() {
    let runtime = test_runtime();
    let (connection, plugin, sink) = connect(&runtime);
    let _server = plugin.serve(|message| match message.method {
        MessageMethod::Handshake => Some(Message::response(
            message.request_id,
            message.method,
            json!({ "protocolVersion": "2.0.0" }),
        )),
        _ => Some(Message::fault(message.request_id, message.method, "unsupported")),
    });

    let handshake = connection
        .request(MessageMethod::Handshake, json!({ "minimumProtocolVersion": "1.0.0" }))
        .await
        .unwrap();
    assert_eq!(handshake["protocolVersion"], "2.0.0");

    let err = connection
        .request(MessageMethod::SetLogLevel, json!({ "level": "debug" }))
        .await
        .unwrap_err();
    assert!(matches!(err, MessagingError::RemoteFault { ref detail, .. } if detail == "unsupported"));

    {
        let connection = Arc::clone(&connection);
        tokio::spawn(async move {
            connection.log_task(&RequestId::from("narrated"), "fetching index", LogLevel::Verbose);
        })
        .await
        .unwrap();
    }
    let narration = sink.category("log task");
    assert_eq!(narration.len(), 1);
    assert_eq!(narration[0].field("request ID"), Some("narrated"));
    assert!(narration[0].field("current task ID").is_some());
}
