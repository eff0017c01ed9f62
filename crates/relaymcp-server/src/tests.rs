//! End-to-end tests for the connection loop.
//!
//! Each test runs a real server over an in-memory NDJSON pipe and talks to
//! it through [`TestPeer`].

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use relaymcp_core::{McpError, McpErrorCode, McpResult};
use relaymcp_protocol::{
    JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, RequestId, methods,
};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::testing::TestPeer;
use crate::{
    Filter, MessageContext, MessageHandler, NotificationContext, RequestContext, Server,
    ServerBuilder, TaskManager,
};

// ============================================================================
// Fixtures
// ============================================================================

#[derive(Deserialize)]
struct EchoParams {
    text: String,
}

fn base() -> ServerBuilder {
    Server::new("test-server", "1.0.0")
        .instructions("Use echo to echo.")
        .request_handler("echo", |ctx: RequestContext<EchoParams>| async move {
            Ok(json!({ "text": ctx.params().text }))
        })
        .request_handler("explode", |_ctx: RequestContext<Value>| async move {
            if true {
                panic!("handler blew up");
            }
            Ok(Value::Null)
        })
        .request_handler("stall", |ctx: RequestContext<Value>| async move {
            ctx.session()
                .send_notification("notifications/message", Some(json!({"data": "stalling"})))?;
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(json!({}))
        })
}

async fn started(builder: ServerBuilder) -> TestPeer {
    let mut peer = TestPeer::start(builder.build());
    peer.initialize().await.unwrap();
    peer
}

fn code_of(result: McpResult<Value>) -> McpErrorCode {
    result.unwrap_err().code
}

// ============================================================================
// Handshake
// ============================================================================

#[tokio::test]
async fn initialize_reports_server_identity() {
    let mut peer = TestPeer::start(base().capability("tools", json!({})).build());
    let result = peer.initialize().await.unwrap();

    assert_eq!(result["protocolVersion"], relaymcp_protocol::PROTOCOL_VERSION);
    assert_eq!(result["serverInfo"]["name"], "test-server");
    assert_eq!(result["instructions"], "Use echo to echo.");
    assert_eq!(result["capabilities"]["tools"], json!({}));
    assert!(result["capabilities"].get("tasks").is_none());

    peer.close().await.unwrap();
}

#[tokio::test]
async fn installing_tasks_advertises_the_capability() {
    let mut peer = TestPeer::start(base().tasks(Arc::new(TaskManager::new())).build());
    let result = peer.initialize().await.unwrap();
    assert_eq!(result["capabilities"]["tasks"], json!({"list": {}, "cancel": {}}));
    peer.close().await.unwrap();
}

#[tokio::test]
async fn requests_before_initialize_are_rejected() {
    let mut peer = TestPeer::start(base().build());

    assert_eq!(peer.request(methods::PING, None).await.unwrap(), json!({}));
    let err = peer
        .request("echo", Some(json!({"text": "hi"})))
        .await
        .unwrap_err();
    assert_eq!(err.code, McpErrorCode::InvalidRequest);
    assert!(err.message.contains("initialize"));

    peer.close().await.unwrap();
}

// ============================================================================
// Dispatch errors
// ============================================================================

#[tokio::test]
async fn routing_errors_map_to_json_rpc_codes() {
    let mut peer = started(base()).await;

    assert_eq!(
        peer.request("echo", Some(json!({"text": "hi"}))).await.unwrap(),
        json!({"text": "hi"})
    );
    assert_eq!(
        code_of(peer.request("tools/call", None).await),
        McpErrorCode::MethodNotFound
    );
    assert_eq!(
        code_of(peer.request("echo", Some(json!({"text": 5}))).await),
        McpErrorCode::InvalidParams
    );

    peer.close().await.unwrap();
}

#[tokio::test]
async fn malformed_frame_gets_a_parse_error_and_the_connection_survives() {
    let mut peer = started(base()).await;

    peer.send_raw(b"{not json}\n").await.unwrap();
    match peer.recv().await.unwrap() {
        JsonRpcMessage::Error(err) => {
            assert!(err.id.is_none());
            assert_eq!(err.error.code, -32700);
        }
        other => panic!("expected parse error, got {other:?}"),
    }

    assert_eq!(peer.request(methods::PING, None).await.unwrap(), json!({}));
    peer.close().await.unwrap();
}

#[tokio::test]
async fn handler_panic_becomes_internal_error() {
    let mut peer = started(base()).await;

    let err = peer.request("explode", None).await.unwrap_err();
    assert_eq!(err.code, McpErrorCode::InternalError);
    assert!(err.message.contains("handler blew up"));

    assert_eq!(peer.request(methods::PING, None).await.unwrap(), json!({}));
    peer.close().await.unwrap();
}

#[tokio::test]
async fn slow_requests_time_out() {
    let mut peer = started(base().request_timeout(1)).await;
    assert_eq!(
        code_of(peer.request("stall", None).await),
        McpErrorCode::RequestTimeout
    );
    peer.close().await.unwrap();
}

// ============================================================================
// Cancellation
// ============================================================================

#[tokio::test]
async fn cancelled_notification_stops_the_request() {
    let mut peer = started(base()).await;
    let id = RequestId::Number(77);

    peer.send(JsonRpcRequest::new("stall", None, id.clone()))
        .await
        .unwrap();
    let notice = peer.recv().await.unwrap();
    assert_eq!(notice.method(), Some("notifications/message"));

    peer.notify(
        methods::NOTIFICATION_CANCELLED,
        Some(json!({"requestId": 77, "reason": "user abort"})),
    )
    .await
    .unwrap();

    let err = peer.wait_for(&id).await.unwrap_err();
    assert_eq!(err.code, McpErrorCode::RequestCancelled);
    peer.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reused_in_flight_id_is_rejected_and_the_original_stays_cancellable() {
    let mut peer = started(base()).await;
    let id = RequestId::Number(42);

    peer.send(JsonRpcRequest::new("stall", None, id.clone()))
        .await
        .unwrap();
    let notice = peer.recv().await.unwrap();
    assert_eq!(notice.method(), Some("notifications/message"));

    let err = peer
        .call(id.clone(), "echo", Some(json!({"text": "again"})))
        .await
        .unwrap_err();
    assert_eq!(err.code, McpErrorCode::InvalidRequest);

    peer.notify(methods::NOTIFICATION_CANCELLED, Some(json!({"requestId": 42})))
        .await
        .unwrap();
    let err = peer.wait_for(&id).await.unwrap_err();
    assert_eq!(err.code, McpErrorCode::RequestCancelled);
    peer.close().await.unwrap();
}

// ============================================================================
// Ordering
// ============================================================================

/// Records the id of every `echo` request as it enters the chain.
struct EntryLog(Arc<Mutex<Vec<RequestId>>>);

impl Filter for EntryLog {
    fn handle<'a>(
        &'a self,
        ctx: &'a mut MessageContext,
        next: &'a dyn MessageHandler,
    ) -> BoxFuture<'a, McpResult<()>> {
        Box::pin(async move {
            if ctx.method() == Some("echo") {
                if let Some(id) = ctx.request_id() {
                    self.0.lock().unwrap().push(id.clone());
                }
            }
            next.handle(ctx).await
        })
    }
}

fn frame(message: impl Into<JsonRpcMessage>) -> String {
    let mut line = serde_json::to_string(&message.into()).unwrap();
    line.push('\n');
    line
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn pipelined_requests_enter_the_chain_in_wire_order() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut peer = started(base().filter(EntryLog(Arc::clone(&log)))).await;

    let mut expected = Vec::new();
    for round in 0..50 {
        let first = RequestId::Number(1000 + round);
        let second = RequestId::Number(2000 + round);
        let chunk = frame(JsonRpcRequest::new("echo", Some(json!({"text": "a"})), first.clone()))
            + &frame(JsonRpcRequest::new("echo", Some(json!({"text": "b"})), second.clone()));
        peer.send_raw(chunk.as_bytes()).await.unwrap();

        assert_eq!(peer.wait_for(&first).await.unwrap(), json!({"text": "a"}));
        assert_eq!(peer.wait_for(&second).await.unwrap(), json!({"text": "b"}));
        expected.push(first);
        expected.push(second);
    }

    assert_eq!(*log.lock().unwrap(), expected);
    peer.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancellation_sent_right_behind_its_request_is_honoured() {
    let mut peer = started(base()).await;

    for round in 0..25 {
        let id = RequestId::Number(500 + round);
        let chunk = frame(JsonRpcRequest::new("stall", None, id.clone()))
            + &frame(JsonRpcNotification::new(
                methods::NOTIFICATION_CANCELLED,
                Some(json!({"requestId": id, "reason": "changed my mind"})),
            ));
        peer.send_raw(chunk.as_bytes()).await.unwrap();

        let err = peer.wait_for(&id).await.unwrap_err();
        assert_eq!(err.code, McpErrorCode::RequestCancelled, "round {round}");
    }

    assert_eq!(peer.request(methods::PING, None).await.unwrap(), json!({}));
    peer.close().await.unwrap();
}

// ============================================================================
// Server-initiated requests
// ============================================================================

#[tokio::test]
async fn handler_can_call_back_into_the_client() {
    let builder = base().request_handler("roots/count", |ctx: RequestContext<Value>| async move {
        let roots = ctx
            .session()
            .send_request("roots/list", None, ctx.cancellation())
            .await?;
        let count = roots["roots"].as_array().map_or(0, Vec::len);
        Ok(json!({ "count": count }))
    });
    let mut peer = started(builder).await;

    let id = peer.next_id();
    peer.send(JsonRpcRequest::new("roots/count", None, id.clone()))
        .await
        .unwrap();

    let JsonRpcMessage::Request(outbound) = peer.recv().await.unwrap() else {
        panic!("expected a request from the server");
    };
    assert_eq!(outbound.method, "roots/list");
    peer.respond(outbound.id, json!({"roots": [{"uri": "file:///a"}, {"uri": "file:///b"}]}))
        .await
        .unwrap();

    assert_eq!(peer.wait_for(&id).await.unwrap(), json!({"count": 2}));
    peer.close().await.unwrap();
}

// ============================================================================
// Filters
// ============================================================================

/// Rejects every notification except the handshake ones.
struct RejectNotifications(Arc<AtomicUsize>);

impl Filter for RejectNotifications {
    fn handle<'a>(
        &'a self,
        ctx: &'a mut MessageContext,
        next: &'a dyn MessageHandler,
    ) -> BoxFuture<'a, McpResult<()>> {
        Box::pin(async move {
            if let JsonRpcMessage::Notification(n) = ctx.message() {
                if n.method != methods::NOTIFICATION_INITIALIZED {
                    self.0.fetch_add(1, Ordering::SeqCst);
                    return Err(McpError::invalid_request("notifications are disabled"));
                }
            }
            next.handle(ctx).await
        })
    }
}

#[tokio::test]
async fn notification_errors_are_not_answered() {
    let rejected = Arc::new(AtomicUsize::new(0));
    let seen = Arc::new(AtomicUsize::new(0));
    let sink = Arc::clone(&seen);
    let builder = base()
        .filter(RejectNotifications(Arc::clone(&rejected)))
        .notification_handler("notifications/poke", move |_ctx: NotificationContext<Value>| {
            sink.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        });
    let mut peer = started(builder).await;

    peer.notify("notifications/poke", None).await.unwrap();
    // The next message on the wire is the ping answer, not an error.
    assert_eq!(peer.request(methods::PING, None).await.unwrap(), json!({}));
    if let Ok(Ok(unexpected)) = tokio::time::timeout(Duration::from_millis(50), peer.recv()).await {
        panic!("unexpected message {unexpected:?}");
    }

    assert_eq!(rejected.load(Ordering::SeqCst), 1);
    assert_eq!(seen.load(Ordering::SeqCst), 0);
    peer.close().await.unwrap();
}

// ============================================================================
// Tasks
// ============================================================================

fn task_server() -> ServerBuilder {
    base()
        .tasks(Arc::new(TaskManager::new()))
        .task_request_handler("reports/build", |ctx: RequestContext<Value>| async move {
            ctx.checkpoint()?;
            Ok(json!({"rows": 42}))
        })
}

#[tokio::test]
async fn task_augmented_request_completes_in_the_background() {
    let mut peer = started(task_server()).await;

    let created = peer
        .request("reports/build", Some(json!({"task": {"ttl": 60000}})))
        .await
        .unwrap();
    let task = &created["task"];
    assert_eq!(task["status"], "working");
    assert_eq!(task["ttl"], 60000);
    let task_id = task["taskId"].clone();

    let result = peer
        .request(methods::TASKS_RESULT, Some(json!({"taskId": task_id})))
        .await
        .unwrap();
    assert_eq!(result, json!({"rows": 42}));

    let snapshot = peer
        .request(methods::TASKS_GET, Some(json!({"taskId": task_id})))
        .await
        .unwrap();
    assert_eq!(snapshot["status"], "completed");

    assert_eq!(
        code_of(
            peer.request(methods::TASKS_CANCEL, Some(json!({"taskId": task_id})))
                .await
        ),
        McpErrorCode::InvalidParams
    );
    peer.close().await.unwrap();
}

#[tokio::test]
async fn task_handler_runs_inline_without_metadata() {
    let mut peer = started(task_server()).await;
    assert_eq!(
        peer.request("reports/build", None).await.unwrap(),
        json!({"rows": 42})
    );
    peer.close().await.unwrap();
}

#[tokio::test]
async fn tasks_list_is_newest_first() {
    let mut peer = started(task_server()).await;
    let mut ids = Vec::new();
    for _ in 0..3 {
        let created = peer
            .request("reports/build", Some(json!({"task": {}})))
            .await
            .unwrap();
        ids.push(created["task"]["taskId"].clone());
    }

    let page = peer.request(methods::TASKS_LIST, None).await.unwrap();
    let listed: Vec<Value> = page["tasks"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["taskId"].clone())
        .collect();
    ids.reverse();
    assert_eq!(listed, ids);
    assert!(page.get("nextCursor").is_none());
    peer.close().await.unwrap();
}

// ============================================================================
// Logging
// ============================================================================

#[tokio::test]
async fn set_level_is_acknowledged() {
    let mut peer = started(base()).await;
    let result = peer
        .request(methods::LOGGING_SET_LEVEL, Some(json!({"level": "warning"})))
        .await
        .unwrap();
    assert_eq!(result, json!({}));
    assert_eq!(
        code_of(
            peer.request(methods::LOGGING_SET_LEVEL, Some(json!({"level": "loud"})))
                .await
        ),
        McpErrorCode::InvalidParams
    );
    peer.close().await.unwrap();
}
