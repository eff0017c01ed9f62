//! Task methods and task-augmented requests.
//!
//! [`TaskMethodsFilter`] answers `tasks/get`, `tasks/result`, `tasks/cancel`
//! and `tasks/list` on its own and passes everything else on. It is installed
//! by [`ServerBuilder::tasks`](crate::ServerBuilder::tasks) as a
//! connection-wide filter.

use std::sync::Arc;

use futures::future::BoxFuture;
use relaymcp_core::logging::{debug, targets};
use relaymcp_core::{McpError, McpErrorCode, McpResult};
use relaymcp_protocol::{
    CreateTaskResult, JsonRpcError, JsonRpcMessage, ListTasksParams, RequestEnvelope, TaskIdParams,
    methods,
};
use serde_json::{Value, json};

use crate::dispatch::not_initialized;
use crate::filter::{Filter, MessageHandler};
use crate::router::{BoxedRequestHandler, parse_params};
use crate::tasks::{TaskManager, TaskOutcome};
use crate::{MessageContext, RequestContext};

/// Serves the `tasks/*` methods from a [`TaskManager`].
#[derive(Debug, Clone)]
pub struct TaskMethodsFilter {
    manager: Arc<TaskManager>,
}

impl TaskMethodsFilter {
    /// Creates a filter backed by `manager`.
    #[must_use]
    pub fn new(manager: Arc<TaskManager>) -> Self {
        Self { manager }
    }

    /// The backing manager.
    #[must_use]
    pub fn manager(&self) -> &Arc<TaskManager> {
        &self.manager
    }

    async fn handle_task_method(&self, ctx: &MessageContext, method: &str) -> McpResult<()> {
        if !ctx.session().is_initialized() {
            return Err(not_initialized());
        }
        let params = ctx.message().params().cloned().unwrap_or(Value::Null);
        debug!(target: targets::TASKS, "Handling {}", method);

        match method {
            methods::TASKS_GET => {
                let TaskIdParams { task_id } = parse_params(params)?;
                let task = self
                    .manager
                    .get_task(&task_id)
                    .ok_or_else(|| task_not_found(&task_id))?;
                ctx.respond(serde_json::to_value(task)?)
            }
            methods::TASKS_RESULT => {
                let TaskIdParams { task_id } = parse_params(params)?;
                let outcome = self
                    .manager
                    .get_result(&task_id, ctx.cancellation())
                    .await?;
                match outcome {
                    TaskOutcome::Completed(value) => ctx.respond(value),
                    TaskOutcome::Failed(value) => match failure_as_error(&value) {
                        Some(error) => Err(error),
                        None => ctx.respond(value),
                    },
                    TaskOutcome::Cancelled => Err(McpError::new(
                        McpErrorCode::RequestCancelled,
                        format!("Task {task_id} was cancelled"),
                    )
                    .with_data(json!({ "taskId": task_id }))),
                }
            }
            methods::TASKS_CANCEL => {
                let TaskIdParams { task_id } = parse_params(params)?;
                let task = self.manager.cancel_task(&task_id).ok_or_else(|| {
                    McpError::invalid_params(format!(
                        "Task not found or already finished: {task_id}"
                    ))
                })?;
                ctx.respond(serde_json::to_value(task)?)
            }
            methods::TASKS_LIST => {
                let ListTasksParams { cursor } = parse_params(params)?;
                let page = self
                    .manager
                    .list_tasks(cursor.as_deref(), self.manager.defaults().page_size)?;
                ctx.respond(serde_json::to_value(page)?)
            }
            other => Err(McpError::method_not_found(other)),
        }
    }
}

impl Filter for TaskMethodsFilter {
    fn handle<'a>(
        &'a self,
        ctx: &'a mut MessageContext,
        next: &'a dyn MessageHandler,
    ) -> BoxFuture<'a, McpResult<()>> {
        Box::pin(async move {
            let method = match ctx.message() {
                JsonRpcMessage::Request(req) if methods::is_task_method(&req.method) => {
                    req.method.clone()
                }
                _ => return next.handle(ctx).await,
            };
            self.handle_task_method(ctx, &method).await
        })
    }
}

fn task_not_found(task_id: &str) -> McpError {
    McpError::invalid_params(format!("Task not found: {task_id}"))
}

/// A failure payload shaped like a JSON-RPC error is replayed as one.
fn failure_as_error(value: &Value) -> Option<McpError> {
    let object = value.as_object()?;
    if !object.contains_key("code") || !object.contains_key("message") {
        return None;
    }
    serde_json::from_value::<JsonRpcError>(value.clone())
        .ok()
        .map(McpError::from)
}

/// Wraps a request handler so that requests carrying `task` metadata run as
/// managed tasks.
///
/// With metadata and an installed [`TaskManager`], the request is answered at
/// once with `{task}` and the handler runs in the background under the task's
/// cancellation token. Otherwise the handler runs inline.
pub(crate) fn task_augmented(handler: BoxedRequestHandler) -> BoxedRequestHandler {
    Arc::new(
        move |ctx: RequestContext<Value>| -> BoxFuture<'static, McpResult<Value>> {
            let handler = Arc::clone(&handler);
            Box::pin(async move {
                let envelope = RequestEnvelope::from_params(Some(ctx.params()));
                let (Some(metadata), Some(manager)) = (envelope.task, ctx.service::<TaskManager>())
                else {
                    return handler(ctx).await;
                };

                let task = manager.create_task(metadata.ttl, None);
                let token = manager
                    .cancellation_token(&task.task_id)
                    .ok_or_else(|| task_not_found(&task.task_id))?;
                debug!(
                    target: targets::TASKS,
                    "{} (id={}) running as task {}",
                    ctx.method(),
                    ctx.request_id(),
                    task.task_id
                );
                manager.spawn(&task.task_id, handler(ctx.with_cancellation(token)));

                Ok(serde_json::to_value(CreateTaskResult { task })?)
            })
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::test_session;
    use relaymcp_protocol::{
        Capabilities, ClientInfo, JsonRpcRequest, ListTasksResult, Task, TaskStatus,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc::UnboundedReceiver;
    use tokio_util::sync::CancellationToken;

    struct Fallthrough(Arc<AtomicUsize>);

    impl MessageHandler for Fallthrough {
        fn handle<'a>(&'a self, _ctx: &'a mut MessageContext) -> BoxFuture<'a, McpResult<()>> {
            Box::pin(async move {
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        }
    }

    struct Harness {
        filter: TaskMethodsFilter,
        next: Fallthrough,
        calls: Arc<AtomicUsize>,
        session: crate::Session,
        rx: UnboundedReceiver<JsonRpcMessage>,
    }

    impl Harness {
        fn new() -> Self {
            let (session, rx) = test_session();
            session.initialize(
                ClientInfo::new("client", "1.0"),
                Capabilities::new(),
                "2025-11-25".to_owned(),
            );
            let calls = Arc::new(AtomicUsize::new(0));
            Self {
                filter: TaskMethodsFilter::new(Arc::new(TaskManager::new())),
                next: Fallthrough(Arc::clone(&calls)),
                calls,
                session,
                rx,
            }
        }

        async fn call(&mut self, method: &str, params: Value) -> McpResult<Value> {
            let mut ctx = MessageContext::new(
                self.session.clone(),
                JsonRpcRequest::new(method, Some(params), 1i64).into(),
                CancellationToken::new(),
            );
            self.filter.handle(&mut ctx, &self.next).await?;
            match self.rx.recv().await {
                Some(JsonRpcMessage::Response(resp)) => Ok(resp.result),
                other => panic!("expected response, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn get_and_cancel_round_trip_snapshots() {
        let mut h = Harness::new();
        let id = h.filter.manager().create_task(Some(1_000), None).task_id;

        let got: Task = serde_json::from_value(h.call("tasks/get", json!({"taskId": id})).await.unwrap())
            .unwrap();
        assert_eq!(got.status, TaskStatus::Working);

        let cancelled: Task =
            serde_json::from_value(h.call("tasks/cancel", json!({"taskId": id})).await.unwrap())
                .unwrap();
        assert_eq!(cancelled.status, TaskStatus::Cancelled);

        let again = h.call("tasks/cancel", json!({"taskId": id})).await.unwrap_err();
        assert_eq!(again.code, McpErrorCode::InvalidParams);
        assert_eq!(h.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn result_replays_completion_and_cancellation() {
        let mut h = Harness::new();
        let manager = Arc::clone(h.filter.manager());
        let done = manager.create_task(None, None).task_id;
        manager.complete_task(&done, json!({"content": []}), false);

        let result = h.call("tasks/result", json!({"taskId": done})).await.unwrap();
        assert_eq!(result, json!({"content": []}));

        let gone = manager.create_task(None, None).task_id;
        manager.cancel_task(&gone);
        let err = h.call("tasks/result", json!({"taskId": gone})).await.unwrap_err();
        assert_eq!(err.code, McpErrorCode::RequestCancelled);
        assert_eq!(err.data, Some(json!({"taskId": gone})));
    }

    #[tokio::test]
    async fn failed_error_payload_is_replayed_as_an_error() {
        let mut h = Harness::new();
        let manager = Arc::clone(h.filter.manager());
        let id = manager.create_task(None, None).task_id;
        manager.complete_task(&id, json!({"code": -32602, "message": "bad"}), true);

        let err = h.call("tasks/result", json!({"taskId": id})).await.unwrap_err();
        assert_eq!(err.code, McpErrorCode::InvalidParams);
        assert_eq!(err.message, "bad");
    }

    #[tokio::test]
    async fn list_pages_with_the_default_size() {
        let mut h = Harness::new();
        for _ in 0..3 {
            h.filter.manager().create_task(None, None);
        }
        let page: ListTasksResult =
            serde_json::from_value(h.call("tasks/list", Value::Null).await.unwrap()).unwrap();
        assert_eq!(page.tasks.len(), 3);
        assert!(page.next_cursor.is_none());
    }

    #[tokio::test]
    async fn other_methods_pass_through() {
        let mut h = Harness::new();
        let mut ctx = MessageContext::new(
            h.session.clone(),
            JsonRpcRequest::new("tools/list", None, 5i64).into(),
            CancellationToken::new(),
        );
        h.filter.handle(&mut ctx, &h.next).await.unwrap();
        assert_eq!(h.calls.load(Ordering::SeqCst), 1);
        assert!(h.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn task_methods_require_initialization() {
        let (session, _rx) = test_session();
        let filter = TaskMethodsFilter::new(Arc::new(TaskManager::new()));
        let calls = Arc::new(AtomicUsize::new(0));
        let mut ctx = MessageContext::new(
            session,
            JsonRpcRequest::new("tasks/list", None, 1i64).into(),
            CancellationToken::new(),
        );
        let err = filter
            .handle(&mut ctx, &Fallthrough(calls))
            .await
            .unwrap_err();
        assert_eq!(err.code, McpErrorCode::InvalidRequest);
    }
}
