//! Default dispatch: the innermost handler of the connection-wide chain.
//!
//! Requests are gated on initialization, looked up in the frozen routes and
//! run under the request's cancellation token and the configured timeout.
//! Notifications without a route are ignored. Responses and errors from the
//! client resolve the session's correlation table.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use relaymcp_core::logging::{debug, targets, warn};
use relaymcp_core::{McpError, McpResult};
use relaymcp_protocol::{JsonRpcMessage, methods};

use crate::MessageContext;
use crate::filter::MessageHandler;
use crate::router::Routes;

/// Error for requests that arrive before `initialize`.
pub(crate) fn not_initialized() -> McpError {
    McpError::invalid_request("Server not initialized. Client must send 'initialize' first.")
}

/// Methods a client may call before the handshake.
fn allowed_before_init(method: &str) -> bool {
    matches!(method, methods::INITIALIZE | methods::PING)
}

pub(crate) struct DefaultDispatch {
    routes: Routes,
    request_timeout: Option<Duration>,
}

impl DefaultDispatch {
    pub(crate) fn new(routes: Routes, request_timeout: Option<Duration>) -> Self {
        Self {
            routes,
            request_timeout,
        }
    }

    async fn dispatch_request(&self, ctx: &mut MessageContext, method: String) -> McpResult<()> {
        if !ctx.session().is_initialized() && !allowed_before_init(&method) {
            return Err(not_initialized());
        }
        let route = self
            .routes
            .request(&method)
            .map(Arc::clone)
            .ok_or_else(|| McpError::method_not_found(&method))?;

        let cancel = ctx.cancellation().clone();
        let timeout = self.request_timeout;
        let run = route.handle(ctx);
        let bounded = async move {
            match timeout {
                Some(limit) => tokio::time::timeout(limit, run)
                    .await
                    .map_err(|_| McpError::request_timeout(limit.as_secs()))?,
                None => run.await,
            }
        };

        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!(target: targets::SERVER, "{} cancelled before completion", method);
                Err(McpError::request_cancelled())
            }
            result = bounded => result,
        }
    }
}

impl MessageHandler for DefaultDispatch {
    fn handle<'a>(&'a self, ctx: &'a mut MessageContext) -> BoxFuture<'a, McpResult<()>> {
        Box::pin(async move {
            match ctx.message() {
                JsonRpcMessage::Request(req) => {
                    let method = req.method.clone();
                    self.dispatch_request(ctx, method).await
                }
                JsonRpcMessage::Notification(notification) => {
                    let method = notification.method.clone();
                    match self.routes.notification(&method).map(Arc::clone) {
                        Some(route) => route.handle(ctx).await,
                        None => {
                            debug!(target: targets::SERVER, "Ignoring notification: {}", method);
                            Ok(())
                        }
                    }
                }
                JsonRpcMessage::Response(resp) => {
                    let (id, result) = (resp.id.clone(), resp.result.clone());
                    ctx.session().correlation().resolve(&id, Ok(result));
                    Ok(())
                }
                JsonRpcMessage::Error(err) => {
                    match err.id.clone() {
                        Some(id) => {
                            let error = McpError::from(err.error.clone());
                            ctx.session().correlation().resolve(&id, Err(error));
                        }
                        None => warn!(
                            target: targets::SERVER,
                            "Client reported an uncorrelated error: [{}] {}",
                            err.error.code,
                            err.error.message
                        ),
                    }
                    Ok(())
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::Router;
    use crate::session::test_session;
    use crate::{RequestContext, Session};
    use relaymcp_core::McpErrorCode;
    use relaymcp_protocol::{
        Capabilities, ClientInfo, JsonRpcErrorResponse, JsonRpcNotification, JsonRpcRequest,
        JsonRpcResponse, RequestId,
    };
    use serde_json::{Value, json};
    use tokio_util::sync::CancellationToken;

    fn dispatch(timeout: Option<Duration>) -> DefaultDispatch {
        let mut router = Router::new();
        router.add_request_handler("ping", |_ctx: RequestContext<Value>| async { Ok(json!({})) });
        router.add_request_handler("slow", |ctx: RequestContext<Value>| async move {
            tokio::time::sleep(Duration::from_secs(60)).await;
            ctx.checkpoint()?;
            Ok(json!({}))
        });
        DefaultDispatch::new(router.freeze(), timeout)
    }

    fn initialized() -> (Session, tokio::sync::mpsc::UnboundedReceiver<JsonRpcMessage>) {
        let (session, rx) = test_session();
        session.initialize(
            ClientInfo::new("c", "1"),
            Capabilities::new(),
            "2025-11-25".to_owned(),
        );
        (session, rx)
    }

    fn request(session: &Session, method: &str, token: CancellationToken) -> MessageContext {
        MessageContext::new(
            session.clone(),
            JsonRpcRequest::new(method, None, 1i64).into(),
            token,
        )
    }

    #[tokio::test]
    async fn requests_before_initialize_are_rejected_except_ping() {
        let d = dispatch(None);
        let (session, _rx) = test_session();

        let mut ctx = request(&session, "slow", CancellationToken::new());
        let err = d.handle(&mut ctx).await.unwrap_err();
        assert_eq!(err.code, McpErrorCode::InvalidRequest);
        assert!(err.message.contains("not initialized"));

        let mut ping = request(&session, "ping", CancellationToken::new());
        d.handle(&mut ping).await.unwrap();
    }

    #[tokio::test]
    async fn unknown_method_is_method_not_found() {
        let d = dispatch(None);
        let (session, _rx) = initialized();
        let mut ctx = request(&session, "tools/call", CancellationToken::new());
        let err = d.handle(&mut ctx).await.unwrap_err();
        assert_eq!(err.code, McpErrorCode::MethodNotFound);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_requests_time_out() {
        let d = dispatch(Some(Duration::from_secs(5)));
        let (session, _rx) = initialized();
        let mut ctx = request(&session, "slow", CancellationToken::new());
        let err = d.handle(&mut ctx).await.unwrap_err();
        assert_eq!(err.code, McpErrorCode::RequestTimeout);
    }

    #[tokio::test]
    async fn cancelled_requests_answer_cancelled() {
        let d = dispatch(None);
        let (session, _rx) = initialized();
        let token = CancellationToken::new();
        let mut ctx = request(&session, "slow", token.clone());

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            token.cancel();
        });
        let err = d.handle(&mut ctx).await.unwrap_err();
        canceller.await.unwrap();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn unknown_notifications_are_ignored() {
        let d = dispatch(None);
        let (session, _rx) = initialized();
        let mut ctx = MessageContext::new(
            session,
            JsonRpcNotification::new("notifications/whatever", None).into(),
            CancellationToken::new(),
        );
        d.handle(&mut ctx).await.unwrap();
    }

    #[tokio::test]
    async fn responses_and_errors_resolve_pending_requests() {
        let d = dispatch(None);
        let (session, _rx) = initialized();
        let ok = session.correlation().register(RequestId::Number(7)).unwrap();
        let failed = session.correlation().register(RequestId::Number(8)).unwrap();

        let mut resp = MessageContext::new(
            session.clone(),
            JsonRpcResponse::success(RequestId::Number(7), json!({"roots": []})).into(),
            CancellationToken::new(),
        );
        d.handle(&mut resp).await.unwrap();

        let mut err = MessageContext::new(
            session.clone(),
            JsonRpcErrorResponse::new(
                Some(RequestId::Number(8)),
                McpError::invalid_params("nope"),
            )
            .into(),
            CancellationToken::new(),
        );
        d.handle(&mut err).await.unwrap();

        assert_eq!(ok.wait().await.unwrap(), json!({"roots": []}));
        assert_eq!(failed.wait().await.unwrap_err().code, McpErrorCode::InvalidParams);
        assert!(session.correlation().is_empty());
    }
}
