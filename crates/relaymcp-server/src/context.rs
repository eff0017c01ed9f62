//! Per-message and per-request contexts.

use std::any::Any;
use std::sync::Arc;

use relaymcp_core::{Items, McpError, McpResult, Services};
use relaymcp_protocol::{
    JsonRpcMessage, ProgressParams, ProgressToken, RequestEnvelope, RequestId, methods,
};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::Session;

/// Mutable scope of one inbound message while it travels the filter chain.
///
/// Created when the message is read and dropped once the pipeline unwinds.
/// Filters may inspect or rewrite the message, stash data in [`Items`], or
/// answer the request themselves with [`MessageContext::respond`].
#[derive(Debug)]
pub struct MessageContext {
    session: Session,
    message: JsonRpcMessage,
    items: Items,
    cancellation: CancellationToken,
}

impl MessageContext {
    /// Creates a context for one message.
    #[must_use]
    pub fn new(session: Session, message: JsonRpcMessage, cancellation: CancellationToken) -> Self {
        Self {
            session,
            message,
            items: Items::new(),
            cancellation,
        }
    }

    /// The owning session.
    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// The message being processed.
    #[must_use]
    pub fn message(&self) -> &JsonRpcMessage {
        &self.message
    }

    /// Mutable access to the message, for rewriting filters.
    pub fn message_mut(&mut self) -> &mut JsonRpcMessage {
        &mut self.message
    }

    /// Method name, for requests and notifications.
    #[must_use]
    pub fn method(&self) -> Option<&str> {
        self.message.method()
    }

    /// Id of the request, or `None` for other message kinds.
    #[must_use]
    pub fn request_id(&self) -> Option<&RequestId> {
        match &self.message {
            JsonRpcMessage::Request(req) => Some(&req.id),
            _ => None,
        }
    }

    /// Per-message side channel.
    #[must_use]
    pub fn items(&self) -> &Items {
        &self.items
    }

    /// Shared services.
    #[must_use]
    pub fn services(&self) -> &Services {
        self.session.services()
    }

    /// Looks up a service by type.
    #[must_use]
    pub fn service<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.session.service::<T>()
    }

    /// Cancellation token of this message.
    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Returns true once the message has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Sends a success response for the current request.
    ///
    /// # Errors
    ///
    /// Fails if the message is not a request or the connection is closed.
    pub fn respond(&self, result: Value) -> McpResult<()> {
        let id = self
            .request_id()
            .cloned()
            .ok_or_else(|| McpError::internal_error("Only requests can be answered"))?;
        self.session.send_response(id, result)
    }

    /// Builds the handler-facing context for the current request.
    pub(crate) fn request_context(&self) -> McpResult<RequestContext<Value>> {
        let JsonRpcMessage::Request(req) = &self.message else {
            return Err(McpError::invalid_request("Expected a request"));
        };
        let envelope = RequestEnvelope::from_params(req.params.as_ref());
        Ok(RequestContext {
            params: req.params.clone().unwrap_or(Value::Null),
            method: req.method.clone(),
            id: req.id.clone(),
            session: self.session.clone(),
            items: self.items.clone(),
            cancellation: self.cancellation.clone(),
            progress_token: envelope.meta.and_then(|meta| meta.progress_token),
        })
    }
}

/// Context handed to a request handler.
///
/// Owned by the single dispatch of one request. Handlers that start
/// background work move the whole context into it.
#[derive(Debug, Clone)]
pub struct RequestContext<P> {
    params: P,
    method: String,
    id: RequestId,
    session: Session,
    items: Items,
    cancellation: CancellationToken,
    progress_token: Option<ProgressToken>,
}

impl<P> RequestContext<P> {
    /// The typed params.
    #[must_use]
    pub fn params(&self) -> &P {
        &self.params
    }

    /// Takes the params out of the context.
    #[must_use]
    pub fn into_params(self) -> P {
        self.params
    }

    /// The matched method name.
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// The request id.
    #[must_use]
    pub fn request_id(&self) -> &RequestId {
        &self.id
    }

    /// The owning session.
    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Items set by filters for this message.
    #[must_use]
    pub fn items(&self) -> &Items {
        &self.items
    }

    /// Shared services.
    #[must_use]
    pub fn services(&self) -> &Services {
        self.session.services()
    }

    /// Looks up a service by type.
    #[must_use]
    pub fn service<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.session.service::<T>()
    }

    /// Cancellation token; fires on `notifications/cancelled`, on connection
    /// close, or when the task running this handler is cancelled.
    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Returns true once cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Returns a cancellation error if cancellation was requested.
    ///
    /// # Errors
    ///
    /// Returns [`McpError::request_cancelled`] once cancelled.
    pub fn checkpoint(&self) -> McpResult<()> {
        if self.is_cancelled() {
            Err(McpError::request_cancelled())
        } else {
            Ok(())
        }
    }

    /// Sends a progress notification if the client asked for progress.
    ///
    /// Without a progress token this does nothing.
    pub fn report_progress(
        &self,
        progress: f64,
        total: Option<f64>,
        message: Option<&str>,
    ) -> McpResult<()> {
        let Some(token) = &self.progress_token else {
            return Ok(());
        };
        let params = ProgressParams {
            progress_token: token.clone(),
            progress,
            total,
            message: message.map(str::to_owned),
        };
        self.session
            .send_notification(methods::NOTIFICATION_PROGRESS, Some(serde_json::to_value(params)?))
    }

    /// Replaces the params, keeping everything else.
    pub fn map_params<Q>(self, f: impl FnOnce(P) -> Q) -> RequestContext<Q> {
        RequestContext {
            params: f(self.params),
            method: self.method,
            id: self.id,
            session: self.session,
            items: self.items,
            cancellation: self.cancellation,
            progress_token: self.progress_token,
        }
    }

    /// Replaces the params with a fallible conversion.
    ///
    /// # Errors
    ///
    /// Returns the conversion's error.
    pub fn try_map_params<Q>(
        self,
        f: impl FnOnce(P) -> McpResult<Q>,
    ) -> McpResult<RequestContext<Q>> {
        Ok(RequestContext {
            params: f(self.params)?,
            method: self.method,
            id: self.id,
            session: self.session,
            items: self.items,
            cancellation: self.cancellation,
            progress_token: self.progress_token,
        })
    }

    /// Uses a different cancellation token, e.g. one owned by a task.
    #[must_use]
    pub(crate) fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }
}

/// Context handed to a notification handler.
#[derive(Debug, Clone)]
pub struct NotificationContext<P> {
    params: P,
    method: String,
    session: Session,
    items: Items,
}

impl<P> NotificationContext<P> {
    pub(crate) fn new(params: P, method: String, session: Session, items: Items) -> Self {
        Self {
            params,
            method,
            session,
            items,
        }
    }

    /// The typed params.
    #[must_use]
    pub fn params(&self) -> &P {
        &self.params
    }

    /// Takes the params out of the context.
    #[must_use]
    pub fn into_params(self) -> P {
        self.params
    }

    /// The notification method.
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// The owning session.
    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Items set by filters for this message.
    #[must_use]
    pub fn items(&self) -> &Items {
        &self.items
    }

    /// Looks up a service by type.
    #[must_use]
    pub fn service<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.session.service::<T>()
    }

    /// Replaces the params with a fallible conversion.
    pub(crate) fn try_map_params<Q>(
        self,
        f: impl FnOnce(P) -> McpResult<Q>,
    ) -> McpResult<NotificationContext<Q>> {
        Ok(NotificationContext {
            params: f(self.params)?,
            method: self.method,
            session: self.session,
            items: self.items,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::test_session;
    use relaymcp_protocol::{JsonRpcNotification, JsonRpcRequest};
    use serde_json::json;

    #[tokio::test]
    async fn respond_answers_the_current_request() {
        let (session, mut rx) = test_session();
        let ctx = MessageContext::new(
            session,
            JsonRpcRequest::new("ping", None, 11i64).into(),
            CancellationToken::new(),
        );

        ctx.respond(json!({})).unwrap();
        match rx.recv().await.unwrap() {
            JsonRpcMessage::Response(resp) => assert_eq!(resp.id, RequestId::Number(11)),
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[test]
    fn notifications_cannot_be_answered() {
        let (session, _rx) = test_session();
        let ctx = MessageContext::new(
            session,
            JsonRpcNotification::new("notifications/initialized", None).into(),
            CancellationToken::new(),
        );
        assert!(ctx.respond(json!({})).is_err());
        assert!(ctx.request_context().is_err());
    }

    #[test]
    fn request_context_shares_items_and_token() {
        let (session, _rx) = test_session();
        let token = CancellationToken::new();
        let ctx = MessageContext::new(
            session,
            JsonRpcRequest::new("tools/call", Some(json!({"name": "x"})), 2i64).into(),
            token.clone(),
        );
        ctx.items().insert("user", String::from("alice"));

        let req = ctx.request_context().unwrap();
        assert_eq!(req.method(), "tools/call");
        assert_eq!(req.params()["name"], "x");
        assert_eq!(req.items().get::<String>("user").as_deref().map(String::as_str), Some("alice"));

        token.cancel();
        assert!(req.checkpoint().unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn progress_is_sent_only_with_a_token() {
        let (session, mut rx) = test_session();
        let plain = MessageContext::new(
            session.clone(),
            JsonRpcRequest::new("work", None, 1i64).into(),
            CancellationToken::new(),
        )
        .request_context()
        .unwrap();
        plain.report_progress(0.5, None, None).unwrap();

        let tracked = MessageContext::new(
            session,
            JsonRpcRequest::new("work", Some(json!({"_meta": {"progressToken": 7}})), 2i64).into(),
            CancellationToken::new(),
        )
        .request_context()
        .unwrap();
        tracked.report_progress(1.0, Some(2.0), Some("halfway")).unwrap();

        let sent = rx.recv().await.unwrap();
        assert_eq!(sent.method(), Some(methods::NOTIFICATION_PROGRESS));
        let params = sent.params().unwrap();
        assert_eq!(params["progressToken"], 7);
        assert_eq!(params["message"], "halfway");
        assert!(rx.try_recv().is_err());
    }
}
