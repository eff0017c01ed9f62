//! Method router for MCP servers.
//!
//! Handlers are registered by method name with typed params and results.
//! Registration erases the types: params are deserialized from the raw JSON
//! (a mismatch is an invalid-params error) and the result is serialized back
//! before it is sent. Method-specific filters are kept per method and
//! composed around that method's handler when the router is frozen, so they
//! always run inside the connection-wide chain.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use relaymcp_core::logging::{debug, targets, trace};
use relaymcp_core::{McpError, McpResult};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::filter::{Filter, MessageHandler, compose};
use crate::{MessageContext, NotificationContext, RequestContext};

/// A request handler with its param and result types erased.
pub type BoxedRequestHandler =
    Arc<dyn Fn(RequestContext<Value>) -> BoxFuture<'static, McpResult<Value>> + Send + Sync>;

/// A notification handler with its param type erased.
pub type BoxedNotificationHandler =
    Arc<dyn Fn(NotificationContext<Value>) -> BoxFuture<'static, McpResult<()>> + Send + Sync>;

/// Mutable method table used while the server is being configured.
#[derive(Default)]
pub struct Router {
    requests: HashMap<String, BoxedRequestHandler>,
    notifications: HashMap<String, BoxedNotificationHandler>,
    method_filters: HashMap<String, Vec<Arc<dyn Filter>>>,
}

impl Router {
    /// Creates a new empty router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a typed request handler, replacing any previous one.
    pub fn add_request_handler<P, R, F, Fut>(&mut self, method: impl Into<String>, handler: F)
    where
        P: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(RequestContext<P>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = McpResult<R>> + Send + 'static,
    {
        self.add_boxed_request_handler(method, erase_request_handler(handler));
    }

    /// Registers an already erased request handler.
    pub fn add_boxed_request_handler(
        &mut self,
        method: impl Into<String>,
        handler: BoxedRequestHandler,
    ) {
        let method = method.into();
        debug!(target: targets::ROUTER, "Registered request handler: {}", method);
        self.requests.insert(method, handler);
    }

    /// Registers a typed notification handler, replacing any previous one.
    pub fn add_notification_handler<P, F, Fut>(&mut self, method: impl Into<String>, handler: F)
    where
        P: DeserializeOwned + Send + 'static,
        F: Fn(NotificationContext<P>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = McpResult<()>> + Send + 'static,
    {
        let method = method.into();
        let handler = Arc::new(handler);
        let erased: BoxedNotificationHandler = Arc::new(
            move |ctx: NotificationContext<Value>| -> BoxFuture<'static, McpResult<()>> {
                let handler = Arc::clone(&handler);
                Box::pin(async move {
                    let ctx = ctx.try_map_params(parse_params::<P>)?;
                    handler(ctx).await
                })
            },
        );
        debug!(target: targets::ROUTER, "Registered notification handler: {}", method);
        self.notifications.insert(method, erased);
    }

    /// Adds a filter that runs only for `method`.
    ///
    /// Method filters for one method nest in registration order, inside the
    /// connection-wide filters.
    pub fn add_method_filter(&mut self, method: impl Into<String>, filter: Arc<dyn Filter>) {
        self.method_filters
            .entry(method.into())
            .or_default()
            .push(filter);
    }

    /// Returns true if a request handler is registered for `method`.
    #[must_use]
    pub fn has_request_handler(&self, method: &str) -> bool {
        self.requests.contains_key(method)
    }

    /// Returns the registered request methods, sorted.
    #[must_use]
    pub fn request_methods(&self) -> Vec<String> {
        let mut methods: Vec<String> = self.requests.keys().cloned().collect();
        methods.sort();
        methods
    }

    /// Composes every route with its method filters and freezes the table.
    #[must_use]
    pub fn freeze(mut self) -> Routes {
        let mut requests = HashMap::with_capacity(self.requests.len());
        for (method, handler) in self.requests {
            let filters = self.method_filters.remove(&method).unwrap_or_default();
            let endpoint: Arc<dyn MessageHandler> = Arc::new(RequestEndpoint { handler });
            requests.insert(method, compose(&filters, endpoint));
        }

        let mut notifications = HashMap::with_capacity(self.notifications.len());
        for (method, handler) in self.notifications {
            let filters = self.method_filters.remove(&method).unwrap_or_default();
            let endpoint: Arc<dyn MessageHandler> = Arc::new(NotificationEndpoint { handler });
            notifications.insert(method, compose(&filters, endpoint));
        }

        for method in self.method_filters.keys() {
            debug!(
                target: targets::ROUTER,
                "Method filter registered for '{}' which has no handler", method
            );
        }

        Routes {
            requests,
            notifications,
        }
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("requests", &self.request_methods())
            .field("notifications", &self.notifications.len())
            .finish()
    }
}

/// Frozen method table.
pub struct Routes {
    requests: HashMap<String, Arc<dyn MessageHandler>>,
    notifications: HashMap<String, Arc<dyn MessageHandler>>,
}

impl Routes {
    /// Returns the composed handler for a request method.
    #[must_use]
    pub fn request(&self, method: &str) -> Option<&Arc<dyn MessageHandler>> {
        self.requests.get(method)
    }

    /// Returns the composed handler for a notification method.
    #[must_use]
    pub fn notification(&self, method: &str) -> Option<&Arc<dyn MessageHandler>> {
        self.notifications.get(method)
    }
}

impl std::fmt::Debug for Routes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Routes")
            .field("requests", &self.requests.len())
            .field("notifications", &self.notifications.len())
            .finish()
    }
}

/// Innermost handler of a request route: runs the handler and sends its
/// result.
struct RequestEndpoint {
    handler: BoxedRequestHandler,
}

impl MessageHandler for RequestEndpoint {
    fn handle<'a>(&'a self, ctx: &'a mut MessageContext) -> BoxFuture<'a, McpResult<()>> {
        Box::pin(async move {
            let request = ctx.request_context()?;
            trace!(target: targets::ROUTER, "invoking handler for {}", request.method());
            let result = (self.handler)(request).await?;
            ctx.respond(result)
        })
    }
}

/// Innermost handler of a notification route.
struct NotificationEndpoint {
    handler: BoxedNotificationHandler,
}

impl MessageHandler for NotificationEndpoint {
    fn handle<'a>(&'a self, ctx: &'a mut MessageContext) -> BoxFuture<'a, McpResult<()>> {
        Box::pin(async move {
            let method = ctx.method().unwrap_or_default().to_owned();
            let params = ctx.message().params().cloned().unwrap_or(Value::Null);
            let notification =
                NotificationContext::new(params, method, ctx.session().clone(), ctx.items().clone());
            (self.handler)(notification).await
        })
    }
}

/// Erases the param and result types of a request handler.
pub(crate) fn erase_request_handler<P, R, F, Fut>(handler: F) -> BoxedRequestHandler
where
    P: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
    F: Fn(RequestContext<P>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = McpResult<R>> + Send + 'static,
{
    let handler = Arc::new(handler);
    Arc::new(
        move |ctx: RequestContext<Value>| -> BoxFuture<'static, McpResult<Value>> {
            let handler = Arc::clone(&handler);
            Box::pin(async move {
                let ctx = ctx.try_map_params(parse_params::<P>)?;
                let result = handler(ctx).await?;
                Ok(serde_json::to_value(result)?)
            })
        },
    )
}

/// Deserializes handler params. Absent params read as an empty object.
pub(crate) fn parse_params<T: DeserializeOwned>(params: Value) -> McpResult<T> {
    let value = if params.is_null() {
        Value::Object(Map::new())
    } else {
        params
    };
    serde_json::from_value(value).map_err(|e| McpError::invalid_params(e.to_string()))
}
