//! Server builder for configuring MCP servers.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use relaymcp_core::logging::{debug, targets};
use relaymcp_core::{McpResult, Services, ServicesBuilder};
use relaymcp_protocol::{Capabilities, ServerInfo};
use relaymcp_transport::DEFAULT_MAX_MESSAGE_SIZE;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::config::{DEFAULT_REQUEST_TIMEOUT_SECS, LoggingConfig, ServerConfig};
use crate::dispatch::DefaultDispatch;
use crate::filter::{Filter, MessageHandler, compose};
use crate::router::{Router, erase_request_handler};
use crate::task_methods::{TaskMethodsFilter, task_augmented};
use crate::tasks::{TaskDefaults, TaskManager};
use crate::{NotificationContext, RequestContext, Server, builtins};

/// Builder for configuring an MCP server.
///
/// Everything is fixed by [`ServerBuilder::build`]: the method table, the
/// filter chain and the capabilities cannot change while the server runs.
pub struct ServerBuilder {
    info: ServerInfo,
    capabilities: Capabilities,
    router: Router,
    filters: Vec<Arc<dyn Filter>>,
    services: ServicesBuilder,
    task_manager: Option<Arc<TaskManager>>,
    task_defaults: Option<TaskDefaults>,
    instructions: Option<String>,
    /// Request timeout in seconds (0 = no timeout).
    request_timeout_secs: u64,
    max_message_size: usize,
    logging: LoggingConfig,
}

impl ServerBuilder {
    /// Creates a new server builder.
    #[must_use]
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            info: ServerInfo::new(name, version),
            capabilities: Capabilities::new(),
            router: Router::new(),
            filters: Vec::new(),
            services: Services::builder(),
            task_manager: None,
            task_defaults: None,
            instructions: None,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            logging: LoggingConfig::from_env(),
        }
    }

    /// Creates a builder from a loaded configuration.
    ///
    /// The `[tasks]` section only takes effect once [`ServerBuilder::tasks`]
    /// or [`ServerBuilder::with_tasks`] installs a manager.
    #[must_use]
    pub fn from_config(config: &ServerConfig) -> Self {
        let mut builder = Self::new(config.name.clone(), config.version.clone())
            .request_timeout(config.request_timeout_secs)
            .max_message_size(config.max_message_size)
            .logging(config.logging_config());
        builder.instructions.clone_from(&config.instructions);
        builder.task_defaults = Some(config.tasks.to_defaults());
        builder
    }

    /// Sets the request timeout in seconds.
    ///
    /// Set to 0 to disable timeout enforcement.
    /// Default is 30 seconds.
    #[must_use]
    pub fn request_timeout(mut self, secs: u64) -> Self {
        self.request_timeout_secs = secs;
        self
    }

    /// Sets the largest inbound frame accepted by [`Server::serve_stdio`].
    #[must_use]
    pub fn max_message_size(mut self, bytes: usize) -> Self {
        self.max_message_size = bytes;
        self
    }

    /// Sets custom server instructions.
    #[must_use]
    pub fn instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    /// Sets the logging configuration. Its level caps `logging/setLevel`.
    #[must_use]
    pub fn logging(mut self, logging: LoggingConfig) -> Self {
        self.logging = logging;
        self
    }

    /// Advertises a capability. The value is passed to clients unchanged.
    #[must_use]
    pub fn capability(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.capabilities = self.capabilities.with(name, value);
        self
    }

    /// Appends a connection-wide filter.
    ///
    /// Filters see every inbound message. The first one added is the
    /// outermost.
    #[must_use]
    pub fn filter<F: Filter + 'static>(self, filter: F) -> Self {
        self.filter_arc(Arc::new(filter))
    }

    /// Appends an already shared connection-wide filter.
    #[must_use]
    pub fn filter_arc(mut self, filter: Arc<dyn Filter>) -> Self {
        self.filters.push(filter);
        self
    }

    /// Adds a filter that runs only for `method`, inside the connection-wide
    /// filters.
    #[must_use]
    pub fn method_filter<F: Filter + 'static>(mut self, method: impl Into<String>, filter: F) -> Self {
        self.router.add_method_filter(method, Arc::new(filter));
        self
    }

    /// Registers a shared service, retrievable by type from every context.
    #[must_use]
    pub fn service<T: Send + Sync + 'static>(mut self, service: T) -> Self {
        self.services.insert(service);
        self
    }

    /// Registers a request handler.
    ///
    /// Params are deserialized into `P`; a mismatch answers -32602. The
    /// built-in methods cannot be replaced.
    #[must_use]
    pub fn request_handler<P, R, F, Fut>(mut self, method: impl Into<String>, handler: F) -> Self
    where
        P: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(RequestContext<P>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = McpResult<R>> + Send + 'static,
    {
        self.router.add_request_handler(method, handler);
        self
    }

    /// Registers a request handler that may run as a managed task.
    ///
    /// When the request carries `task` metadata and a task manager is
    /// installed, the request is answered at once with the new task and the
    /// handler's result completes the task later.
    #[must_use]
    pub fn task_request_handler<P, R, F, Fut>(
        mut self,
        method: impl Into<String>,
        handler: F,
    ) -> Self
    where
        P: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(RequestContext<P>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = McpResult<R>> + Send + 'static,
    {
        self.router
            .add_boxed_request_handler(method, task_augmented(erase_request_handler(handler)));
        self
    }

    /// Registers a notification handler.
    #[must_use]
    pub fn notification_handler<P, F, Fut>(mut self, method: impl Into<String>, handler: F) -> Self
    where
        P: DeserializeOwned + Send + 'static,
        F: Fn(NotificationContext<P>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = McpResult<()>> + Send + 'static,
    {
        self.router.add_notification_handler(method, handler);
        self
    }

    /// Installs a task manager built from the configured task defaults.
    #[must_use]
    pub fn with_tasks(self) -> Self {
        let defaults = self.task_defaults.clone().unwrap_or_default();
        self.tasks(Arc::new(TaskManager::with_defaults(defaults)))
    }

    /// Installs a task manager.
    ///
    /// Adds the `tasks/*` methods as the innermost connection-wide filter,
    /// registers the manager as a service and advertises the `tasks`
    /// capability.
    #[must_use]
    pub fn tasks(mut self, manager: Arc<TaskManager>) -> Self {
        self.task_manager = Some(manager);
        self
    }

    /// Builds the server.
    #[must_use]
    pub fn build(mut self) -> Server {
        builtins::register(&mut self.router, self.logging.level.to_level_filter());

        // Task methods sit innermost so user filters observe them too.
        let mut filters = self.filters;
        if let Some(manager) = &self.task_manager {
            self.services.insert_arc(Arc::clone(manager));
            self.capabilities
                .insert_if_absent("tasks", json!({"list": {}, "cancel": {}}));
            filters.push(Arc::new(TaskMethodsFilter::new(Arc::clone(manager))));
        }

        debug!(
            target: targets::SERVER,
            "Building server {} with {} filters and methods {:?}",
            self.info.name,
            filters.len(),
            self.router.request_methods()
        );

        let request_timeout = (self.request_timeout_secs > 0)
            .then(|| Duration::from_secs(self.request_timeout_secs));
        let dispatch: Arc<dyn MessageHandler> =
            Arc::new(DefaultDispatch::new(self.router.freeze(), request_timeout));

        Server::from_parts(crate::ServerParts {
            info: self.info,
            capabilities: self.capabilities,
            instructions: self.instructions,
            pipeline: compose(&filters, dispatch),
            services: self.services.build(),
            max_message_size: self.max_message_size,
            logging: self.logging,
        })
    }
}

impl std::fmt::Debug for ServerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerBuilder")
            .field("info", &self.info)
            .field("router", &self.router)
            .field("filters", &self.filters.len())
            .field("tasks", &self.task_manager.is_some())
            .finish()
    }
}
