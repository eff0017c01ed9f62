//! Filter pipeline.
//!
//! Every inbound message (request, notification, response or error) passes
//! through the connection-wide filters before default handling runs. A filter
//! receives the [`MessageContext`] and the next handler in the chain; it can
//! act before and after delegating, rewrite the message, or skip `next`
//! entirely. Skipping `next` short-circuits: nothing downstream runs and no
//! response is sent unless the filter sends one.
//!
//! The chain is composed once, when the server is built, by wrapping the
//! default handler with each filter in reverse registration order, so the
//! first registered filter is the outermost.
//!
//! # Example
//!
//! ```ignore
//! struct Timing;
//!
//! impl Filter for Timing {
//!     fn handle<'a>(
//!         &'a self,
//!         ctx: &'a mut MessageContext,
//!         next: &'a dyn MessageHandler,
//!     ) -> BoxFuture<'a, McpResult<()>> {
//!         Box::pin(async move {
//!             let started = std::time::Instant::now();
//!             let result = next.handle(ctx).await;
//!             log::debug!("{:?} took {:?}", ctx.method(), started.elapsed());
//!             result
//!         })
//!     }
//! }
//! ```

use std::sync::Arc;

use futures::future::BoxFuture;
use relaymcp_core::McpResult;

use crate::MessageContext;

/// Anything that can process a message: the default dispatch or a partially
/// composed chain.
pub trait MessageHandler: Send + Sync {
    /// Processes one message.
    fn handle<'a>(&'a self, ctx: &'a mut MessageContext) -> BoxFuture<'a, McpResult<()>>;
}

/// An interceptor around message handling.
pub trait Filter: Send + Sync {
    /// Processes one message, optionally delegating to `next`.
    ///
    /// Errors returned here propagate outward through every enclosing
    /// filter. The connection loop turns an error that reaches it into one
    /// error response for requests, and logs it for other message kinds.
    fn handle<'a>(
        &'a self,
        ctx: &'a mut MessageContext,
        next: &'a dyn MessageHandler,
    ) -> BoxFuture<'a, McpResult<()>>;
}

/// One link of a composed chain: a filter and the handler it wraps.
pub struct FilteredHandler {
    filter: Arc<dyn Filter>,
    next: Arc<dyn MessageHandler>,
}

impl FilteredHandler {
    /// Wraps `next` with `filter`.
    #[must_use]
    pub fn new(filter: Arc<dyn Filter>, next: Arc<dyn MessageHandler>) -> Self {
        Self { filter, next }
    }
}

impl MessageHandler for FilteredHandler {
    fn handle<'a>(&'a self, ctx: &'a mut MessageContext) -> BoxFuture<'a, McpResult<()>> {
        self.filter.handle(ctx, self.next.as_ref())
    }
}

/// Composes `filters` around `terminal`, first filter outermost.
#[must_use]
pub fn compose(
    filters: &[Arc<dyn Filter>],
    terminal: Arc<dyn MessageHandler>,
) -> Arc<dyn MessageHandler> {
    filters.iter().rev().fold(terminal, |next, filter| {
        Arc::new(FilteredHandler::new(Arc::clone(filter), next))
    })
}
