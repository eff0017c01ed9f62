//! Example: Echo Server
//!
//! A small MCP server with a timing filter, a plain request handler and a
//! handler that can run as a background task.
//!
//! Run with:
//! ```bash
//! cargo run --example echo_server
//! ```
//!
//! Then type NDJSON on stdin, for example:
//! ```text
//! {"jsonrpc":"2.0","id":1,"method":"initialize","params":{"protocolVersion":"2025-11-25","capabilities":{},"clientInfo":{"name":"shell","version":"0"}}}
//! {"jsonrpc":"2.0","id":2,"method":"echo","params":{"message":"hi"}}
//! {"jsonrpc":"2.0","id":3,"method":"slow_echo","params":{"message":"later","task":{"ttl":60000}}}
//! ```

use std::time::{Duration, Instant};

use relaymcp::prelude::*;
use serde::Deserialize;
use serde_json::{Value, json};

// ============================================================================
// Filters
// ============================================================================

/// Logs how long each message took.
struct Timing;

impl Filter for Timing {
    fn handle<'a>(
        &'a self,
        ctx: &'a mut MessageContext,
        next: &'a dyn MessageHandler,
    ) -> BoxFuture<'a, McpResult<()>> {
        Box::pin(async move {
            let started = Instant::now();
            let result = next.handle(ctx).await;
            log::info!(
                "{} {} took {:?}",
                ctx.message().kind(),
                ctx.method().unwrap_or("-"),
                started.elapsed()
            );
            result
        })
    }
}

// ============================================================================
// Handlers
// ============================================================================

#[derive(Deserialize)]
struct EchoParams {
    message: String,
}

async fn echo(ctx: RequestContext<EchoParams>) -> McpResult<Value> {
    Ok(json!({ "message": ctx.into_params().message }))
}

async fn slow_echo(ctx: RequestContext<EchoParams>) -> McpResult<Value> {
    for step in 1..=5u32 {
        ctx.checkpoint()?;
        ctx.report_progress(f64::from(step), Some(5.0), None)?;
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
    echo(ctx).await
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = ServerConfig::load()?;
    config.logging_config().init();

    ServerBuilder::from_config(&config)
        .instructions("Call echo, or slow_echo with task metadata.")
        .filter(Timing)
        .with_tasks()
        .request_handler("echo", echo)
        .task_request_handler("slow_echo", slow_echo)
        .build()
        .serve_stdio()
        .await?;
    Ok(())
}
