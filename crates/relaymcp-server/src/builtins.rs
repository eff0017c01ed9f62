//! Methods every server answers: `initialize`, `ping`, `logging/setLevel`,
//! and the `notifications/initialized` and `notifications/cancelled`
//! notifications.

use relaymcp_core::McpResult;
use relaymcp_core::logging::{LevelFilter, debug, info, targets, warn};
use relaymcp_protocol::{
    CancelledParams, InitializeParams, InitializeResult, LogLevel, PROTOCOL_VERSION,
    SetLogLevelParams, methods,
};
use serde_json::{Value, json};

use crate::router::Router;
use crate::{NotificationContext, RequestContext};

/// Protocol revisions the server accepts from a client, newest first.
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] =
    &[PROTOCOL_VERSION, "2025-06-18", "2025-03-26", "2024-11-05"];

/// Registers the built-in handlers. `log_ceiling` bounds what a client may
/// request through `logging/setLevel`.
pub(crate) fn register(router: &mut Router, log_ceiling: LevelFilter) {
    router.add_request_handler(methods::INITIALIZE, |ctx: RequestContext<InitializeParams>| {
        let result = handle_initialize(&ctx);
        async move { result }
    });

    router.add_request_handler(methods::PING, |_ctx: RequestContext<Value>| async {
        Ok(json!({}))
    });

    router.add_request_handler(
        methods::LOGGING_SET_LEVEL,
        move |ctx: RequestContext<SetLogLevelParams>| {
            set_log_level(ctx.params().level, log_ceiling);
            async { Ok(json!({})) }
        },
    );

    router.add_notification_handler(
        methods::NOTIFICATION_INITIALIZED,
        |ctx: NotificationContext<Value>| {
            info!(target: targets::SESSION, "Session {} initialized", ctx.session().id());
            async { Ok(()) }
        },
    );

    router.add_notification_handler(
        methods::NOTIFICATION_CANCELLED,
        |ctx: NotificationContext<CancelledParams>| {
            let params = ctx.params();
            let found = ctx.session().cancel_request(&params.request_id);
            if found {
                info!(
                    target: targets::SESSION,
                    "Cancelled request {} ({})",
                    params.request_id,
                    params.reason.as_deref().unwrap_or("no reason given")
                );
            } else {
                debug!(
                    target: targets::SESSION,
                    "Cancellation for unknown or finished request {}", params.request_id
                );
            }
            async { Ok(()) }
        },
    );
}

fn handle_initialize(ctx: &RequestContext<InitializeParams>) -> McpResult<InitializeResult> {
    let params = ctx.params();
    let session = ctx.session();
    debug!(
        target: targets::SESSION,
        "Initializing session with client: {:?}",
        params.client_info.name
    );

    let version = negotiate_version(&params.protocol_version);
    if version != params.protocol_version {
        warn!(
            target: targets::SESSION,
            "Client requested protocol {}; answering with {}",
            params.protocol_version,
            version
        );
    }
    session.initialize(
        params.client_info.clone(),
        params.capabilities.clone(),
        version.to_owned(),
    );

    Ok(InitializeResult {
        protocol_version: version.to_owned(),
        capabilities: session.server_capabilities().clone(),
        server_info: session.server_info().clone(),
        instructions: session.instructions().map(str::to_owned),
    })
}

/// Echoes a supported client version, otherwise offers the latest.
fn negotiate_version(requested: &str) -> &'static str {
    SUPPORTED_PROTOCOL_VERSIONS
        .iter()
        .copied()
        .find(|v| *v == requested)
        .unwrap_or(PROTOCOL_VERSION)
}

fn level_filter(level: LogLevel) -> LevelFilter {
    match level {
        LogLevel::Debug => LevelFilter::Debug,
        LogLevel::Info | LogLevel::Notice => LevelFilter::Info,
        LogLevel::Warning => LevelFilter::Warn,
        LogLevel::Error | LogLevel::Critical | LogLevel::Alert | LogLevel::Emergency => {
            LevelFilter::Error
        }
    }
}

/// Applies a client-requested level, never above `ceiling`.
fn set_log_level(level: LogLevel, ceiling: LevelFilter) -> LevelFilter {
    let requested = level_filter(level);
    let effective = requested.min(ceiling);
    log::set_max_level(effective);

    if effective != requested {
        warn!(
            target: targets::SESSION,
            "Client requested log level {:?}; clamped to server level {:?}",
            level,
            effective
        );
    } else {
        info!(target: targets::SESSION, "Log level set to {:?}", level);
    }
    effective
}
