//! Structured logging for relaymcp.
//!
//! All crates log through the standard [`log`] facade. The library never
//! installs a logger; applications pick a backend (the server crate ships an
//! `env_logger` based initializer in its `LoggingConfig`).
//!
//! # Log Levels
//!
//! - **error**: Transport failures, panics caught at the dispatch boundary
//! - **warn**: Protocol anomalies (unknown response ids, duplicate ids)
//! - **info**: Connection lifecycle, log level changes
//! - **debug**: Request flow, filter and handler invocations
//! - **trace**: Wire-level message details
//!
//! # Log Targets
//!
//! - `relaymcp`: Root target
//! - `relaymcp::server`: Connection loop and request handling
//! - `relaymcp::transport`: Transport layer
//! - `relaymcp::router`: Method dispatch
//! - `relaymcp::filter`: Filter pipeline
//! - `relaymcp::tasks`: Task lifecycle
//! - `relaymcp::session`: Session state and outbound traffic
//! - `relaymcp::codec`: Framing
//!
//! Example filter: `RUST_LOG=relaymcp::server=debug,relaymcp::tasks=trace`

pub use log::{debug, error, info, trace, warn};

pub use log::{Level, LevelFilter};

/// Log targets used by relaymcp components.
pub mod targets {
    /// Root target for all relaymcp logs.
    pub const RELAYMCP: &str = "relaymcp";

    /// Connection loop and request handling.
    pub const SERVER: &str = "relaymcp::server";

    /// Transport layer.
    pub const TRANSPORT: &str = "relaymcp::transport";

    /// Request routing and method dispatch.
    pub const ROUTER: &str = "relaymcp::router";

    /// Connection-wide and method filters.
    pub const FILTER: &str = "relaymcp::filter";

    /// Task lifecycle manager.
    pub const TASKS: &str = "relaymcp::tasks";

    /// Sessions and outbound traffic.
    pub const SESSION: &str = "relaymcp::session";

    /// Codec operations (JSON encoding/decoding).
    pub const CODEC: &str = "relaymcp::codec";
}

/// Returns whether logging is enabled at the given level for the given target.
#[inline]
#[must_use]
pub fn is_enabled(level: Level, target: &str) -> bool {
    log::log_enabled!(target: target, level)
}
