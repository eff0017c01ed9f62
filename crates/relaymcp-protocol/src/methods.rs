//! Method names.

/// Session handshake.
pub const INITIALIZE: &str = "initialize";
/// Liveness check.
pub const PING: &str = "ping";
/// Adjust server log verbosity.
pub const LOGGING_SET_LEVEL: &str = "logging/setLevel";

/// Fetch a task snapshot.
pub const TASKS_GET: &str = "tasks/get";
/// Wait for a task's terminal result.
pub const TASKS_RESULT: &str = "tasks/result";
/// Cancel a task.
pub const TASKS_CANCEL: &str = "tasks/cancel";
/// Page through tasks.
pub const TASKS_LIST: &str = "tasks/list";

/// Client finished initialization.
pub const NOTIFICATION_INITIALIZED: &str = "notifications/initialized";
/// Cancel an in-flight request.
pub const NOTIFICATION_CANCELLED: &str = "notifications/cancelled";
/// Progress report for a request carrying a progress token.
pub const NOTIFICATION_PROGRESS: &str = "notifications/progress";

/// Returns true for the task methods served by the task filter.
#[must_use]
pub fn is_task_method(method: &str) -> bool {
    matches!(method, TASKS_GET | TASKS_RESULT | TASKS_CANCEL | TASKS_LIST)
}
