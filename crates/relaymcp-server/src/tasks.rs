//! Task lifecycle manager.
//!
//! A task is a handle for work that outlives the request that started it.
//! The request is answered at once with the task's snapshot; the client then
//! polls `tasks/get`, blocks on `tasks/result`, or cancels with
//! `tasks/cancel`.
//!
//! # Lifecycle
//!
//! ```text
//! working ──► input_required ──► working ──► ... ──► completed
//!                                                 ├─► failed
//!                                                 └─► cancelled
//! ```
//!
//! Terminal states are final. Every task owns a single-fulfilment outcome
//! slot (a `watch` channel written exactly once) that any number of waiters
//! observe, and a cancellation token handed to the work running on its
//! behalf.
//!
//! # Usage
//!
//! ```ignore
//! let manager = Arc::new(TaskManager::new());
//! let task = manager.create_task(Some(60_000), None);
//!
//! manager.spawn(&task.task_id, async move { Ok(json!({"rows": 42})) });
//!
//! let outcome = manager.get_result(&task.task_id, &CancellationToken::new()).await?;
//! ```

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::FutureExt;
use relaymcp_core::logging::{debug, info, targets, warn};
use relaymcp_core::{McpError, McpResult};
use relaymcp_protocol::{JsonRpcError, ListTasksResult, Task, TaskId, TaskStatus};
use serde_json::Value;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Default number of tasks per `tasks/list` page.
pub const DEFAULT_PAGE_SIZE: usize = 50;

/// Capacity of the status feed before slow subscribers start lagging.
const STATUS_FEED_CAPACITY: usize = 256;

/// Defaults applied to new tasks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskDefaults {
    /// Retention when the requester asks for none.
    pub ttl_ms: Option<u64>,
    /// Suggested polling interval.
    pub poll_interval_ms: Option<u64>,
    /// Page size for `tasks/list`.
    pub page_size: usize,
}

impl Default for TaskDefaults {
    fn default() -> Self {
        Self {
            ttl_ms: None,
            poll_interval_ms: Some(1_000),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

/// Terminal outcome of a task.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    /// The work finished; carries its result.
    Completed(Value),
    /// The work failed; carries the error payload.
    Failed(Value),
    /// The task was cancelled.
    Cancelled,
}

impl TaskOutcome {
    /// The status this outcome puts the task in.
    #[must_use]
    pub fn status(&self) -> TaskStatus {
        match self {
            Self::Completed(_) => TaskStatus::Completed,
            Self::Failed(_) => TaskStatus::Failed,
            Self::Cancelled => TaskStatus::Cancelled,
        }
    }

    /// The result payload, absent for cancellation.
    #[must_use]
    pub fn payload(&self) -> Option<&Value> {
        match self {
            Self::Completed(value) | Self::Failed(value) => Some(value),
            Self::Cancelled => None,
        }
    }

    /// Returns true for [`TaskOutcome::Failed`].
    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// Errors from task state operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// No task with this id.
    NotFound(TaskId),
    /// The task already reached a terminal state.
    Terminal {
        /// Task id.
        task_id: TaskId,
        /// Its terminal status.
        status: TaskStatus,
    },
    /// Terminal statuses are set through completion or cancellation only.
    InvalidTransition(TaskStatus),
    /// The pagination cursor could not be read.
    InvalidCursor(String),
}

impl std::fmt::Display for TaskError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskError::NotFound(id) => write!(f, "Task not found: {id}"),
            TaskError::Terminal { task_id, status } => {
                write!(f, "Task {task_id} is already {status}")
            }
            TaskError::InvalidTransition(status) => {
                write!(f, "Cannot set status {status} directly")
            }
            TaskError::InvalidCursor(cursor) => write!(f, "Invalid cursor: {cursor}"),
        }
    }
}

impl std::error::Error for TaskError {}

impl From<TaskError> for McpError {
    fn from(err: TaskError) -> Self {
        McpError::invalid_params(err.to_string())
    }
}

/// Errors from waiting on a task's result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskWaitError {
    /// No task with this id.
    NotFound(TaskId),
    /// The waiter gave up; the task itself is unaffected.
    WaiterCancelled,
}

impl std::fmt::Display for TaskWaitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskWaitError::NotFound(id) => write!(f, "Task not found: {id}"),
            TaskWaitError::WaiterCancelled => write!(f, "Wait for task result was cancelled"),
        }
    }
}

impl std::error::Error for TaskWaitError {}

impl From<TaskWaitError> for McpError {
    fn from(err: TaskWaitError) -> Self {
        match err {
            TaskWaitError::NotFound(_) => McpError::invalid_params(err.to_string()),
            TaskWaitError::WaiterCancelled => McpError::request_cancelled(),
        }
    }
}

/// Mutable part of a task, guarded by the task's own lock.
#[derive(Debug)]
struct TaskRecord {
    status: TaskStatus,
    status_message: Option<String>,
    created_at: DateTime<Utc>,
    last_updated_at: DateTime<Utc>,
    ttl: Option<u64>,
    poll_interval: Option<u64>,
    outcome: Option<TaskOutcome>,
}

struct TaskEntry {
    id: TaskId,
    /// Creation order, for newest-first listing.
    seq: u64,
    record: Mutex<TaskRecord>,
    outcome: watch::Sender<Option<TaskOutcome>>,
    cancel: CancellationToken,
}

impl TaskEntry {
    fn lock(&self) -> MutexGuard<'_, TaskRecord> {
        self.record.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn snapshot_of(&self, record: &TaskRecord) -> Task {
        Task {
            task_id: self.id.clone(),
            status: record.status,
            status_message: record.status_message.clone(),
            created_at: record.created_at,
            last_updated_at: record.last_updated_at,
            ttl: record.ttl,
            poll_interval: record.poll_interval,
        }
    }

    fn snapshot(&self) -> Task {
        let record = self.lock();
        self.snapshot_of(&record)
    }
}

/// Registry and state machine for managed tasks.
///
/// The registry is a concurrent map; each task is locked independently, so
/// operations on different tasks never contend.
pub struct TaskManager {
    tasks: DashMap<TaskId, Arc<TaskEntry>>,
    next_seq: AtomicU64,
    defaults: TaskDefaults,
    status_feed: broadcast::Sender<Task>,
}

impl TaskManager {
    /// Creates a manager with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::with_defaults(TaskDefaults::default())
    }

    /// Creates a manager with custom defaults.
    #[must_use]
    pub fn with_defaults(defaults: TaskDefaults) -> Self {
        let (status_feed, _) = broadcast::channel(STATUS_FEED_CAPACITY);
        Self {
            tasks: DashMap::new(),
            next_seq: AtomicU64::new(0),
            defaults,
            status_feed,
        }
    }

    /// Returns the configured defaults.
    #[must_use]
    pub fn defaults(&self) -> &TaskDefaults {
        &self.defaults
    }

    /// Subscribes to snapshots published on every status change.
    ///
    /// Subscribers that fall behind lose the oldest snapshots.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Task> {
        self.status_feed.subscribe()
    }

    fn publish(&self, snapshot: &Task) {
        // No subscribers is fine.
        let _ = self.status_feed.send(snapshot.clone());
    }

    fn entry(&self, task_id: &str) -> Option<Arc<TaskEntry>> {
        self.tasks.get(task_id).map(|e| Arc::clone(e.value()))
    }

    /// Creates a task in the `working` state.
    ///
    /// `ttl` and `poll_interval` fall back to the manager defaults.
    pub fn create_task(&self, ttl: Option<u64>, poll_interval: Option<u64>) -> Task {
        let now = Utc::now();
        let (outcome, _) = watch::channel(None);
        let entry = Arc::new(TaskEntry {
            id: uuid::Uuid::new_v4().to_string(),
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
            record: Mutex::new(TaskRecord {
                status: TaskStatus::Working,
                status_message: None,
                created_at: now,
                last_updated_at: now,
                ttl: ttl.or(self.defaults.ttl_ms),
                poll_interval: poll_interval.or(self.defaults.poll_interval_ms),
                outcome: None,
            }),
            outcome,
            cancel: CancellationToken::new(),
        });
        let snapshot = entry.snapshot();
        self.tasks.insert(entry.id.clone(), entry);

        info!(target: targets::TASKS, "Created task {}", snapshot.task_id);
        self.publish(&snapshot);
        snapshot
    }

    /// Returns a snapshot of the task.
    #[must_use]
    pub fn get_task(&self, task_id: &str) -> Option<Task> {
        self.entry(task_id).map(|entry| entry.snapshot())
    }

    /// Moves a non-terminal task to `working` or `input_required`.
    ///
    /// # Errors
    ///
    /// Fails for an unknown id, a terminal task, or a terminal target status.
    pub fn update_status(
        &self,
        task_id: &str,
        status: TaskStatus,
        message: Option<String>,
    ) -> Result<Task, TaskError> {
        if status.is_terminal() {
            return Err(TaskError::InvalidTransition(status));
        }
        let entry = self
            .entry(task_id)
            .ok_or_else(|| TaskError::NotFound(task_id.to_owned()))?;

        let snapshot = {
            let mut record = entry.lock();
            if record.status.is_terminal() {
                return Err(TaskError::Terminal {
                    task_id: task_id.to_owned(),
                    status: record.status,
                });
            }
            record.status = status;
            record.status_message = message;
            record.last_updated_at = Utc::now();
            entry.snapshot_of(&record)
        };

        debug!(target: targets::TASKS, "Task {} is now {}", task_id, status);
        self.publish(&snapshot);
        Ok(snapshot)
    }

    /// Records the result of a task's work.
    ///
    /// The task becomes `failed` when `is_error` is set, `completed`
    /// otherwise. Only the first completion counts; later calls (and calls
    /// for unknown ids) return `false` and change nothing.
    pub fn complete_task(&self, task_id: &str, result: Value, is_error: bool) -> bool {
        let outcome = if is_error {
            TaskOutcome::Failed(result)
        } else {
            TaskOutcome::Completed(result)
        };
        self.finish(task_id, outcome, None).is_some()
    }

    /// Cancels a task.
    ///
    /// Returns `None` if the task is unknown or already terminal; otherwise
    /// the task becomes `cancelled`, its work is signalled to stop, waiters
    /// observe [`TaskOutcome::Cancelled`], and the new snapshot is returned.
    pub fn cancel_task(&self, task_id: &str) -> Option<Task> {
        let snapshot = self.finish(
            task_id,
            TaskOutcome::Cancelled,
            Some("Cancelled by request".to_owned()),
        )?;
        if let Some(entry) = self.entry(task_id) {
            entry.cancel.cancel();
        }
        Some(snapshot)
    }

    /// Applies a terminal outcome exactly once.
    fn finish(&self, task_id: &str, outcome: TaskOutcome, message: Option<String>) -> Option<Task> {
        let entry = self.entry(task_id)?;
        let snapshot = {
            let mut record = entry.lock();
            if record.status.is_terminal() {
                debug!(
                    target: targets::TASKS,
                    "Ignoring {} for task {}: already {}",
                    outcome.status(),
                    task_id,
                    record.status
                );
                return None;
            }
            record.status = outcome.status();
            if message.is_some() {
                record.status_message = message;
            }
            record.last_updated_at = Utc::now();
            record.outcome = Some(outcome.clone());
            // Fulfil under the record lock so status and slot never disagree.
            entry.outcome.send_replace(Some(outcome));
            entry.snapshot_of(&record)
        };

        info!(target: targets::TASKS, "Task {} finished: {}", task_id, snapshot.status);
        self.publish(&snapshot);
        Some(snapshot)
    }

    /// Waits until the task is terminal and returns its outcome.
    ///
    /// Any number of callers may wait; all observe the same outcome.
    /// Cancelling `cancel` abandons only this wait.
    ///
    /// # Errors
    ///
    /// [`TaskWaitError::NotFound`] for an unknown id,
    /// [`TaskWaitError::WaiterCancelled`] if `cancel` fires first.
    pub async fn get_result(
        &self,
        task_id: &str,
        cancel: &CancellationToken,
    ) -> Result<TaskOutcome, TaskWaitError> {
        let entry = self
            .entry(task_id)
            .ok_or_else(|| TaskWaitError::NotFound(task_id.to_owned()))?;
        let mut rx = entry.outcome.subscribe();

        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(TaskWaitError::WaiterCancelled),
            ready = rx.wait_for(Option::is_some) => match ready {
                Ok(slot) => slot
                    .clone()
                    .ok_or_else(|| TaskWaitError::NotFound(task_id.to_owned())),
                Err(_) => Err(TaskWaitError::NotFound(task_id.to_owned())),
            },
        }
    }

    /// Returns the outcome if the task is already terminal.
    #[must_use]
    pub fn peek_result(&self, task_id: &str) -> Option<TaskOutcome> {
        self.entry(task_id)?.lock().outcome.clone()
    }

    /// Lists tasks newest first.
    ///
    /// The cursor is the numeric offset of the next page. It is best effort:
    /// tasks created or evicted between pages shift later pages.
    ///
    /// # Errors
    ///
    /// [`TaskError::InvalidCursor`] if the cursor is not an offset.
    pub fn list_tasks(
        &self,
        cursor: Option<&str>,
        page_size: usize,
    ) -> Result<ListTasksResult, TaskError> {
        let offset = match cursor {
            Some(raw) => raw
                .parse::<usize>()
                .map_err(|_| TaskError::InvalidCursor(raw.to_owned()))?,
            None => 0,
        };
        let page_size = page_size.max(1);

        let mut entries: Vec<Arc<TaskEntry>> =
            self.tasks.iter().map(|e| Arc::clone(e.value())).collect();
        entries.sort_unstable_by(|a, b| b.seq.cmp(&a.seq));

        let total = entries.len();
        let tasks: Vec<Task> = entries
            .iter()
            .skip(offset)
            .take(page_size)
            .map(|entry| entry.snapshot())
            .collect();
        let next = offset.saturating_add(tasks.len());
        let next_cursor = (next < total && !tasks.is_empty()).then(|| next.to_string());

        Ok(ListTasksResult { tasks, next_cursor })
    }

    /// Runs `work` on a background tokio task on behalf of `task_id`.
    ///
    /// The result completes the task; an error or a panic fails it. If the
    /// task is cancelled first, the work is dropped.
    pub fn spawn<F>(self: &Arc<Self>, task_id: &str, work: F) -> JoinHandle<()>
    where
        F: Future<Output = McpResult<Value>> + Send + 'static,
    {
        let manager = Arc::clone(self);
        let task_id = task_id.to_owned();
        let cancel = self
            .cancellation_token(&task_id)
            .unwrap_or_else(CancellationToken::new);

        tokio::spawn(async move {
            let finished = tokio::select! {
                () = cancel.cancelled() => {
                    debug!(target: targets::TASKS, "Work for task {} dropped after cancel", task_id);
                    return;
                }
                finished = AssertUnwindSafe(work).catch_unwind() => finished,
            };

            let completed = match finished {
                Ok(Ok(value)) => manager.complete_task(&task_id, value, false),
                Ok(Err(err)) => manager.complete_task(&task_id, error_payload(err), true),
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    warn!(target: targets::TASKS, "Task {} panicked: {}", task_id, message);
                    manager.complete_task(
                        &task_id,
                        error_payload(McpError::internal_error(message)),
                        true,
                    )
                }
            };
            if !completed {
                debug!(target: targets::TASKS, "Result for task {} discarded", task_id);
            }
        })
    }

    /// Token cancelled when the task is cancelled.
    #[must_use]
    pub fn cancellation_token(&self, task_id: &str) -> Option<CancellationToken> {
        self.entry(task_id).map(|entry| entry.cancel.clone())
    }

    /// Removes terminal tasks whose TTL, counted from creation, has elapsed
    /// at `now`. Tasks without a TTL are kept.
    ///
    /// Returns the number of tasks removed.
    pub fn evict_expired(&self, now: DateTime<Utc>) -> usize {
        let before = self.tasks.len();
        self.tasks.retain(|_, entry| {
            let record = entry.lock();
            let Some(ttl) = record.ttl else {
                return true;
            };
            if !record.status.is_terminal() {
                return true;
            }
            let ttl = chrono::Duration::milliseconds(i64::try_from(ttl).unwrap_or(i64::MAX));
            record
                .created_at
                .checked_add_signed(ttl)
                .is_none_or(|expires| expires > now)
        });
        let evicted = before.saturating_sub(self.tasks.len());
        if evicted > 0 {
            debug!(target: targets::TASKS, "Evicted {} expired tasks", evicted);
        }
        evicted
    }

    /// Number of tasks in the registry.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Returns true if the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Number of non-terminal tasks.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.tasks
            .iter()
            .filter(|e| !e.value().lock().status.is_terminal())
            .count()
    }
}

impl Default for TaskManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TaskManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskManager")
            .field("task_count", &self.tasks.len())
            .field("defaults", &self.defaults)
            .finish()
    }
}

/// Shape of a failed task's payload: a JSON-RPC error object.
fn error_payload(err: McpError) -> Value {
    serde_json::to_value(JsonRpcError::from(err)).unwrap_or(Value::Null)
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_owned()
    }
}
