//! System-wide tuning constants.

// Trigger polling

/// Interval between store polls inside one long-poll request.
pub const LONG_POLL_INTERVAL_MS: u64 = 2_000;

/// Hard ceiling on any single long-poll request.
pub const LONG_POLL_MAX_TIMEOUT_MS: u64 = 60_000;

/// Long-poll timeout the runner uses when it has no running children.
pub const RUNNER_POLL_COLD_TIMEOUT_MS: u64 = 60_000;

/// Long-poll timeout when children are running, so exits are reaped quickly.
pub const RUNNER_POLL_WARM_TIMEOUT_MS: u64 = 5_000;

/// Sleep between runner ticks when at capacity.
pub const RUNNER_FULL_SLEEP_MS: u64 = 2_000;

/// How long a claimed channel is held as "processing" before other pollers
/// may pick it up again.
pub const CHANNEL_HOLD_SECS: i64 = 60;

/// Maximum inbox messages delivered per slack_inbox_message trigger.
pub const INBOX_BATCH_LIMIT: i64 = 5;

// Inbox dedup

/// Window in which a recent task by the same creator counts as a
/// duplicate candidate.
pub const DEDUP_WINDOW_SECS: i64 = 600;

/// Jaccard similarity above which two descriptions are duplicates.
pub const DEDUP_SIMILARITY_THRESHOLD: f64 = 0.80;

/// Lower similarity threshold applied when the candidate targets the
/// same agent.
pub const DEDUP_SAME_AGENT_THRESHOLD: f64 = 0.60;

// Session log streaming

/// Flush the child's buffered stdout lines once this many accumulate.
pub const SESSION_LOG_BATCH_LINES: usize = 50;

/// ... or once this much time has passed since the last flush.
pub const SESSION_LOG_BATCH_SECS: u64 = 5;

// Runner lifecycle

/// Default grace period for children to exit on shutdown.
pub const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 30_000;

/// Default concurrency cap per agent.
pub const DEFAULT_MAX_CONCURRENT_TASKS: u32 = 1;

/// Backoff after a failed broker call before the next tick retries.
pub const RUNNER_BACKOFF_BASE_MS: u64 = 1_000;

// Limits

/// Identity blob fields are capped at 64 KiB each.
pub const IDENTITY_BLOB_MAX_BYTES: usize = 64 * 1024;

/// Default task priority.
pub const DEFAULT_TASK_PRIORITY: i64 = 50;

/// Default page size for list endpoints.
pub const DEFAULT_LIST_LIMIT: i64 = 50;
