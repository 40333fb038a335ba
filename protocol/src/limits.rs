//! Canonical operational limits. Every cap and timeout the daemon applies is
//! named here with a single value, so the tool layer, the batch executor, and
//! the dispatch loop cannot drift apart.

/// Upper bound on the number of calls a single `batch` invocation may carry.
/// Entries past this index fail individually; the batch itself still runs.
pub const BATCH_MAX_CALLS: usize = 25;

/// How many batch calls may be in flight at once.
pub const BATCH_CONCURRENCY: usize = 5;

/// Default budget for a single tool call.
pub const DEFAULT_TOOL_TIMEOUT_MS: u64 = 30_000;

/// Terminal commands get a longer leash than file operations.
pub const TERMINAL_TIMEOUT_MS: u64 = 120_000;

/// A batch must outlive its slowest member plus queueing.
pub const BATCH_TIMEOUT_MS: u64 = 300_000;

/// Budget for RPC methods (project registry, workspace queries).
pub const RPC_TIMEOUT_MS: u64 = 30_000;

/// Snapshot operations stage the whole working tree; give them headroom.
pub const SNAPSHOT_TIMEOUT_MS: u64 = 60_000;

pub const GREP_TIMEOUT_MS: u64 = 30_000;
pub const GREP_MAX_MATCHES: usize = 200;
pub const GREP_MAX_OUTPUT_BYTES: usize = 256 * 1024;
pub const GREP_MAX_LINE_CHARS: usize = 500;

/// Largest file the read tool returns before truncating.
pub const READ_MAX_BYTES: usize = 1024 * 1024;

/// Directory walk bounds shared by listDirectory, glob, and get_context.
pub const WALK_MAX_DEPTH: usize = 12;
pub const WALK_MAX_ENTRIES: usize = 2_000;

/// Terminal output kept per stream (tail-truncated, oldest bytes dropped).
pub const SHELL_MAX_OUTPUT_CHARS: usize = 200_000;

/// Reconnect backoff: base doubles per attempt up to the cap, then ±25%
/// jitter is applied on top.
pub const RECONNECT_BASE_DELAY_MS: u64 = 1_000;
pub const RECONNECT_MAX_DELAY_MS: u64 = 30_000;

pub const HEARTBEAT_INTERVAL_SECS: u64 = 10;
