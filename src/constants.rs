//! Defaults and bounds for row sequence allocation.
//!
//! Tiger Style: Constants are fixed and immutable, enforced at compile time.
//! Every runtime knob in [`SequencerConfig`](crate::SequencerConfig) falls back
//! to one of these values.

// ============================================================================
// Identifier Numbering
// ============================================================================

/// Largest integer that survives a round trip through an IEEE-754 double.
///
/// Counter values are stored as strings and id cells may hold floating point
/// numbers, so anything beyond this bound is treated as absent.
pub const MAX_SAFE_INTEGER: i64 = (1 << 53) - 1;

/// Smallest safe integer (mirror of [`MAX_SAFE_INTEGER`]).
pub const MIN_SAFE_INTEGER: i64 = -MAX_SAFE_INTEGER;

/// First id handed out on an empty table.
pub const DEFAULT_START_ID: i64 = 1;

/// Distance between consecutive ids.
pub const DEFAULT_INCREMENT: i64 = 1;

/// Header name of the designated id column.
pub const DEFAULT_ID_COLUMN: &str = "id";

/// First data row. Row 1 is the header.
pub const FIRST_DATA_ROW: u32 = 2;

// ============================================================================
// Allocation
// ============================================================================

/// Maximum allocation attempts per submission.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Upper bound accepted for `max_retries`.
///
/// Tiger Style: bounded retries keep a stuck submission from holding a
/// handler forever.
pub const MAX_ALLOWED_RETRIES: u32 = 10;

/// Base backoff between allocation attempts. Attempt `n` (0-based) waits
/// `base * (n + 1)`.
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 2_000;

/// Wait bound for each allocation-path lock.
pub const DEFAULT_ALLOCATION_LOCK_TIMEOUT_MS: u64 = 10_000;

/// Poll interval while waiting on a contended lock file.
pub const LOCK_FILE_POLL_MS: u64 = 25;

// ============================================================================
// Counter State
// ============================================================================

/// Time-to-live of the cached counter (6 hours).
pub const DEFAULT_CACHE_TTL_SECS: u64 = 21_600;

/// Key of the counter entry in the fast cache.
pub const DEFAULT_CACHE_KEY: &str = "rowseq:last_id";

/// Key of the counter entry in the durable store.
pub const DEFAULT_DURABLE_KEY: &str = "rowseq:last_id";

// ============================================================================
// Reconciliation
// ============================================================================

/// Rows read and written per reconciliation batch.
pub const DEFAULT_BATCH_SIZE: u32 = 500;

/// Upper bound accepted for `batch_size`.
pub const MAX_BATCH_SIZE: u32 = 10_000;

/// Pause between reconciliation batches.
pub const DEFAULT_BATCH_PAUSE_MS: u64 = 100;

/// Wait bound for the document lock taken by reconciliation.
pub const DEFAULT_RECONCILE_LOCK_TIMEOUT_MS: u64 = 30_000;

// ============================================================================
// Compile-time checks
// ============================================================================

const _: () = assert!(DEFAULT_INCREMENT != 0);
const _: () = assert!(DEFAULT_START_ID > 0);
const _: () = assert!(DEFAULT_MAX_RETRIES > 0 && DEFAULT_MAX_RETRIES <= MAX_ALLOWED_RETRIES);
const _: () = assert!(DEFAULT_BATCH_SIZE > 0 && DEFAULT_BATCH_SIZE <= MAX_BATCH_SIZE);
const _: () = assert!(FIRST_DATA_ROW == 2);
