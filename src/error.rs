//! Error types for row sequence allocation.
//!
//! Strict-parse failures deliberately have no variant here: an unparseable
//! counter or id cell is reported as "absent" by [`crate::pure::parse_strict_integer`]
//! and never reaches a caller as an error.

use std::path::PathBuf;

use snafu::Snafu;

use crate::types::LockName;

/// Failure reported by a collaborator (table, cache or durable store).
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum StoreError {
    /// Backend could not serve the request.
    #[snafu(display("store unavailable: {reason}"))]
    Unavailable {
        /// Human-readable description of the failure.
        reason: String,
    },

    /// Row index outside the table.
    #[snafu(display("row {row} out of range (table has {row_count} rows)"))]
    RowOutOfRange {
        /// Requested row (1-based).
        row: u32,
        /// Rows in the table, header included.
        row_count: u32,
    },

    /// Column index outside the table.
    #[snafu(display("column {column} out of range (table has {width} columns)"))]
    ColumnOutOfRange {
        /// Requested column (0-based).
        column: u32,
        /// Columns in the header.
        width: u32,
    },

    /// Filesystem error from a file-backed store.
    #[snafu(display("i/o error on {}: {source}", path.display()))]
    Io {
        /// File being accessed.
        path: PathBuf,
        /// The underlying error.
        source: std::io::Error,
    },

    /// JSON encoding or decoding failed.
    #[snafu(display("serialization error: {source}"))]
    Serialization {
        /// The underlying error.
        source: serde_json::Error,
    },
}

impl From<serde_json::Error> for StoreError {
    fn from(source: serde_json::Error) -> Self {
        StoreError::Serialization { source }
    }
}

/// Failure to obtain a named lock.
#[derive(Debug, Clone, Snafu)]
#[snafu(visibility(pub))]
pub enum LockError {
    /// The lock was not granted within its wait bound.
    #[snafu(display("timed out after {timeout_ms}ms waiting for {lock} lock"))]
    Timeout {
        /// Lock being acquired.
        lock: LockName,
        /// Wait bound that expired.
        timeout_ms: u64,
    },

    /// The lock backend failed outright (for example an unopenable lock file).
    #[snafu(display("{lock} lock unavailable: {reason}"))]
    LockUnavailable {
        /// Lock being acquired.
        lock: LockName,
        /// Human-readable description of the failure.
        reason: String,
    },
}

/// Failure of a single allocation attempt.
///
/// [`AllocationError::is_retryable`] decides whether the retry loop makes
/// another attempt.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum AllocationError {
    /// The submission references the header or a row that does not exist.
    #[snafu(display("invalid submission for row {row}: {reason}"))]
    InvalidSubmission {
        /// Requested row.
        row: u32,
        /// Why it was rejected.
        reason: String,
    },

    /// The configured id column is not in the table header.
    #[snafu(display("id column '{name}' not found in header"))]
    ColumnMissing {
        /// Configured column name.
        name: String,
    },

    /// A lock was not granted in time.
    #[snafu(display("lock timeout: {source}"))]
    LockTimeout {
        /// The underlying lock error.
        source: LockError,
    },

    /// Reading counter state or the table tail failed.
    #[snafu(display("storage read failed during {operation}: {source}"))]
    StorageRead {
        /// What was being read.
        operation: &'static str,
        /// The underlying error.
        source: StoreError,
    },

    /// Writing the id cell or the counter state failed.
    #[snafu(display("storage write failed during {operation}: {source}"))]
    StorageWrite {
        /// What was being written.
        operation: &'static str,
        /// The underlying error.
        source: StoreError,
    },

    /// The next id would leave the safe integer range.
    #[snafu(display("counter overflow: cannot advance past {last_id}"))]
    CounterOverflow {
        /// Last-assigned id.
        last_id: i64,
    },
}

impl AllocationError {
    /// Whether another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            AllocationError::LockTimeout { .. }
            | AllocationError::StorageRead { .. }
            | AllocationError::StorageWrite { .. } => true,
            AllocationError::InvalidSubmission { .. }
            | AllocationError::ColumnMissing { .. }
            | AllocationError::CounterOverflow { .. } => false,
        }
    }
}

impl From<LockError> for AllocationError {
    fn from(source: LockError) -> Self {
        AllocationError::LockTimeout { source }
    }
}

/// Failure of a reconciliation run. Batches written before the failure stay written.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ReconcileError {
    /// The document lock was not granted in time.
    #[snafu(display("lock timeout: {source}"))]
    ReconcileLockTimeout {
        /// The underlying lock error.
        source: LockError,
    },

    /// The configured id column is not in the table header.
    #[snafu(display("id column '{name}' not found in header"))]
    ReconcileColumnMissing {
        /// Configured column name.
        name: String,
    },

    /// A table or counter operation failed mid-run.
    #[snafu(display("storage error during {operation}: {source}"))]
    ReconcileStorage {
        /// What was being done.
        operation: &'static str,
        /// The underlying error.
        source: StoreError,
    },

    /// The canonical sequence would leave the safe integer range.
    #[snafu(display("id sequence overflows at row {row}"))]
    SequenceOverflow {
        /// Row where the expected id stopped being representable.
        row: u32,
    },
}

impl From<LockError> for ReconcileError {
    fn from(source: LockError) -> Self {
        ReconcileError::ReconcileLockTimeout { source }
    }
}
