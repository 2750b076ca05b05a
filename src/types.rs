//! Shared types for row sequence allocation.

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

/// Contents of a single table cell.
///
/// Serialized untagged so a JSON table reads naturally: `null`, `7`, `7.5`
/// and `"x"` map to the four variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum CellValue {
    /// Blank cell.
    #[default]
    Empty,
    /// Whole number.
    Integer(i64),
    /// Floating point number.
    Float(f64),
    /// Free text.
    Text(String),
}

impl From<i64> for CellValue {
    fn from(value: i64) -> Self {
        CellValue::Integer(value)
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        CellValue::Text(value.to_string())
    }
}

impl From<String> for CellValue {
    fn from(value: String) -> Self {
        CellValue::Text(value)
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Empty => Ok(()),
            CellValue::Integer(v) => write!(f, "{v}"),
            CellValue::Float(v) => write!(f, "{v}"),
            CellValue::Text(s) => f.write_str(s),
        }
    }
}

/// The two named exclusive locks.
///
/// Acquisition order is fixed: [`LockName::Document`] before
/// [`LockName::Allocation`], in every caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockName {
    /// Coarse lock over the whole table. Reconciliation holds only this one.
    Document,
    /// Fine lock over the counter advance.
    Allocation,
}

impl LockName {
    /// Stable name used in logs and lock tables.
    pub fn as_str(&self) -> &'static str {
        match self {
            LockName::Document => "document",
            LockName::Allocation => "allocation",
        }
    }
}

impl fmt::Display for LockName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Proof of holding a named lock. Scoped to one critical section, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LockToken {
    /// Which lock this token belongs to.
    pub name: LockName,
    /// Monotonically increasing value issued by the coordinator.
    pub fencing: u64,
}

impl LockToken {
    /// Create a new lock token.
    pub fn new(name: LockName, fencing: u64) -> Self {
        Self { name, fencing }
    }
}

/// An accepted external submission awaiting its id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    /// 1-based row index of the appended record. Row 1 is the header.
    pub row: u32,
}

impl Submission {
    /// Create a submission targeting `row`.
    pub fn new(row: u32) -> Self {
        Self { row }
    }
}

/// Caller-facing result of [`Allocator::allocate`](crate::Allocator::allocate).
///
/// Callers must not retry on `NoAssignment`; retries already happened inside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Allocation {
    /// The id written into the target row.
    Assigned(i64),
    /// No id was written. The row stays without an id.
    NoAssignment,
}

impl Allocation {
    /// The assigned id, if any.
    pub fn id(&self) -> Option<i64> {
        match self {
            Allocation::Assigned(id) => Some(*id),
            Allocation::NoAssignment => None,
        }
    }

    /// Whether an id was written.
    pub fn is_assigned(&self) -> bool {
        matches!(self, Allocation::Assigned(_))
    }
}

/// Tier that produced the last-assigned id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterSource {
    /// Fast cache hit.
    Cache,
    /// Durable store hit.
    Durable,
    /// Parsed from the id cell of the table's last row.
    Tail,
    /// Nothing usable anywhere; seeded as `start_id - increment`.
    Seed,
}

impl fmt::Display for CounterSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CounterSource::Cache => "cache",
            CounterSource::Durable => "durable",
            CounterSource::Tail => "tail",
            CounterSource::Seed => "seed",
        };
        f.write_str(s)
    }
}

/// Last-assigned id together with the tier it came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedCounter {
    /// The last-assigned id.
    pub value: i64,
    /// Where it was found.
    pub source: CounterSource,
}

/// Summary of one reconciliation run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairReport {
    /// Data rows visited.
    pub rows_scanned: u64,
    /// Rows whose id cell was overwritten.
    pub rows_corrected: u64,
    /// Batches written back (batches without corrections are skipped).
    pub batches_written: u32,
    /// Id of the last data row after correction. `None` on an empty table.
    pub final_id: Option<i64>,
}
