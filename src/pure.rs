//! Pure functions extracted from allocation and reconciliation.
//!
//! This module implements the "Functional Core, Imperative Shell" pattern:
//! everything here is deterministic and side-effect free. The async shells in
//! [`crate::allocator`] and [`crate::reconciler`] feed these functions values
//! read from collaborators and write back what they return.
//!
//! # Tiger Style
//!
//! - Checked arithmetic for every id computation (overflow is `None`, not a panic)
//! - Explicit integer types
//! - No I/O, no clocks

use crate::constants::MAX_SAFE_INTEGER;
use crate::constants::MIN_SAFE_INTEGER;
use crate::types::CellValue;

// ============================================================================
// Strict Parse
// ============================================================================

/// Check that `value` lies in the safe integer range.
#[inline]
pub fn is_safe_integer(value: i64) -> bool {
    (MIN_SAFE_INTEGER..=MAX_SAFE_INTEGER).contains(&value)
}

/// Interpret a stored counter string as a safe integer.
///
/// Surrounding whitespace is ignored. Plain integers and whole-valued decimal
/// or exponent forms (`"4.0"`, `"1e3"`) are accepted, matching how a float
/// cell holding the same number is read. Fractions, non-finite words, empty
/// strings and out-of-range values yield `None`.
pub fn parse_counter_value(raw: &str) -> Option<i64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    match trimmed.parse::<i64>() {
        Ok(value) => is_safe_integer(value).then_some(value),
        Err(_) => whole_float(trimmed.parse::<f64>().ok()?),
    }
}

/// Interpret a table cell as a safe integer.
///
/// Whole-valued floats are accepted (`4.0` is `4`); fractional, non-finite and
/// out-of-range numbers are not. Text goes through [`parse_counter_value`].
pub fn parse_strict_integer(cell: &CellValue) -> Option<i64> {
    match cell {
        CellValue::Empty => None,
        CellValue::Integer(v) => is_safe_integer(*v).then_some(*v),
        CellValue::Float(f) => whole_float(*f),
        CellValue::Text(s) => parse_counter_value(s),
    }
}

fn whole_float(value: f64) -> Option<i64> {
    if !value.is_finite() || value.fract() != 0.0 || value.abs() > MAX_SAFE_INTEGER as f64 {
        return None;
    }
    Some(value as i64)
}

// ============================================================================
// Id Arithmetic
// ============================================================================

/// Counter value used when no tier holds a usable id: `start_id - increment`,
/// so the first allocation yields exactly `start_id`.
#[inline]
pub fn seed_last_id(start_id: i64, increment: i64) -> Option<i64> {
    start_id.checked_sub(increment).filter(|v| is_safe_integer(*v))
}

/// Next id after `last_id`, or `None` if it leaves the safe range.
#[inline]
pub fn compute_next_id(last_id: i64, increment: i64) -> Option<i64> {
    last_id.checked_add(increment).filter(|v| is_safe_integer(*v))
}

// ============================================================================
// Backoff
// ============================================================================

/// Backoff before the attempt following `attempt_index` (0-based).
///
/// Grows linearly: `base * (attempt_index + 1)`, saturating.
#[inline]
pub fn compute_linear_backoff_ms(base_ms: u64, attempt_index: u32) -> u64 {
    base_ms.saturating_mul(u64::from(attempt_index).saturating_add(1))
}

/// Whether another attempt follows a failure at `attempt_index` (0-based).
#[inline]
pub fn has_attempts_remaining(attempt_index: u32, max_attempts: u32) -> bool {
    attempt_index.saturating_add(1) < max_attempts
}

// ============================================================================
// Submission Validation
// ============================================================================

/// Why a submission row was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowCheck {
    /// Row is a data row that exists.
    Valid,
    /// Row 0 or row 1 (the header).
    NotADataRow,
    /// Row beyond the end of the table.
    Absent,
}

/// Classify a submission row against the table's current row count
/// (header included).
#[inline]
pub fn check_submission_row(row: u32, row_count: u32) -> RowCheck {
    if row < crate::constants::FIRST_DATA_ROW {
        RowCheck::NotADataRow
    } else if row > row_count {
        RowCheck::Absent
    } else {
        RowCheck::Valid
    }
}

// ============================================================================
// Reconciliation Planning
// ============================================================================

/// A contiguous slice of data rows processed as one unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchRange {
    /// First row of the batch (1-based).
    pub start_row: u32,
    /// Rows in the batch.
    pub len: u32,
}

/// Split data rows `FIRST_DATA_ROW..=last_row` into batches of at most
/// `batch_size` rows. Empty when the table has no data rows.
pub fn compute_batch_ranges(last_row: u32, batch_size: u32) -> Vec<BatchRange> {
    let first = crate::constants::FIRST_DATA_ROW;
    if last_row < first || batch_size == 0 {
        return Vec::new();
    }
    let mut ranges = Vec::new();
    let mut start = first;
    loop {
        let remaining = last_row - start + 1;
        let len = remaining.min(batch_size);
        ranges.push(BatchRange { start_row: start, len });
        match start.checked_add(len) {
            Some(next) if next <= last_row => start = next,
            _ => break,
        }
    }
    ranges
}

/// Corrected contents of one batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchRepair {
    /// Cells to write back, one per row of the batch.
    pub cells: Vec<CellValue>,
    /// Number of cells that differ from the input.
    pub corrected: u32,
    /// Expected id for the first row of the following batch.
    pub next_expected: i64,
    /// Id of the last row in this batch.
    pub last_id: Option<i64>,
}

/// Rewrite a batch of id cells to the canonical run starting at `expected`.
///
/// A cell that already strictly parses to its expected id is kept as is;
/// anything else is replaced. Returns `None` if the run leaves the safe
/// integer range.
pub fn plan_batch_repair(cells: &[CellValue], expected: i64, increment: i64) -> Option<BatchRepair> {
    let mut out = Vec::with_capacity(cells.len());
    let mut corrected = 0u32;
    let mut next = expected;
    let mut last_id = None;

    for cell in cells {
        if !is_safe_integer(next) {
            return None;
        }
        if parse_strict_integer(cell) == Some(next) {
            out.push(cell.clone());
        } else {
            out.push(CellValue::Integer(next));
            corrected = corrected.saturating_add(1);
        }
        last_id = Some(next);
        next = next.checked_add(increment)?;
    }

    Some(BatchRepair {
        cells: out,
        corrected,
        next_expected: next,
        last_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_counter_value_accepts_plain_integers() {
        assert_eq!(parse_counter_value("10"), Some(10));
        assert_eq!(parse_counter_value("  42\n"), Some(42));
        assert_eq!(parse_counter_value("-3"), Some(-3));
        assert_eq!(parse_counter_value("4.0"), Some(4));
        assert_eq!(parse_counter_value("1e3"), Some(1000));
    }

    #[test]
    fn test_parse_counter_value_rejects_everything_else() {
        assert_eq!(parse_counter_value(""), None);
        assert_eq!(parse_counter_value("x"), None);
        assert_eq!(parse_counter_value("1.5"), None);
        assert_eq!(parse_counter_value("1e-3"), None);
        assert_eq!(parse_counter_value("NaN"), None);
        assert_eq!(parse_counter_value("inf"), None);
        assert_eq!(parse_counter_value("9007199254740992"), None);
        assert_eq!(parse_counter_value("9007199254740992.0"), None);
    }

    #[test]
    fn test_parse_strict_integer_floats() {
        assert_eq!(parse_strict_integer(&CellValue::Float(4.0)), Some(4));
        assert_eq!(parse_strict_integer(&CellValue::Float(4.5)), None);
        assert_eq!(parse_strict_integer(&CellValue::Float(f64::NAN)), None);
        assert_eq!(parse_strict_integer(&CellValue::Float(1e300)), None);
        assert_eq!(parse_strict_integer(&CellValue::Empty), None);
    }

    #[test]
    fn test_text_and_float_cells_agree() {
        for value in [4.0, -2.0, 4.5, 1e3, 1e300, f64::INFINITY] {
            let text = CellValue::Text(value.to_string());
            assert_eq!(parse_strict_integer(&text), parse_strict_integer(&CellValue::Float(value)), "{value}");
        }
        assert_eq!(parse_strict_integer(&CellValue::from("4.0")), Some(4));
    }

    #[test]
    fn test_parse_strict_integer_out_of_range_integer() {
        assert_eq!(parse_strict_integer(&CellValue::Integer(MAX_SAFE_INTEGER)), Some(MAX_SAFE_INTEGER));
        assert_eq!(parse_strict_integer(&CellValue::Integer(MAX_SAFE_INTEGER + 1)), None);
    }

    #[test]
    fn test_seed_and_next() {
        assert_eq!(seed_last_id(1, 1), Some(0));
        assert_eq!(seed_last_id(100, 10), Some(90));
        assert_eq!(compute_next_id(0, 1), Some(1));
        assert_eq!(compute_next_id(MAX_SAFE_INTEGER, 1), None);
    }

    #[test]
    fn test_linear_backoff() {
        assert_eq!(compute_linear_backoff_ms(2_000, 0), 2_000);
        assert_eq!(compute_linear_backoff_ms(2_000, 1), 4_000);
        assert_eq!(compute_linear_backoff_ms(u64::MAX, 3), u64::MAX);
    }

    #[test]
    fn test_attempts_remaining() {
        assert!(has_attempts_remaining(0, 3));
        assert!(has_attempts_remaining(1, 3));
        assert!(!has_attempts_remaining(2, 3));
        assert!(!has_attempts_remaining(0, 1));
    }

    #[test]
    fn test_check_submission_row() {
        assert_eq!(check_submission_row(0, 5), RowCheck::NotADataRow);
        assert_eq!(check_submission_row(1, 5), RowCheck::NotADataRow);
        assert_eq!(check_submission_row(2, 5), RowCheck::Valid);
        assert_eq!(check_submission_row(5, 5), RowCheck::Valid);
        assert_eq!(check_submission_row(6, 5), RowCheck::Absent);
        assert_eq!(check_submission_row(2, 1), RowCheck::Absent);
    }

    #[test]
    fn test_batch_ranges() {
        assert!(compute_batch_ranges(1, 500).is_empty());
        assert_eq!(compute_batch_ranges(2, 500), vec![BatchRange { start_row: 2, len: 1 }]);
        assert_eq!(compute_batch_ranges(8, 3), vec![
            BatchRange { start_row: 2, len: 3 },
            BatchRange { start_row: 5, len: 3 },
            BatchRange { start_row: 8, len: 1 },
        ]);
        assert_eq!(compute_batch_ranges(7, 3), vec![
            BatchRange { start_row: 2, len: 3 },
            BatchRange { start_row: 5, len: 3 },
        ]);
    }

    #[test]
    fn test_batch_ranges_at_row_limit() {
        let ranges = compute_batch_ranges(u32::MAX, u32::MAX);
        assert_eq!(ranges, vec![BatchRange {
            start_row: 2,
            len: u32::MAX - 1,
        }]);
    }

    #[test]
    fn test_plan_batch_repair_mixed_column() {
        let cells = vec![CellValue::Integer(3), CellValue::from("x"), CellValue::Integer(2), CellValue::Integer(4)];
        let plan = plan_batch_repair(&cells, 1, 1).unwrap();
        assert_eq!(plan.cells, vec![
            CellValue::Integer(1),
            CellValue::Integer(2),
            CellValue::Integer(3),
            CellValue::Integer(4),
        ]);
        assert_eq!(plan.corrected, 3);
        assert_eq!(plan.next_expected, 5);
        assert_eq!(plan.last_id, Some(4));
    }

    #[test]
    fn test_plan_batch_repair_keeps_equivalent_cells() {
        let cells = vec![CellValue::from("10"), CellValue::Float(20.0)];
        let plan = plan_batch_repair(&cells, 10, 10).unwrap();
        assert_eq!(plan.corrected, 0);
        assert_eq!(plan.cells, cells);
    }

    #[test]
    fn test_plan_batch_repair_overflow() {
        let cells = vec![CellValue::Empty, CellValue::Empty];
        assert!(plan_batch_repair(&cells, MAX_SAFE_INTEGER, 1).is_none());
    }
}
