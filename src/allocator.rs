//! Sequential id allocation.
//!
//! Assigns the next id to a freshly appended row under the document and
//! allocation locks, retrying recoverable failures with linear backoff.
//!
//! # Properties
//!
//! 1. **Mutual exclusion**: the counter advance runs only while both locks are held
//! 2. **Monotonicity**: a committed id is strictly greater than the resolved last id
//! 3. **Bounded effort**: at most `max_retries` attempts per submission
//! 4. **No compensation**: a submission that exhausts its attempts leaves its row without an id

use std::sync::Arc;
use std::time::Duration;

use snafu::ResultExt;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::config::SequencerConfig;
use crate::counter::CounterState;
use crate::error::AllocationError;
use crate::error::StorageReadSnafu;
use crate::error::StorageWriteSnafu;
use crate::lock::AllocationSection;
use crate::pure::RowCheck;
use crate::pure::check_submission_row;
use crate::pure::compute_linear_backoff_ms;
use crate::pure::compute_next_id;
use crate::pure::has_attempts_remaining;
use crate::pure::parse_strict_integer;
use crate::traits::Collaborators;
use crate::types::Allocation;
use crate::types::CellValue;
use crate::types::CounterSource;
use crate::types::ResolvedCounter;
use crate::types::Submission;

/// Result of one locked attempt.
#[derive(Debug)]
enum AttemptOutcome {
    /// Id written and counter persisted.
    Assigned(i64),
    /// Failed, another attempt may succeed.
    Retryable(AllocationError),
    /// Failed, retrying cannot help.
    Fatal(AllocationError),
}

impl From<Result<i64, AllocationError>> for AttemptOutcome {
    fn from(result: Result<i64, AllocationError>) -> Self {
        match result {
            Ok(id) => AttemptOutcome::Assigned(id),
            Err(e) if e.is_retryable() => AttemptOutcome::Retryable(e),
            Err(e) => AttemptOutcome::Fatal(e),
        }
    }
}

/// Assigns strictly increasing ids to submitted rows.
#[derive(Debug, Clone)]
pub struct Allocator {
    deps: Collaborators,
    counter: CounterState,
    config: Arc<SequencerConfig>,
}

impl Allocator {
    /// Create an allocator over the given collaborators.
    pub fn new(deps: Collaborators, config: Arc<SequencerConfig>) -> Self {
        let counter = CounterState::new(deps.cache.clone(), deps.durable.clone(), config.clone());
        Self { deps, counter, config }
    }

    /// Assign the next id to the submission's row.
    ///
    /// Returns [`Allocation::NoAssignment`] immediately for a header or absent
    /// row, after a non-recoverable failure, or once every attempt has failed.
    /// A failed table read while checking the row counts as a failed attempt.
    /// Never returns an error; the caller must not retry.
    pub async fn allocate(&self, submission: Submission) -> Allocation {
        let max_attempts = self.config.max_retries;
        for attempt in 0..max_attempts {
            let (outcome, section) = self.run_attempt(submission).await;

            match outcome {
                AttemptOutcome::Assigned(id) => {
                    drop(section);
                    info!(row = submission.row, id, attempt = attempt + 1, "id assigned");
                    return Allocation::Assigned(id);
                }
                AttemptOutcome::Fatal(e) => {
                    drop(section);
                    warn!(row = submission.row, attempt = attempt + 1, error = %e, "allocation failed permanently");
                    return Allocation::NoAssignment;
                }
                AttemptOutcome::Retryable(e) => {
                    if !has_attempts_remaining(attempt, max_attempts) {
                        drop(section);
                        warn!(
                            row = submission.row,
                            attempts = max_attempts,
                            error = %e,
                            "allocation attempts exhausted, row left without id"
                        );
                        return Allocation::NoAssignment;
                    }

                    let backoff = Duration::from_millis(compute_linear_backoff_ms(self.config.retry_backoff_ms, attempt));
                    warn!(
                        row = submission.row,
                        attempt = attempt + 1,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "allocation attempt failed, retrying"
                    );

                    if self.config.hold_locks_during_backoff {
                        tokio::time::sleep(backoff).await;
                        drop(section);
                    } else {
                        drop(section);
                        tokio::time::sleep(backoff).await;
                    }
                }
            }
        }

        // max_retries == 0 is rejected by SequencerConfig::validate
        Allocation::NoAssignment
    }

    /// Resolve the last-assigned id.
    ///
    /// Tiers in strict priority order:
    /// 1. fast cache
    /// 2. durable store
    /// 3. the id cell of the table's last row
    ///
    /// A tier whose value is missing or not a safe integer is skipped. When no
    /// tier yields a value the result is `start_id - increment`.
    pub async fn resolve_last_id(&self) -> Result<ResolvedCounter, AllocationError> {
        if let Some(value) = self.counter.cached().await {
            return Ok(ResolvedCounter {
                value,
                source: CounterSource::Cache,
            });
        }

        let durable = self.counter.durable().await.context(StorageReadSnafu {
            operation: "read durable counter",
        })?;
        if let Some(value) = durable {
            return Ok(ResolvedCounter {
                value,
                source: CounterSource::Durable,
            });
        }

        if let Some(value) = self.read_tail_id().await? {
            return Ok(ResolvedCounter {
                value,
                source: CounterSource::Tail,
            });
        }

        Ok(ResolvedCounter {
            value: self.config.seed_last_id(),
            source: CounterSource::Seed,
        })
    }

    /// Strictly parsed id of the table's last data row, if any.
    async fn read_tail_id(&self) -> Result<Option<i64>, AllocationError> {
        let row_count = self.deps.table.row_count().await.context(StorageReadSnafu {
            operation: "read row count",
        })?;
        if row_count < crate::constants::FIRST_DATA_ROW {
            return Ok(None);
        }
        let Some(column) = self.locate_id_column().await? else {
            return Ok(None);
        };
        let cell = self.deps.table.read_cell(column, row_count).await.context(StorageReadSnafu {
            operation: "read tail id",
        })?;
        Ok(parse_strict_integer(&cell))
    }

    async fn locate_id_column(&self) -> Result<Option<u32>, AllocationError> {
        self.deps.table.column_index(&self.config.id_column).await.context(StorageReadSnafu {
            operation: "read header",
        })
    }

    /// Check the submission row and locate the id column.
    async fn validate(&self, submission: Submission) -> Result<u32, AllocationError> {
        let row_count = self.deps.table.row_count().await.context(StorageReadSnafu {
            operation: "read row count",
        })?;
        match check_submission_row(submission.row, row_count) {
            RowCheck::Valid => {}
            RowCheck::NotADataRow => {
                return Err(AllocationError::InvalidSubmission {
                    row: submission.row,
                    reason: "not a data row".to_string(),
                });
            }
            RowCheck::Absent => {
                return Err(AllocationError::InvalidSubmission {
                    row: submission.row,
                    reason: format!("table has {row_count} rows"),
                });
            }
        }

        self.locate_id_column().await?.ok_or_else(|| AllocationError::ColumnMissing {
            name: self.config.id_column.clone(),
        })
    }

    /// Check the row, enter the critical section and try to commit one id.
    ///
    /// The section (if it was entered) is handed back so the caller decides
    /// whether it outlives the backoff sleep.
    async fn run_attempt(&self, submission: Submission) -> (AttemptOutcome, Option<AllocationSection>) {
        let row = submission.row;
        let column = match self.validate(submission).await {
            Ok(column) => column,
            Err(e) => return (AttemptOutcome::from(Err(e)), None),
        };
        let section = match AllocationSection::enter(&self.deps.locks, self.config.allocation_lock_timeout()).await {
            Ok(section) => section,
            Err(e) => return (AttemptOutcome::from(Err(AllocationError::from(e))), None),
        };
        let outcome = AttemptOutcome::from(self.commit_next_id(row, column).await);
        (outcome, Some(section))
    }

    /// Resolve, advance, write the cell, persist the counter. Locks must be held.
    async fn commit_next_id(&self, row: u32, column: u32) -> Result<i64, AllocationError> {
        let last = self.resolve_last_id().await?;
        let new_id = compute_next_id(last.value, self.config.increment).ok_or(AllocationError::CounterOverflow {
            last_id: last.value,
        })?;
        debug!(row, last_id = last.value, source = %last.source, new_id, "advancing counter");

        self.deps.table.write_cell(column, row, CellValue::Integer(new_id)).await.context(StorageWriteSnafu {
            operation: "write id cell",
        })?;
        self.counter.store(new_id).await.context(StorageWriteSnafu {
            operation: "persist counter",
        })?;
        Ok(new_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inmemory::MemoryCache;
    use crate::inmemory::MemoryDurableStore;
    use crate::inmemory::MemoryTable;
    use crate::lock::LocalLockCoordinator;
    use crate::traits::DurableStore;
    use crate::traits::FastCache;

    struct Fixture {
        table: Arc<MemoryTable>,
        cache: Arc<MemoryCache>,
        durable: Arc<MemoryDurableStore>,
        allocator: Allocator,
    }

    fn fixture(config: SequencerConfig) -> Fixture {
        let table = MemoryTable::new(&["id", "submitted_at", "payload"]);
        let cache = MemoryCache::new();
        let durable = MemoryDurableStore::new();
        let deps = Collaborators::new(table.clone(), cache.clone(), durable.clone(), LocalLockCoordinator::new());
        Fixture {
            table,
            cache,
            durable,
            allocator: Allocator::new(deps, Arc::new(config)),
        }
    }

    async fn append(table: &MemoryTable, id: CellValue) -> u32 {
        table.append_row(vec![id, CellValue::from("2024-01-01T00:00:00Z"), CellValue::from("{}")]).await
    }

    #[tokio::test]
    async fn test_resolve_on_empty_everything_is_seed() {
        let f = fixture(SequencerConfig::default());
        let resolved = f.allocator.resolve_last_id().await.unwrap();
        assert_eq!(resolved, ResolvedCounter {
            value: 0,
            source: CounterSource::Seed
        });
    }

    #[tokio::test]
    async fn test_resolve_cache_beats_durable() {
        let f = fixture(SequencerConfig::default());
        f.cache.put("rowseq:last_id", "10".into(), Duration::from_secs(60)).await.unwrap();
        f.durable.set("rowseq:last_id", "8".into()).await.unwrap();

        let resolved = f.allocator.resolve_last_id().await.unwrap();
        assert_eq!(resolved.value, 10);
        assert_eq!(resolved.source, CounterSource::Cache);
    }

    #[tokio::test]
    async fn test_resolve_falls_through_invalid_tiers_to_tail() {
        let f = fixture(SequencerConfig::default());
        f.cache.put("rowseq:last_id", "nope".into(), Duration::from_secs(60)).await.unwrap();
        f.durable.set("rowseq:last_id", "3.5".into()).await.unwrap();
        append(&f.table, CellValue::Integer(41)).await;

        let resolved = f.allocator.resolve_last_id().await.unwrap();
        assert_eq!(resolved, ResolvedCounter {
            value: 41,
            source: CounterSource::Tail
        });
    }

    #[tokio::test]
    async fn test_resolve_unparseable_tail_is_seed() {
        let f = fixture(SequencerConfig {
            start_id: 100,
            increment: 10,
            ..Default::default()
        });
        append(&f.table, CellValue::from("n/a")).await;

        let resolved = f.allocator.resolve_last_id().await.unwrap();
        assert_eq!(resolved, ResolvedCounter {
            value: 90,
            source: CounterSource::Seed
        });
    }

    #[tokio::test]
    async fn test_allocate_sequential_ids() {
        let f = fixture(SequencerConfig::default());
        let mut ids = Vec::new();
        for _ in 0..5 {
            let row = append(&f.table, CellValue::Empty).await;
            ids.push(f.allocator.allocate(Submission::new(row)).await.id().unwrap());
        }
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
        assert_eq!(f.table.column_values(0).await, (1..=5).map(CellValue::Integer).collect::<Vec<_>>());
        assert_eq!(f.durable.get("rowseq:last_id").await.unwrap().as_deref(), Some("5"));
    }

    #[tokio::test]
    async fn test_allocate_honours_start_and_increment() {
        let f = fixture(SequencerConfig {
            start_id: 1000,
            increment: 5,
            ..Default::default()
        });
        let first = append(&f.table, CellValue::Empty).await;
        let second = append(&f.table, CellValue::Empty).await;
        assert_eq!(f.allocator.allocate(Submission::new(first)).await, Allocation::Assigned(1000));
        assert_eq!(f.allocator.allocate(Submission::new(second)).await, Allocation::Assigned(1005));
    }

    #[tokio::test]
    async fn test_allocate_rejects_header_and_absent_rows() {
        let f = fixture(SequencerConfig::default());
        append(&f.table, CellValue::Empty).await;
        assert_eq!(f.allocator.allocate(Submission::new(1)).await, Allocation::NoAssignment);
        assert_eq!(f.allocator.allocate(Submission::new(0)).await, Allocation::NoAssignment);
        assert_eq!(f.allocator.allocate(Submission::new(3)).await, Allocation::NoAssignment);
        assert_eq!(f.table.column_values(0).await, vec![CellValue::Empty]);
    }

    #[tokio::test]
    async fn test_allocate_missing_column_is_fatal() {
        let f = fixture(SequencerConfig {
            id_column: "ticket".into(),
            ..Default::default()
        });
        let row = append(&f.table, CellValue::Empty).await;
        assert_eq!(f.allocator.allocate(Submission::new(row)).await, Allocation::NoAssignment);
    }

    #[tokio::test]
    async fn test_allocate_overflow_is_fatal() {
        let f = fixture(SequencerConfig::default());
        f.durable.set("rowseq:last_id", crate::constants::MAX_SAFE_INTEGER.to_string()).await.unwrap();
        let row = append(&f.table, CellValue::Empty).await;
        assert_eq!(f.allocator.allocate(Submission::new(row)).await, Allocation::NoAssignment);
        assert_eq!(f.table.column_values(0).await, vec![CellValue::Empty]);
    }

    #[test]
    fn test_attempt_outcome_classification() {
        assert!(matches!(AttemptOutcome::from(Ok(3)), AttemptOutcome::Assigned(3)));
        assert!(matches!(
            AttemptOutcome::from(Err(AllocationError::CounterOverflow { last_id: 1 })),
            AttemptOutcome::Fatal(_)
        ));
    }
}
