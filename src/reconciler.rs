//! Id column reconciliation.
//!
//! Rewrites the id column to the canonical run `start_id, start_id + increment, ...`
//! under the document lock, one bounded batch at a time, then points both
//! counter tiers at the final id.
//!
//! A failed run keeps every batch written before the failure; later rows stay
//! untouched until the next run.

use std::sync::Arc;

use snafu::ResultExt;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::config::SequencerConfig;
use crate::counter::CounterState;
use crate::error::ReconcileError;
use crate::error::ReconcileStorageSnafu;
use crate::lock::LockGuard;
use crate::pure::compute_batch_ranges;
use crate::pure::plan_batch_repair;
use crate::traits::Collaborators;
use crate::types::LockName;
use crate::types::RepairReport;

/// Batch job that heals drift in the id column.
#[derive(Debug, Clone)]
pub struct Reconciler {
    deps: Collaborators,
    counter: CounterState,
    config: Arc<SequencerConfig>,
}

impl Reconciler {
    /// Create a reconciler over the given collaborators.
    pub fn new(deps: Collaborators, config: Arc<SequencerConfig>) -> Self {
        let counter = CounterState::new(deps.cache.clone(), deps.durable.clone(), config.clone());
        Self { deps, counter, config }
    }

    /// Rewrite every data row's id to its canonical value.
    ///
    /// Idempotent: a second run with no intervening writes corrects nothing.
    pub async fn repair_all(&self) -> Result<RepairReport, ReconcileError> {
        let _document =
            LockGuard::acquire(&self.deps.locks, LockName::Document, self.config.reconcile_lock_timeout()).await?;

        let result = self.repair_locked().await;
        match &result {
            Ok(report) => info!(
                rows_scanned = report.rows_scanned,
                rows_corrected = report.rows_corrected,
                batches_written = report.batches_written,
                final_id = ?report.final_id,
                "id column reconciled"
            ),
            Err(e) => warn!(error = %e, "reconciliation aborted"),
        }
        result
    }

    async fn repair_locked(&self) -> Result<RepairReport, ReconcileError> {
        let column = self
            .deps
            .table
            .column_index(&self.config.id_column)
            .await
            .context(ReconcileStorageSnafu { operation: "read header" })?
            .ok_or_else(|| ReconcileError::ReconcileColumnMissing {
                name: self.config.id_column.clone(),
            })?;
        let last_row = self.deps.table.row_count().await.context(ReconcileStorageSnafu {
            operation: "read row count",
        })?;

        let ranges = compute_batch_ranges(last_row, self.config.batch_size);
        let mut report = RepairReport::default();
        let mut expected = self.config.start_id;

        for (index, range) in ranges.iter().enumerate() {
            if index > 0 && !self.config.batch_pause().is_zero() {
                tokio::time::sleep(self.config.batch_pause()).await;
            }

            let cells = self.deps.table.read_column(column, range.start_row, range.len).await.context(
                ReconcileStorageSnafu {
                    operation: "read batch",
                },
            )?;
            let plan = plan_batch_repair(&cells, expected, self.config.increment)
                .ok_or(ReconcileError::SequenceOverflow { row: range.start_row })?;

            if plan.corrected > 0 {
                self.deps.table.write_column(column, range.start_row, plan.cells).await.context(
                    ReconcileStorageSnafu {
                        operation: "write batch",
                    },
                )?;
                report.batches_written = report.batches_written.saturating_add(1);
                debug!(start_row = range.start_row, len = range.len, corrected = plan.corrected, "batch corrected");
            }

            report.rows_scanned = report.rows_scanned.saturating_add(u64::from(range.len));
            report.rows_corrected = report.rows_corrected.saturating_add(u64::from(plan.corrected));
            report.final_id = plan.last_id.or(report.final_id);
            expected = plan.next_expected;
        }

        if let Some(final_id) = report.final_id {
            self.counter.store(final_id).await.context(ReconcileStorageSnafu {
                operation: "persist counter",
            })?;
        }

        Ok(report)
    }
}
