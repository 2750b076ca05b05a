//! Collaborator interfaces injected into the allocator and reconciler.
//!
//! Each collaborator is an object-safe async trait so production backends and
//! in-memory fakes can be swapped behind `Arc<dyn ...>`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::LockError;
use crate::error::StoreError;
use crate::types::CellValue;
use crate::types::LockName;
use crate::types::LockToken;

/// Append-mostly row store with a header row.
///
/// Rows are 1-based and row 1 is the header. Columns are 0-based.
#[async_trait]
pub trait TabularStore: Send + Sync {
    /// Header cells of row 1.
    async fn header(&self) -> Result<Vec<String>, StoreError>;

    /// Number of rows, header included. An empty table with only a header returns 1.
    async fn row_count(&self) -> Result<u32, StoreError>;

    /// Read `len` cells of `column` starting at `start_row`.
    async fn read_column(&self, column: u32, start_row: u32, len: u32) -> Result<Vec<CellValue>, StoreError>;

    /// Overwrite cells of `column` starting at `start_row` as one unit.
    async fn write_column(&self, column: u32, start_row: u32, values: Vec<CellValue>) -> Result<(), StoreError>;

    /// Locate a column by its header name.
    async fn column_index(&self, name: &str) -> Result<Option<u32>, StoreError> {
        let header = self.header().await?;
        Ok(header.iter().position(|h| h.trim() == name).and_then(|i| u32::try_from(i).ok()))
    }

    /// Read a single cell.
    async fn read_cell(&self, column: u32, row: u32) -> Result<CellValue, StoreError> {
        let mut cells = self.read_column(column, row, 1).await?;
        Ok(cells.pop().unwrap_or_default())
    }

    /// Overwrite a single cell.
    async fn write_cell(&self, column: u32, row: u32, value: CellValue) -> Result<(), StoreError> {
        self.write_column(column, row, vec![value]).await
    }
}

/// Ephemeral key-value cache with per-entry time-to-live.
#[async_trait]
pub trait FastCache: Send + Sync {
    /// Look up a live entry.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Store `value` under `key` for `ttl`.
    async fn put(&self, key: &str, value: String, ttl: Duration) -> Result<(), StoreError>;

    /// Drop `key`. Removing an absent key succeeds.
    async fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// Persistent key-value store without expiry.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Look up `key`.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Store `value` under `key`.
    async fn set(&self, key: &str, value: String) -> Result<(), StoreError>;

    /// Delete `key`. Deleting an absent key succeeds.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

/// Issues the named exclusive locks.
#[async_trait]
pub trait LockCoordinator: Send + Sync {
    /// Wait up to `timeout` for exclusive ownership of `name`.
    async fn acquire(&self, name: LockName, timeout: Duration) -> Result<LockToken, LockError>;

    /// Give up ownership. Must be a no-op for unknown or already released tokens
    /// and must never panic.
    fn release(&self, token: LockToken);
}

/// The four collaborators every core operation works against.
#[derive(Clone)]
pub struct Collaborators {
    /// Row store holding the id column.
    pub table: Arc<dyn TabularStore>,
    /// Hot copy of the counter.
    pub cache: Arc<dyn FastCache>,
    /// Authoritative copy of the counter.
    pub durable: Arc<dyn DurableStore>,
    /// Lock service shared by allocator, reconciler and reset.
    pub locks: Arc<dyn LockCoordinator>,
}

impl Collaborators {
    /// Bundle the collaborators.
    pub fn new(
        table: Arc<dyn TabularStore>,
        cache: Arc<dyn FastCache>,
        durable: Arc<dyn DurableStore>,
        locks: Arc<dyn LockCoordinator>,
    ) -> Self {
        Self {
            table,
            cache,
            durable,
            locks,
        }
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}
