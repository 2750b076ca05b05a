//! In-memory collaborators.
//!
//! Deterministic, thread-safe implementations of the collaborator traits for
//! tests and single-process deployments. Cache expiry uses `tokio::time`, so
//! tests running with a paused clock can advance past a TTL instantly.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::error::StoreError;
use crate::traits::DurableStore;
use crate::traits::FastCache;
use crate::traits::TabularStore;
use crate::types::CellValue;

/// In-memory table. Row 1 is the header.
pub struct MemoryTable {
    header: Vec<String>,
    rows: RwLock<Vec<Vec<CellValue>>>,
}

impl MemoryTable {
    /// Create an empty table (header only) wrapped in Arc.
    pub fn new<S: AsRef<str>>(header: &[S]) -> Arc<Self> {
        Arc::new(Self::with_header(header))
    }

    fn with_header<S: AsRef<str>>(header: &[S]) -> Self {
        Self {
            header: header.iter().map(|h| h.as_ref().to_string()).collect(),
            rows: RwLock::new(Vec::new()),
        }
    }

    /// Append a data row, padding or truncating it to the header width.
    ///
    /// Returns the new row's 1-based index.
    pub async fn append_row(&self, mut cells: Vec<CellValue>) -> u32 {
        cells.resize(self.header.len(), CellValue::Empty);
        let mut rows = self.rows.write().await;
        rows.push(cells);
        // data row n sits at table row n + 1
        u32::try_from(rows.len()).unwrap_or(u32::MAX).saturating_add(1)
    }

    /// Snapshot of every data row's cell in `column`.
    pub async fn column_values(&self, column: u32) -> Vec<CellValue> {
        let rows = self.rows.read().await;
        rows.iter().map(|r| r.get(column as usize).cloned().unwrap_or_default()).collect()
    }

    fn check_column(&self, column: u32) -> Result<usize, StoreError> {
        let width = u32::try_from(self.header.len()).unwrap_or(u32::MAX);
        if column >= width {
            return Err(StoreError::ColumnOutOfRange { column, width });
        }
        Ok(column as usize)
    }
}

/// Map a 1-based data row range onto indices of the data row vector.
pub(crate) fn data_range(start_row: u32, len: u32, data_rows: usize) -> Result<std::ops::Range<usize>, StoreError> {
    let row_count = u32::try_from(data_rows).unwrap_or(u32::MAX).saturating_add(1);
    if start_row < 2 {
        return Err(StoreError::RowOutOfRange { row: start_row, row_count });
    }
    if len == 0 {
        return Ok(0..0);
    }
    let end_row = start_row.saturating_add(len - 1);
    if end_row > row_count {
        return Err(StoreError::RowOutOfRange { row: end_row, row_count });
    }
    let start = (start_row - 2) as usize;
    Ok(start..start + len as usize)
}

#[async_trait]
impl TabularStore for MemoryTable {
    async fn header(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.header.clone())
    }

    async fn row_count(&self) -> Result<u32, StoreError> {
        let rows = self.rows.read().await;
        Ok(u32::try_from(rows.len()).unwrap_or(u32::MAX).saturating_add(1))
    }

    async fn read_column(&self, column: u32, start_row: u32, len: u32) -> Result<Vec<CellValue>, StoreError> {
        let col = self.check_column(column)?;
        let rows = self.rows.read().await;
        let range = data_range(start_row, len, rows.len())?;
        Ok(rows[range].iter().map(|r| r.get(col).cloned().unwrap_or_default()).collect())
    }

    async fn write_column(&self, column: u32, start_row: u32, values: Vec<CellValue>) -> Result<(), StoreError> {
        let col = self.check_column(column)?;
        let len = u32::try_from(values.len()).unwrap_or(u32::MAX);
        let mut rows = self.rows.write().await;
        let range = data_range(start_row, len, rows.len())?;
        for (row, value) in rows[range].iter_mut().zip(values) {
            if let Some(cell) = row.get_mut(col) {
                *cell = value;
            }
        }
        Ok(())
    }
}

struct CacheEntry {
    value: String,
    expires_at: Instant,
}

/// In-memory cache with per-entry TTL. Expired entries read as absent.
#[derive(Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl MemoryCache {
    /// Create a new cache wrapped in Arc.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl FastCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        match entries.get(key) {
            Some(entry) if entry.expires_at > now => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, value: String, ttl: Duration) -> Result<(), StoreError> {
        let expires_at = Instant::now() + ttl;
        self.entries.write().await.insert(key.to_string(), CacheEntry { value, expires_at });
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

/// In-memory durable store. "Durable" for the lifetime of the process only.
#[derive(Default)]
pub struct MemoryDurableStore {
    data: RwLock<HashMap<String, String>>,
}

impl MemoryDurableStore {
    /// Create a new store wrapped in Arc.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl DurableStore for MemoryDurableStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.data.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StoreError> {
        self.data.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.data.write().await.remove(key);
        Ok(())
    }
}
