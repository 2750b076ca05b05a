//! Shared fixtures and fault-injecting collaborators for integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use rowseq::CellValue;
use rowseq::Collaborators;
use rowseq::DurableStore;
use rowseq::FastCache;
use rowseq::LocalLockCoordinator;
use rowseq::LockCoordinator;
use rowseq::LockError;
use rowseq::LockName;
use rowseq::LockToken;
use rowseq::SequencerConfig;
use rowseq::StoreError;
use rowseq::TabularStore;
use rowseq::inmemory::MemoryCache;
use rowseq::inmemory::MemoryDurableStore;
use rowseq::inmemory::MemoryTable;

/// The default counter key for both tiers.
pub const COUNTER_KEY: &str = "rowseq:last_id";

/// A config with no pauses, suitable for fast tests.
pub fn fast_config() -> SequencerConfig {
    SequencerConfig {
        batch_pause_ms: 0,
        ..Default::default()
    }
}

/// In-memory collaborators plus handles to inspect them.
pub struct Harness {
    pub table: Arc<MemoryTable>,
    pub cache: Arc<MemoryCache>,
    pub durable: Arc<MemoryDurableStore>,
    pub locks: Arc<LocalLockCoordinator>,
}

impl Harness {
    /// Table with columns `id` and `payload` and no data rows.
    pub fn new() -> Self {
        Self {
            table: MemoryTable::new(&["id", "payload"]),
            cache: MemoryCache::new(),
            durable: MemoryDurableStore::new(),
            locks: LocalLockCoordinator::new(),
        }
    }

    pub fn deps(&self) -> Collaborators {
        Collaborators::new(self.table.clone(), self.cache.clone(), self.durable.clone(), self.locks.clone())
    }

    /// Same collaborators with the table swapped out.
    pub fn deps_with_table(&self, table: Arc<dyn TabularStore>) -> Collaborators {
        Collaborators::new(table, self.cache.clone(), self.durable.clone(), self.locks.clone())
    }

    /// Same collaborators with the lock coordinator swapped out.
    pub fn deps_with_locks(&self, locks: Arc<dyn LockCoordinator>) -> Collaborators {
        Collaborators::new(self.table.clone(), self.cache.clone(), self.durable.clone(), locks)
    }

    /// Append a row with an empty id and return its index.
    pub async fn append(&self, payload: &str) -> u32 {
        self.table.append_row(vec![CellValue::Empty, CellValue::from(payload)]).await
    }

    /// Append a row with the given id cell.
    pub async fn append_with_id(&self, id: impl Into<CellValue>) -> u32 {
        self.table.append_row(vec![id.into(), CellValue::from("x")]).await
    }

    pub async fn ids(&self) -> Vec<CellValue> {
        self.table.column_values(0).await
    }

    pub async fn cached(&self) -> Option<String> {
        self.cache.get(COUNTER_KEY).await.unwrap()
    }

    pub async fn stored(&self) -> Option<String> {
        self.durable.get(COUNTER_KEY).await.unwrap()
    }
}

fn unavailable(what: &str) -> StoreError {
    StoreError::Unavailable {
        reason: format!("injected {what} failure"),
    }
}

/// Lock coordinator that never grants anything.
#[derive(Default)]
pub struct UnavailableLocks {
    pub acquires: AtomicU32,
}

impl UnavailableLocks {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn acquire_count(&self) -> u32 {
        self.acquires.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LockCoordinator for UnavailableLocks {
    async fn acquire(&self, name: LockName, timeout: Duration) -> Result<LockToken, LockError> {
        self.acquires.fetch_add(1, Ordering::SeqCst);
        Err(LockError::Timeout {
            lock: name,
            timeout_ms: timeout.as_millis() as u64,
        })
    }

    fn release(&self, _token: LockToken) {}
}

/// Table wrapper that fails selected calls and counts row-count and write calls.
pub struct FlakyTable {
    inner: Arc<MemoryTable>,
    /// The first `fail_first_writes` write calls fail.
    fail_first_writes: u32,
    /// Write calls with start row at or beyond this fail.
    fail_from_row: Option<u32>,
    /// The first `fail_first_row_counts` row count calls fail.
    fail_first_row_counts: u32,
    writes: AtomicU32,
    row_counts: AtomicU32,
}

impl FlakyTable {
    fn wrap(inner: Arc<MemoryTable>) -> Self {
        Self {
            inner,
            fail_first_writes: 0,
            fail_from_row: None,
            fail_first_row_counts: 0,
            writes: AtomicU32::new(0),
            row_counts: AtomicU32::new(0),
        }
    }

    /// Fail the first `n` writes, then behave normally.
    pub fn failing_first(inner: Arc<MemoryTable>, n: u32) -> Arc<Self> {
        Arc::new(Self {
            fail_first_writes: n,
            ..Self::wrap(inner)
        })
    }

    /// Fail every write that starts at `row` or later.
    pub fn failing_from_row(inner: Arc<MemoryTable>, row: u32) -> Arc<Self> {
        Arc::new(Self {
            fail_from_row: Some(row),
            ..Self::wrap(inner)
        })
    }

    /// Fail the first `n` row count reads, then behave normally.
    pub fn failing_first_row_counts(inner: Arc<MemoryTable>, n: u32) -> Arc<Self> {
        Arc::new(Self {
            fail_first_row_counts: n,
            ..Self::wrap(inner)
        })
    }

    pub fn write_count(&self) -> u32 {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn row_count_calls(&self) -> u32 {
        self.row_counts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TabularStore for FlakyTable {
    async fn header(&self) -> Result<Vec<String>, StoreError> {
        self.inner.header().await
    }

    async fn row_count(&self) -> Result<u32, StoreError> {
        let call = self.row_counts.fetch_add(1, Ordering::SeqCst);
        if call < self.fail_first_row_counts {
            return Err(unavailable("row count"));
        }
        self.inner.row_count().await
    }

    async fn read_column(&self, column: u32, start_row: u32, len: u32) -> Result<Vec<CellValue>, StoreError> {
        self.inner.read_column(column, start_row, len).await
    }

    async fn write_column(&self, column: u32, start_row: u32, values: Vec<CellValue>) -> Result<(), StoreError> {
        let call = self.writes.fetch_add(1, Ordering::SeqCst);
        if call < self.fail_first_writes {
            return Err(unavailable("table write"));
        }
        if self.fail_from_row.is_some_and(|row| start_row >= row) {
            return Err(unavailable("table write"));
        }
        self.inner.write_column(column, start_row, values).await
    }
}

/// Cache whose reads always fail. Writes succeed and are discarded.
#[derive(Default)]
pub struct BrokenCache;

#[async_trait]
impl FastCache for BrokenCache {
    async fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
        Err(unavailable("cache read"))
    }

    async fn put(&self, _key: &str, _value: String, _ttl: Duration) -> Result<(), StoreError> {
        Ok(())
    }

    async fn remove(&self, _key: &str) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Durable store that fails every operation.
#[derive(Default)]
pub struct BrokenDurableStore;

#[async_trait]
impl DurableStore for BrokenDurableStore {
    async fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
        Err(unavailable("durable read"))
    }

    async fn set(&self, _key: &str, _value: String) -> Result<(), StoreError> {
        Err(unavailable("durable write"))
    }

    async fn delete(&self, _key: &str) -> Result<(), StoreError> {
        Err(unavailable("durable delete"))
    }
}
