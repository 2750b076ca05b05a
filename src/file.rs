//! JSON-file backed table and durable store.
//!
//! Both re-read their file on every operation so rows appended by other
//! writers are visible, and replace it atomically (write to a sibling temp
//! file, then rename) on every mutation.
//!
//! [`FileLockCoordinator`] provides the named locks across processes through
//! exclusive advisory locks on sibling `.lock` files.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::fs::File;
use std::fs::OpenOptions;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use fs2::FileExt;
use serde::Deserialize;
use serde::Serialize;
use serde::de::DeserializeOwned;
use snafu::ResultExt;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;
use tracing::warn;

use crate::constants::LOCK_FILE_POLL_MS;
use crate::error::IoSnafu;
use crate::error::LockError;
use crate::error::StoreError;
use crate::inmemory::data_range;
use crate::traits::DurableStore;
use crate::traits::LockCoordinator;
use crate::traits::TabularStore;
use crate::types::CellValue;
use crate::types::LockName;
use crate::types::LockToken;

/// On-disk layout of a table file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableDocument {
    /// Row 1.
    pub header: Vec<String>,
    /// Data rows, row 2 onward.
    #[serde(default)]
    pub rows: Vec<Vec<CellValue>>,
}

async fn read_json<T: DeserializeOwned + Default>(path: &Path) -> Result<T, StoreError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
        Err(source) => Err(StoreError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec_pretty(value)?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, &bytes).await.context(IoSnafu { path: &tmp })?;
    tokio::fs::rename(&tmp, path).await.context(IoSnafu { path })?;
    Ok(())
}

/// Table stored as a [`TableDocument`] JSON file. A missing file is an empty
/// table with no header.
pub struct JsonFileTable {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileTable {
    /// Open (without reading) the table at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Create or replace the file with `document`.
    pub async fn save(&self, document: &TableDocument) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        write_json_atomic(&self.path, document).await
    }

    /// Read the whole document.
    pub async fn load(&self) -> Result<TableDocument, StoreError> {
        read_json(&self.path).await
    }
}

fn column_slot(document: &TableDocument, column: u32) -> Result<usize, StoreError> {
    let width = u32::try_from(document.header.len()).unwrap_or(u32::MAX);
    if column >= width {
        return Err(StoreError::ColumnOutOfRange { column, width });
    }
    Ok(column as usize)
}

#[async_trait]
impl TabularStore for JsonFileTable {
    async fn header(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.load().await?.header)
    }

    async fn row_count(&self) -> Result<u32, StoreError> {
        let document = self.load().await?;
        Ok(u32::try_from(document.rows.len()).unwrap_or(u32::MAX).saturating_add(1))
    }

    async fn read_column(&self, column: u32, start_row: u32, len: u32) -> Result<Vec<CellValue>, StoreError> {
        let document = self.load().await?;
        let col = column_slot(&document, column)?;
        let range = data_range(start_row, len, document.rows.len())?;
        Ok(document.rows[range].iter().map(|r| r.get(col).cloned().unwrap_or_default()).collect())
    }

    async fn write_column(&self, column: u32, start_row: u32, values: Vec<CellValue>) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut document: TableDocument = read_json(&self.path).await?;
        let col = column_slot(&document, column)?;
        let len = u32::try_from(values.len()).unwrap_or(u32::MAX);
        let range = data_range(start_row, len, document.rows.len())?;
        for (row, value) in document.rows[range].iter_mut().zip(values) {
            if row.len() <= col {
                row.resize(col + 1, CellValue::Empty);
            }
            row[col] = value;
        }
        write_json_atomic(&self.path, &document).await
    }
}

/// Durable key-value store kept as a JSON object of string values.
pub struct JsonFileDurableStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileDurableStore {
    /// Open (without reading) the store at `path`. A missing file is an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    async fn update<F>(&self, mutate: F) -> Result<(), StoreError>
    where F: FnOnce(&mut BTreeMap<String, String>) + Send {
        let _guard = self.write_lock.lock().await;
        let mut entries: BTreeMap<String, String> = read_json(&self.path).await?;
        mutate(&mut entries);
        write_json_atomic(&self.path, &entries).await
    }
}

#[async_trait]
impl DurableStore for JsonFileDurableStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let entries: BTreeMap<String, String> = read_json(&self.path).await?;
        Ok(entries.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StoreError> {
        self.update(|entries| {
            entries.insert(key.to_string(), value);
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.update(|entries| {
            entries.remove(key);
        })
        .await
    }
}

/// Lock coordinator backed by advisory file locks, one file per lock name.
///
/// Every process (and every coordinator within a process) that points at the
/// same base path contends for the same locks. The OS drops a lock when its
/// holder exits, so a crashed holder never wedges later runs.
pub struct FileLockCoordinator {
    base: PathBuf,
    held: parking_lot::Mutex<HashMap<LockToken, File>>,
    next_fencing: AtomicU64,
}

impl FileLockCoordinator {
    /// Place the lock files next to `path` (`<path>.document.lock` and
    /// `<path>.allocation.lock`).
    pub fn beside(path: impl Into<PathBuf>) -> Arc<Self> {
        Arc::new(Self {
            base: path.into(),
            held: parking_lot::Mutex::new(HashMap::new()),
            next_fencing: AtomicU64::new(1),
        })
    }

    /// Lock file used for `name`.
    pub fn lock_path(&self, name: LockName) -> PathBuf {
        let mut path = self.base.as_os_str().to_owned();
        path.push(format!(".{}.lock", name.as_str()));
        PathBuf::from(path)
    }

    fn open(&self, name: LockName) -> Result<File, LockError> {
        let path = self.lock_path(name);
        OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| LockError::LockUnavailable {
                lock: name,
                reason: format!("cannot open {}: {e}", path.display()),
            })
    }
}

fn is_contended(error: &std::io::Error) -> bool {
    error.kind() == std::io::ErrorKind::WouldBlock
        || error.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

#[async_trait]
impl LockCoordinator for FileLockCoordinator {
    async fn acquire(&self, name: LockName, timeout: Duration) -> Result<LockToken, LockError> {
        let file = self.open(name)?;
        let deadline = Instant::now() + timeout;

        loop {
            match file.try_lock_exclusive() {
                Ok(()) => break,
                Err(e) if is_contended(&e) => {}
                Err(e) => {
                    return Err(LockError::LockUnavailable {
                        lock: name,
                        reason: e.to_string(),
                    });
                }
            }

            let now = Instant::now();
            if now >= deadline {
                debug!(lock = %name, timeout_ms = timeout.as_millis() as u64, "lock file wait expired");
                return Err(LockError::Timeout {
                    lock: name,
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
            let pause = Duration::from_millis(LOCK_FILE_POLL_MS).min(deadline - now);
            tokio::time::sleep(pause).await;
        }

        let fencing = self.next_fencing.fetch_add(1, Ordering::SeqCst);
        let token = LockToken::new(name, fencing);
        self.held.lock().insert(token, file);
        Ok(token)
    }

    fn release(&self, token: LockToken) {
        let Some(file) = self.held.lock().remove(&token) else {
            return;
        };
        if let Err(e) = FileExt::unlock(&file) {
            warn!(lock = %token.name, error = %e, "lock file unlock failed, closing handle");
        }
    }
}
