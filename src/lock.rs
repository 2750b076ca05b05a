//! Scoped lock acquisition and the in-process lock coordinator.
//!
//! Every critical section holds its locks through a [`LockGuard`], which
//! releases on drop. Early returns, `?` and panics all release.
//!
//! ## Lock Example
//!
//! ```ignore
//! let section = AllocationSection::enter(&locks, timeout).await?;
//! // document and allocation locks held
//! drop(section); // allocation released, then document
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::OwnedMutexGuard;
use tracing::debug;
use tracing::trace;

use crate::error::LockError;
use crate::traits::LockCoordinator;
use crate::types::LockName;
use crate::types::LockToken;

/// A held lock, released when dropped.
pub struct LockGuard {
    locks: Arc<dyn LockCoordinator>,
    token: Option<LockToken>,
}

impl LockGuard {
    /// Wait up to `timeout` for `name`.
    pub async fn acquire(
        locks: &Arc<dyn LockCoordinator>,
        name: LockName,
        timeout: Duration,
    ) -> Result<Self, LockError> {
        let token = locks.acquire(name, timeout).await?;
        trace!(lock = %name, fencing = token.fencing, "lock acquired");
        Ok(Self {
            locks: Arc::clone(locks),
            token: Some(token),
        })
    }

    /// Token proving ownership.
    pub fn token(&self) -> Option<LockToken> {
        self.token
    }

    /// Release now instead of at end of scope.
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if let Some(token) = self.token.take() {
            self.locks.release(token);
            trace!(lock = %token.name, fencing = token.fencing, "lock released");
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.release_inner();
    }
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard").field("token", &self.token).finish()
    }
}

/// Both allocation-path locks, taken in the fixed order.
///
/// Fields drop in declaration order, so `allocation` is released before
/// `document`.
#[derive(Debug)]
pub struct AllocationSection {
    allocation: LockGuard,
    document: LockGuard,
}

impl AllocationSection {
    /// Acquire `document`, then `allocation`, each bounded by `timeout`.
    ///
    /// If `allocation` times out the already-held `document` lock is released
    /// before the error is returned.
    pub async fn enter(locks: &Arc<dyn LockCoordinator>, timeout: Duration) -> Result<Self, LockError> {
        let document = LockGuard::acquire(locks, LockName::Document, timeout).await?;
        let allocation = LockGuard::acquire(locks, LockName::Allocation, timeout).await?;
        Ok(Self { allocation, document })
    }

    /// Release `allocation`, then `document`.
    pub fn release(self) {
        let Self { allocation, document } = self;
        allocation.release();
        document.release();
    }
}

/// In-process lock coordinator backed by one async mutex per lock name.
///
/// Tokens carry a fencing value that increases with every grant. Releasing a
/// token that is unknown or already released does nothing.
pub struct LocalLockCoordinator {
    mutexes: HashMap<LockName, Arc<tokio::sync::Mutex<()>>>,
    held: Mutex<HashMap<LockToken, OwnedMutexGuard<()>>>,
    next_fencing: AtomicU64,
}

impl Default for LocalLockCoordinator {
    fn default() -> Self {
        Self::new_inner()
    }
}

impl LocalLockCoordinator {
    /// Create a new coordinator wrapped in Arc.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::new_inner())
    }

    fn new_inner() -> Self {
        let mutexes = [LockName::Document, LockName::Allocation]
            .into_iter()
            .map(|name| (name, Arc::new(tokio::sync::Mutex::new(()))))
            .collect();
        Self {
            mutexes,
            held: Mutex::new(HashMap::new()),
            next_fencing: AtomicU64::new(1),
        }
    }

    /// Whether `name` is currently held by anyone.
    pub fn is_held(&self, name: LockName) -> bool {
        self.held.lock().keys().any(|t| t.name == name)
    }
}

#[async_trait]
impl LockCoordinator for LocalLockCoordinator {
    async fn acquire(&self, name: LockName, timeout: Duration) -> Result<LockToken, LockError> {
        let mutex = match self.mutexes.get(&name) {
            Some(m) => Arc::clone(m),
            None => {
                return Err(LockError::Timeout {
                    lock: name,
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
        };

        match tokio::time::timeout(timeout, mutex.lock_owned()).await {
            Ok(guard) => {
                let fencing = self.next_fencing.fetch_add(1, Ordering::SeqCst);
                let token = LockToken::new(name, fencing);
                self.held.lock().insert(token, guard);
                Ok(token)
            }
            Err(_) => {
                debug!(lock = %name, timeout_ms = timeout.as_millis() as u64, "lock wait expired");
                Err(LockError::Timeout {
                    lock: name,
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    fn release(&self, token: LockToken) {
        if self.held.lock().remove(&token).is_none() {
            trace!(lock = %token.name, fencing = token.fencing, "release of unheld token ignored");
        }
    }
}
