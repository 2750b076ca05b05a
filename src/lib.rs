//! Sequential row id allocation for append-mostly tables.
//!
//! Records appended concurrently to a shared table each receive a strictly
//! increasing id. A periodic reconciliation job repairs any drift left by
//! partial failures.
//!
//! - [`Allocator`] - resolves the last id (cache, then durable store, then the
//!   table's tail) and commits the next one under lock, with retry/backoff
//! - [`Reconciler`] - rewrites the id column to the canonical sequence in batches
//! - [`AdminReset`] - clears stored counter state
//! - [`spawn_reconcile_loop`] - runs reconciliation on a fixed period
//!
//! All three core operations share two named exclusive locks, always taken
//! in the same order: `document` before `allocation`.
//!
//! Collaborators (table, fast cache, durable store, lock coordinator) are
//! injected as trait objects through [`Collaborators`]; [`inmemory`] and
//! [`file`] provide ready-made implementations.
//!
//! ## Allocation Example
//!
//! ```ignore
//! use rowseq::{Allocator, Collaborators, SequencerConfig, Submission};
//!
//! let allocator = Allocator::new(deps, Arc::new(SequencerConfig::default()));
//! match allocator.allocate(Submission::new(row)).await {
//!     Allocation::Assigned(id) => println!("row {row} is #{id}"),
//!     Allocation::NoAssignment => { /* left for reconciliation */ }
//! }
//! ```

mod allocator;
mod config;
pub mod constants;
mod counter;
mod error;
pub mod file;
pub mod inmemory;
mod lock;
pub mod pure;
mod reconciler;
mod reset;
mod schedule;
mod traits;
mod types;

pub use allocator::Allocator;
pub use config::ConfigError;
pub use config::SequencerConfig;
pub use counter::CounterState;
pub use error::AllocationError;
pub use error::LockError;
pub use error::ReconcileError;
pub use error::StoreError;
pub use lock::AllocationSection;
pub use lock::LocalLockCoordinator;
pub use lock::LockGuard;
pub use reconciler::Reconciler;
pub use reset::AdminReset;
pub use schedule::spawn_reconcile_loop;
pub use traits::Collaborators;
pub use traits::DurableStore;
pub use traits::FastCache;
pub use traits::LockCoordinator;
pub use traits::TabularStore;
pub use types::Allocation;
pub use types::CellValue;
pub use types::CounterSource;
pub use types::LockName;
pub use types::LockToken;
pub use types::RepairReport;
pub use types::ResolvedCounter;
pub use types::Submission;
