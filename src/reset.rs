//! Administrative counter reset.
//!
//! Clears the cached and durable counter copies so the next allocation
//! re-derives the counter from the table's tail. The table itself is never
//! touched.

use std::sync::Arc;

use tracing::info;
use tracing::warn;

use crate::config::SequencerConfig;
use crate::counter::CounterState;
use crate::lock::AllocationSection;
use crate::traits::Collaborators;

/// Erases stored counter state on demand.
#[derive(Debug, Clone)]
pub struct AdminReset {
    deps: Collaborators,
    counter: CounterState,
    config: Arc<SequencerConfig>,
}

impl AdminReset {
    /// Create a reset handle over the given collaborators.
    pub fn new(deps: Collaborators, config: Arc<SequencerConfig>) -> Self {
        let counter = CounterState::new(deps.cache.clone(), deps.durable.clone(), config.clone());
        Self { deps, counter, config }
    }

    /// Clear both counter tiers under the allocation-path locks.
    ///
    /// Returns `false` on any failure instead of an error; nothing escapes
    /// this boundary.
    pub async fn reset_storage(&self) -> bool {
        let section = match AllocationSection::enter(&self.deps.locks, self.config.allocation_lock_timeout()).await {
            Ok(section) => section,
            Err(e) => {
                warn!(error = %e, "counter reset could not take locks");
                return false;
            }
        };

        let result = self.counter.clear().await;
        section.release();

        match result {
            Ok(()) => {
                info!(
                    cache_key = %self.config.cache_key,
                    durable_key = %self.config.durable_key,
                    "counter state cleared"
                );
                true
            }
            Err(e) => {
                warn!(error = %e, "counter reset failed");
                false
            }
        }
    }
}
