//! Recurring reconciliation.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;

use crate::reconciler::Reconciler;

/// Run [`Reconciler::repair_all`] every `period` until `cancel` fires.
///
/// The first run happens one full period after spawning. A failed run is
/// logged and not retried; the next tick starts a fresh run. Ticks missed
/// while a run is in progress are skipped, never queued.
pub fn spawn_reconcile_loop(reconciler: Reconciler, period: Duration, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = reconciler.repair_all().await {
                        error!(error = %e, "scheduled reconciliation failed");
                    }
                }
                _ = cancel.cancelled() => {
                    debug!("reconcile loop shutting down");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::SequencerConfig;
    use crate::inmemory::MemoryCache;
    use crate::inmemory::MemoryDurableStore;
    use crate::inmemory::MemoryTable;
    use crate::lock::LocalLockCoordinator;
    use crate::traits::Collaborators;
    use crate::types::CellValue;

    #[tokio::test(start_paused = true)]
    async fn test_loop_repairs_on_tick_and_stops_on_cancel() {
        let table = MemoryTable::new(&["id"]);
        table.append_row(vec![CellValue::Integer(9)]).await;
        let deps = Collaborators::new(table.clone(), MemoryCache::new(), MemoryDurableStore::new(), LocalLockCoordinator::new());
        let config = SequencerConfig {
            batch_pause_ms: 0,
            ..Default::default()
        };
        let reconciler = Reconciler::new(deps, Arc::new(config));

        let cancel = CancellationToken::new();
        let handle = spawn_reconcile_loop(reconciler, Duration::from_secs(3600), cancel.clone());

        tokio::time::sleep(Duration::from_secs(3601)).await;
        assert_eq!(table.column_values(0).await, vec![CellValue::Integer(1)]);

        cancel.cancel();
        handle.await.unwrap();
    }
}
