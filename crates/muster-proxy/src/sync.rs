//! Worker-table synchronization against the registry version counter.
//!
//! Readers never rebuild eagerly: they compare the registry's version
//! counter with the last value they acted on, and rebuild the worker
//! table only when the counter has moved.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, info};

use muster_registry::Registry;

use crate::worker::ProxyWorkerTable;

/// Tracks the last registry version applied to the worker table.
#[derive(Default)]
pub struct RegistrySync {
    last_applied: AtomicU64,
}

/// Rebuild statistics.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub workers_upserted: u32,
    pub workers_removed: u32,
}

impl RegistrySync {
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry version the nodes were last synced at.
    pub fn last_applied(&self) -> u64 {
        self.last_applied.load(Ordering::SeqCst)
    }

    /// Returns the new version when the registry has moved past the last
    /// applied one, `None` otherwise.
    pub fn needs_update(&self, registry: &Registry) -> Option<u64> {
        let current = registry.version();
        (current != self.last_applied()).then_some(current)
    }

    /// Full rebuild: bind a worker to every live node slot and drop
    /// workers whose slots are gone or tombstoned.
    pub fn sync(&self, registry: &Registry, workers: &ProxyWorkerTable) -> SyncStats {
        let mut stats = SyncStats::default();
        let (nodes, version) = {
            let guard = registry.lock_nodes();
            (guard.list_nodes(), guard.version())
        };

        for (id, node) in &nodes {
            if node.mess.removed {
                continue;
            }
            workers.upsert_worker(*id, &node.mess);
            stats.workers_upserted += 1;
        }
        for worker in workers.list_workers() {
            let still_live = nodes
                .iter()
                .any(|(id, node)| *id == worker.id && !node.mess.removed);
            if !still_live {
                workers.remove_worker(worker.id);
                stats.workers_removed += 1;
            }
        }

        self.last_applied.store(version, Ordering::SeqCst);
        info!(
            upserted = stats.workers_upserted,
            removed = stats.workers_removed,
            version,
            "worker table synced"
        );
        stats
    }

    /// Sync only when the version counter moved since the last pass.
    pub fn sync_if_stale(&self, registry: &Registry, workers: &ProxyWorkerTable) -> Option<SyncStats> {
        let version = self.needs_update(registry)?;
        debug!(version, "registry version moved, rebuilding workers");
        Some(self.sync(registry, workers))
    }
}
