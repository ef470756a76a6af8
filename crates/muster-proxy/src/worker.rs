//! The proxy worker table and the provider interface the manager uses to
//! reconcile registry nodes with live workers.
//!
//! Worker slots are indexed by node-table slot id, so a registry node and
//! its proxy worker always share an id. The `BalancerHandler` trait keeps
//! this seam explicit: command processors only see the interface, and
//! tests substitute an in-memory double.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use tracing::debug;

use muster_registry::{BalancerInfo, NodeMess, WorkerStats};

use crate::probe::probe_endpoint;

/// Future type used for the async probe methods of [`BalancerHandler`].
pub type BoxFuture<T> = std::pin::Pin<Box<dyn std::future::Future<Output = T> + Send>>;

/// A worker slot in the proxy's routing plane.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ProxyWorker {
    /// Node-table slot id this worker is bound to.
    pub id: usize,
    pub balancer: String,
    pub scheme: String,
    pub host: String,
    pub port: String,
    pub route: String,
    pub usable: bool,
    /// Load factor reported by the node; -1 broken, 0 standby.
    pub load: i32,
    pub stats: WorkerStats,
}

impl ProxyWorker {
    fn matches(&self, balancer: &str, scheme: &str, host: &str, port: &str) -> bool {
        self.balancer == balancer && self.scheme == scheme && self.host == host && self.port == port
    }
}

/// Provider interface between the manager and the proxy routing plane.
pub trait BalancerHandler: Send + Sync {
    /// Locate an existing worker for the tuple; returns the worker and
    /// its node-slot id.
    fn proxy_node_getid(
        &self,
        balancer: &str,
        scheme: &str,
        host: &str,
        port: &str,
    ) -> Option<(ProxyWorker, usize)>;

    /// Allocate a free slot index, honouring the node table's maximum.
    fn proxy_node_get_free_id(&self, table_size: usize) -> Option<usize>;

    /// Rewrite a worker's scheme/host/port/route in place so it matches
    /// the re-registered node.
    fn reenable_proxy_worker(&self, id: usize, node: &NodeMess);

    /// Probe the node bound to slot `id`, recording its load factor.
    /// A load of -2 probes without touching the stored factor.
    fn proxy_node_isup(&self, id: usize, load: i32) -> BoxFuture<bool>;

    /// Probe an arbitrary endpoint.
    fn proxy_host_isup(&self, scheme: String, host: String, port: String) -> BoxFuture<bool>;

    /// Snapshot of the worker bound to a node slot, for reports.
    fn proxy_worker(&self, id: usize) -> Option<ProxyWorker>;

    /// Push freshly registered worker parameters into the routing plane.
    /// The default is a no-op for planes that rebuild off the version
    /// counter instead.
    fn manage_worker(&self, _id: usize, _node: &NodeMess, _balancer: &BalancerInfo) {}
}

/// In-process worker table with TCP/HTTP probes.
#[derive(Clone)]
pub struct ProxyWorkerTable {
    slots: Arc<RwLock<Vec<Option<ProxyWorker>>>>,
    probe_timeout: Duration,
}

impl ProxyWorkerTable {
    pub fn new(table_size: usize) -> Self {
        Self {
            slots: Arc::new(RwLock::new(vec![None; table_size])),
            probe_timeout: Duration::from_secs(2),
        }
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Create or update the worker bound to a node slot.
    pub fn upsert_worker(&self, id: usize, node: &NodeMess) {
        let mut slots = self.slots.write().expect("worker table lock");
        if id >= slots.len() {
            return;
        }
        let stats = slots[id].as_ref().map(|w| w.stats).unwrap_or_default();
        slots[id] = Some(ProxyWorker {
            id,
            balancer: node.balancer.clone(),
            scheme: node.scheme.clone(),
            host: node.host.clone(),
            port: node.port.clone(),
            route: node.jvm_route.clone(),
            usable: true,
            load: 0,
            stats,
        });
        debug!(id, route = %node.jvm_route, "worker upserted");
    }

    pub fn remove_worker(&self, id: usize) {
        let mut slots = self.slots.write().expect("worker table lock");
        if let Some(slot) = slots.get_mut(id) {
            *slot = None;
        }
    }

    pub fn get_worker(&self, id: usize) -> Option<ProxyWorker> {
        let slots = self.slots.read().expect("worker table lock");
        slots.get(id).and_then(|s| s.clone())
    }

    /// Worker stats for a node slot, zeros when the worker is absent.
    pub fn worker_stats(&self, id: usize) -> WorkerStats {
        self.get_worker(id).map(|w| w.stats).unwrap_or_default()
    }

    pub fn list_workers(&self) -> Vec<ProxyWorker> {
        let slots = self.slots.read().expect("worker table lock");
        slots.iter().flatten().cloned().collect()
    }
}

impl BalancerHandler for ProxyWorkerTable {
    fn proxy_node_getid(
        &self,
        balancer: &str,
        scheme: &str,
        host: &str,
        port: &str,
    ) -> Option<(ProxyWorker, usize)> {
        let slots = self.slots.read().expect("worker table lock");
        slots
            .iter()
            .flatten()
            .find(|w| w.matches(balancer, scheme, host, port))
            .map(|w| (w.clone(), w.id))
    }

    fn proxy_node_get_free_id(&self, table_size: usize) -> Option<usize> {
        let slots = self.slots.read().expect("worker table lock");
        slots
            .iter()
            .take(table_size)
            .position(|s| s.is_none())
    }

    fn reenable_proxy_worker(&self, id: usize, node: &NodeMess) {
        let mut slots = self.slots.write().expect("worker table lock");
        if let Some(Some(worker)) = slots.get_mut(id) {
            worker.scheme = node.scheme.clone();
            worker.host = node.host.clone();
            worker.port = node.port.clone();
            worker.route = node.jvm_route.clone();
            worker.usable = true;
            debug!(id, route = %node.jvm_route, "worker re-enabled");
        }
    }

    fn proxy_node_isup(&self, id: usize, load: i32) -> BoxFuture<bool> {
        let table = self.clone();
        Box::pin(async move {
            let Some(worker) = table.get_worker(id) else {
                return false;
            };
            let up = if load == -1 {
                // The node reported itself broken; skip the probe.
                false
            } else {
                probe_endpoint(&worker.scheme, &worker.host, &worker.port, table.probe_timeout)
                    .await
                    .is_up()
            };
            let mut slots = table.slots.write().expect("worker table lock");
            if let Some(Some(worker)) = slots.get_mut(id) {
                worker.usable = up;
                if load != -2 {
                    worker.load = load;
                    worker.stats.lb_factor = load;
                }
            }
            up
        })
    }

    fn proxy_host_isup(&self, scheme: String, host: String, port: String) -> BoxFuture<bool> {
        let timeout = self.probe_timeout;
        Box::pin(async move { probe_endpoint(&scheme, &host, &port, timeout).await.is_up() })
    }

    fn proxy_worker(&self, id: usize) -> Option<ProxyWorker> {
        self.get_worker(id)
    }

    fn manage_worker(&self, id: usize, node: &NodeMess, _balancer: &BalancerInfo) {
        self.upsert_worker(id, node);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(route: &str, host: &str, port: &str) -> NodeMess {
        NodeMess {
            jvm_route: route.to_string(),
            host: host.to_string(),
            port: port.to_string(),
            ..NodeMess::default()
        }
    }

    #[test]
    fn getid_finds_worker_by_tuple() {
        let table = ProxyWorkerTable::new(4);
        table.upsert_worker(2, &node("node1", "10.0.0.1", "8009"));

        let (worker, id) = table
            .proxy_node_getid("mycluster", "ajp", "10.0.0.1", "8009")
            .unwrap();
        assert_eq!(id, 2);
        assert_eq!(worker.route, "node1");

        assert!(table
            .proxy_node_getid("mycluster", "ajp", "10.0.0.2", "8009")
            .is_none());
    }

    #[test]
    fn free_id_respects_table_size() {
        let table = ProxyWorkerTable::new(4);
        table.upsert_worker(0, &node("node1", "10.0.0.1", "8009"));

        assert_eq!(table.proxy_node_get_free_id(4), Some(1));
        // A bound below the occupied prefix yields nothing.
        assert_eq!(table.proxy_node_get_free_id(1), None);
    }

    #[test]
    fn upsert_preserves_stats_reenable_rewrites_endpoint() {
        let table = ProxyWorkerTable::new(2);
        table.upsert_worker(0, &node("node1", "10.0.0.1", "8009"));
        {
            let mut slots = table.slots.write().unwrap();
            slots[0].as_mut().unwrap().stats.elected = 9;
        }

        // Re-registering the same slot keeps the counters.
        table.upsert_worker(0, &node("node2", "10.0.0.1", "8009"));
        assert_eq!(table.worker_stats(0).elected, 9);

        table.reenable_proxy_worker(0, &node("node3", "10.0.0.9", "8010"));
        let worker = table.get_worker(0).unwrap();
        assert_eq!(worker.route, "node3");
        assert_eq!(worker.host, "10.0.0.9");
        assert_eq!(worker.port, "8010");
    }

    #[tokio::test]
    async fn isup_broken_load_skips_probe() {
        let table = ProxyWorkerTable::new(1);
        table.upsert_worker(0, &node("node1", "127.0.0.1", "1"));

        assert!(!table.proxy_node_isup(0, -1).await);
        let worker = table.get_worker(0).unwrap();
        assert_eq!(worker.load, -1);
        assert!(!worker.usable);
    }

    #[tokio::test]
    async fn isup_unknown_slot_is_down() {
        let table = ProxyWorkerTable::new(1);
        assert!(!table.proxy_node_isup(0, 50).await);
    }

    #[tokio::test]
    async fn isup_probes_listening_endpoint() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port().to_string();

        let table = ProxyWorkerTable::new(1);
        table.upsert_worker(0, &node("node1", "127.0.0.1", &port));

        assert!(table.proxy_node_isup(0, 77).await);
        let worker = table.get_worker(0).unwrap();
        assert_eq!(worker.load, 77);
        assert!(worker.usable);
    }
}
