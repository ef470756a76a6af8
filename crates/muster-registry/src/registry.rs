//! Registry facade over the shared tables.
//!
//! Two locks guard the tables, in a fixed order:
//!
//! - the **node lock** covers nodes, hosts, contexts, balancers, domains
//!   and session ids; every multi-table mutation holds it end to end, so
//!   readers under it see a consistent cross-table snapshot;
//! - the **context lock** covers the context table alone, for updates made
//!   while the node lock is not held (the watchdog's request counters).
//!
//! `lock_nodes` acquires node then context, `lock_contexts` only the
//! latter; the reverse order never occurs, so no deadlock cycle is
//! possible.
//!
//! The version counter is bumped before the node lock is released on any
//! mutation of the node/host/context graph; a reader that observed version
//! V has observed every mutation committed up to V.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, warn};

use crate::error::RegistryResult;
use crate::table::SlotTable;
use crate::types::*;

/// Configured capacities for the six tables.
#[derive(Debug, Clone, Copy)]
pub struct TableSizes {
    pub nodes: usize,
    pub hosts: usize,
    pub contexts: usize,
    pub balancers: usize,
    pub sessions: usize,
    pub domains: usize,
}

impl Default for TableSizes {
    fn default() -> Self {
        Self {
            nodes: 20,
            hosts: 20,
            contexts: 100,
            balancers: 20,
            // Session tracking is off by default: it has a
            // performance and security impact.
            sessions: 0,
            domains: 20,
        }
    }
}

impl TableSizes {
    /// Apply the startup sanity clamps: at least one host per node and
    /// one context per host.
    pub fn clamped(mut self) -> Self {
        if self.hosts < self.nodes {
            warn!(
                nodes = self.nodes,
                hosts = self.hosts,
                "max hosts raised to max nodes"
            );
            self.hosts = self.nodes;
        }
        if self.contexts < self.hosts {
            warn!(
                hosts = self.hosts,
                contexts = self.contexts,
                "max contexts raised to max hosts"
            );
            self.contexts = self.hosts;
        }
        self
    }
}

/// Tables guarded by the node lock (contexts have their own mutex).
pub(crate) struct GraphTables {
    pub nodes: SlotTable<NodeInfo>,
    pub hosts: SlotTable<HostInfo>,
    pub balancers: SlotTable<BalancerInfo>,
    pub sessions: SlotTable<SessionInfo>,
    pub domains: SlotTable<DomainInfo>,
}

struct Inner {
    graph: Mutex<GraphTables>,
    contexts: Mutex<SlotTable<ContextInfo>>,
    version: AtomicU64,
}

/// Process-wide registry handle, cheap to clone.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<Inner>,
}

impl Registry {
    /// Preallocate all tables with the given (clamped) capacities.
    pub fn new(sizes: TableSizes) -> Self {
        let sizes = sizes.clamped();
        let inner = Inner {
            graph: Mutex::new(GraphTables {
                nodes: SlotTable::new("node", sizes.nodes),
                hosts: SlotTable::new("host", sizes.hosts),
                balancers: SlotTable::new("balancer", sizes.balancers),
                sessions: SlotTable::new("sessionid", sizes.sessions),
                domains: SlotTable::new("domain", sizes.domains),
            }),
            contexts: Mutex::new(SlotTable::new("context", sizes.contexts)),
            version: AtomicU64::new(0),
        };
        debug!(
            nodes = sizes.nodes,
            hosts = sizes.hosts,
            contexts = sizes.contexts,
            "registry tables allocated"
        );
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Acquire the node lock (and, per the lock order, the context lock).
    pub fn lock_nodes(&self) -> NodesGuard<'_> {
        let graph = self.inner.graph.lock().expect("node lock poisoned");
        let contexts = self.inner.contexts.lock().expect("context lock poisoned");
        NodesGuard {
            graph,
            contexts,
            version: &self.inner.version,
        }
    }

    /// Acquire only the context lock, for lone context updates.
    pub fn lock_contexts(&self) -> ContextsGuard<'_> {
        ContextsGuard {
            contexts: self.inner.contexts.lock().expect("context lock poisoned"),
        }
    }

    /// Current value of the version counter.
    pub fn version(&self) -> u64 {
        self.inner.version.load(Ordering::SeqCst)
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Exclusive access to the full table graph.
pub struct NodesGuard<'a> {
    pub(crate) graph: MutexGuard<'a, GraphTables>,
    pub(crate) contexts: MutexGuard<'a, SlotTable<ContextInfo>>,
    version: &'a AtomicU64,
}

impl NodesGuard<'_> {
    /// Bump the version counter; called before the guard is dropped on
    /// any node/host/context graph mutation.
    pub fn inc_version(&self) {
        self.version.fetch_add(1, Ordering::SeqCst);
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    // ── Nodes ──────────────────────────────────────────────────────

    /// Insert (`id == None`) or update a node row. `clean` zeroes the
    /// colocated worker stats for a brand-new node; a reused slot keeps
    /// the stats spliced in by the caller.
    pub fn insert_update_node(
        &mut self,
        node: &NodeInfo,
        id: Option<usize>,
        clean: bool,
    ) -> RegistryResult<usize> {
        let mut row = node.clone();
        if clean {
            row.stats = WorkerStats::default();
        }
        row.update_time = epoch_secs();
        let id = self.graph.nodes.insert_update(id, row)?;
        if let Some(row) = self.graph.nodes.get_mut(id) {
            row.mess.id = Some(id);
        }
        Ok(id)
    }

    pub fn get_node(&self, id: usize) -> Option<NodeInfo> {
        self.graph.nodes.get(id).cloned()
    }

    /// Look a node up by its routing token.
    pub fn find_node(&self, route: &str) -> Option<(usize, NodeInfo)> {
        self.graph
            .nodes
            .find(|n| n.mess.jvm_route == route)
            .map(|(id, n)| (id, n.clone()))
    }

    /// Look a node up by endpoint, for tombstone slot reuse.
    pub fn find_node_by_host_port(&self, host: &str, port: &str) -> Option<(usize, NodeInfo)> {
        self.graph
            .nodes
            .find(|n| n.mess.host == host && n.mess.port == port)
            .map(|(id, n)| (id, n.clone()))
    }

    /// Whether a different live node already owns the same worker tuple.
    /// Tombstoned rows whose cascade has run do not count.
    pub fn same_worker_exists(&self, mess: &NodeMess) -> Option<String> {
        for (_, other) in self.graph.nodes.iter() {
            if !other.mess.is_same_node(mess) {
                continue;
            }
            if other.mess.jvm_route == mess.jvm_route {
                return None;
            }
            if other.mess.removed && other.mess.jvm_route == REMOVED_ROUTE {
                return None;
            }
            return Some(other.mess.jvm_route.clone());
        }
        None
    }

    /// Tombstone a node: overwrite the route with the sentinel, set the
    /// removed flag and remember its LB group for failover scoping.
    pub fn mark_node_removed(&mut self, id: usize) {
        let record = match self.graph.nodes.get_mut(id) {
            Some(node) => {
                let domain_record = (!node.mess.domain.is_empty()).then(|| DomainInfo {
                    domain: node.mess.domain.clone(),
                    balancer: node.mess.balancer.clone(),
                    jvm_route: node.mess.jvm_route.clone(),
                });
                node.mess.jvm_route = REMOVED_ROUTE.to_string();
                node.mess.removed = true;
                node.mess.num_remove_check = 0;
                node.update_time = epoch_secs();
                domain_record
            }
            None => return,
        };
        if let Some(info) = record {
            debug!(domain = %info.domain, route = %info.jvm_route, "recording LB group of removed node");
            let _ = self.insert_update_domain(&info);
        }
    }

    /// Bring a tombstoned slot back to life under a new routing token.
    pub fn rehydrate_node(&mut self, id: usize, route: &str) {
        if let Some(node) = self.graph.nodes.get_mut(id) {
            node.mess.jvm_route = route.to_string();
            node.mess.removed = false;
            node.mess.num_remove_check = 0;
        }
    }

    /// Free a node slot outright.
    pub fn remove_node(&mut self, id: usize) -> Option<NodeInfo> {
        self.graph.nodes.remove(id)
    }

    /// Cascade: drop every host and context row owned by the node.
    pub fn remove_host_context(&mut self, node: usize) {
        for id in self.graph.hosts.ids_used() {
            if self.graph.hosts.get(id).is_some_and(|h| h.node == node) {
                self.graph.hosts.remove(id);
            }
        }
        for id in self.contexts.ids_used() {
            if self.contexts.get(id).is_some_and(|c| c.node == node) {
                self.contexts.remove(id);
            }
        }
    }

    pub fn list_nodes(&self) -> Vec<(usize, NodeInfo)> {
        self.graph.nodes.iter().map(|(i, n)| (i, n.clone())).collect()
    }

    pub fn node_ids_used(&self) -> Vec<usize> {
        self.graph.nodes.ids_used()
    }

    pub fn max_size_node(&self) -> usize {
        self.graph.nodes.max_size()
    }

    // ── Balancers ──────────────────────────────────────────────────

    pub fn insert_update_balancer(&mut self, bal: &BalancerInfo) -> RegistryResult<usize> {
        let existing = self
            .graph
            .balancers
            .find(|b| b.balancer == bal.balancer)
            .map(|(id, _)| id);
        self.graph.balancers.insert_update(existing, bal.clone())
    }

    pub fn find_balancer(&self, name: &str) -> Option<(usize, BalancerInfo)> {
        self.graph
            .balancers
            .find(|b| b.balancer == name)
            .map(|(id, b)| (id, b.clone()))
    }

    pub fn list_balancers(&self) -> Vec<(usize, BalancerInfo)> {
        self.graph
            .balancers
            .iter()
            .map(|(i, b)| (i, b.clone()))
            .collect()
    }

    // ── Hosts ──────────────────────────────────────────────────────

    pub fn insert_update_host(&mut self, host: &HostInfo) -> RegistryResult<usize> {
        let existing = self
            .graph
            .hosts
            .find(|h| h.node == host.node && h.vhost == host.vhost && h.alias == host.alias)
            .map(|(id, _)| id);
        self.graph.hosts.insert_update(existing, host.clone())
    }

    /// Host row for (node, alias); an empty alias matches any row of the
    /// node, mirroring the wildcard lookup of the protocol.
    pub fn read_host(&self, node: usize, alias: &str) -> Option<(usize, HostInfo)> {
        self.graph
            .hosts
            .find(|h| h.node == node && (alias.is_empty() || h.alias == alias))
            .map(|(id, h)| (id, h.clone()))
    }

    pub fn remove_host(&mut self, id: usize) -> Option<HostInfo> {
        self.graph.hosts.remove(id)
    }

    pub fn list_hosts(&self) -> Vec<(usize, HostInfo)> {
        self.graph.hosts.iter().map(|(i, h)| (i, h.clone())).collect()
    }

    pub fn max_size_host(&self) -> usize {
        self.graph.hosts.max_size()
    }

    /// Highest vhost id in use on the node; dense ids start at 1, so the
    /// next free one is this plus one.
    pub fn max_vhost(&self, node: usize) -> u32 {
        self.graph
            .hosts
            .iter()
            .filter(|(_, h)| h.node == node)
            .map(|(_, h)| h.vhost)
            .max()
            .unwrap_or(0)
    }

    // ── Contexts ───────────────────────────────────────────────────

    pub fn insert_update_context(&mut self, context: &ContextInfo) -> RegistryResult<usize> {
        let existing = self
            .contexts
            .find(|c| c.node == context.node && c.vhost == context.vhost && c.path == context.path)
            .map(|(id, _)| id);
        // An update keeps the live request counter.
        let mut row = context.clone();
        if let Some(id) = existing {
            if let Some(old) = self.contexts.get(id) {
                row.nbrequests = old.nbrequests;
            }
        }
        self.contexts.insert_update(existing, row)
    }

    pub fn read_context(&self, node: usize, vhost: u32, path: &str) -> Option<(usize, ContextInfo)> {
        self.contexts
            .find(|c| c.node == node && c.vhost == vhost && c.path == path)
            .map(|(id, c)| (id, c.clone()))
    }

    pub fn remove_context(&mut self, id: usize) -> Option<ContextInfo> {
        self.contexts.remove(id)
    }

    pub fn list_contexts(&self) -> Vec<(usize, ContextInfo)> {
        self.contexts.iter().map(|(i, c)| (i, c.clone())).collect()
    }

    pub fn max_size_context(&self) -> usize {
        self.contexts.max_size()
    }

    // ── Session ids ────────────────────────────────────────────────

    pub fn insert_update_sessionid(&mut self, session: &SessionInfo) -> RegistryResult<usize> {
        let existing = self
            .graph
            .sessions
            .find(|s| s.sessionid == session.sessionid)
            .map(|(id, _)| id);
        self.graph.sessions.insert_update(existing, session.clone())
    }

    pub fn remove_sessionid(&mut self, sessionid: &str) -> Option<SessionInfo> {
        let id = self
            .graph
            .sessions
            .find(|s| s.sessionid == sessionid)
            .map(|(id, _)| id)?;
        self.graph.sessions.remove(id)
    }

    pub fn list_sessionids(&self) -> Vec<(usize, SessionInfo)> {
        self.graph
            .sessions
            .iter()
            .map(|(i, s)| (i, s.clone()))
            .collect()
    }

    pub fn max_size_sessionid(&self) -> usize {
        self.graph.sessions.max_size()
    }

    /// Session ids observed on the given route.
    pub fn count_sessionids(&self, route: &str) -> usize {
        self.graph
            .sessions
            .iter()
            .filter(|(_, s)| s.jvm_route == route)
            .count()
    }

    // ── Domains ────────────────────────────────────────────────────

    pub fn insert_update_domain(&mut self, domain: &DomainInfo) -> RegistryResult<usize> {
        let existing = self
            .graph
            .domains
            .find(|d| {
                d.domain == domain.domain
                    && d.balancer == domain.balancer
                    && d.jvm_route == domain.jvm_route
            })
            .map(|(id, _)| id);
        self.graph.domains.insert_update(existing, domain.clone())
    }

    pub fn find_domain(&self, route: &str, balancer: &str) -> Option<(usize, DomainInfo)> {
        self.graph
            .domains
            .find(|d| d.jvm_route == route && d.balancer == balancer)
            .map(|(id, d)| (id, d.clone()))
    }

    pub fn remove_domain(&mut self, id: usize) -> Option<DomainInfo> {
        self.graph.domains.remove(id)
    }

    pub fn list_domains(&self) -> Vec<(usize, DomainInfo)> {
        self.graph
            .domains
            .iter()
            .map(|(i, d)| (i, d.clone()))
            .collect()
    }

    // ── Reaping ────────────────────────────────────────────────────

    /// One watchdog tick over the tombstones: a removed node with no
    /// dependent host or context rows left has its remove-check counter
    /// advanced, and is freed once the counter passes the threshold.
    /// Returns the freed slot ids.
    pub fn reap_removed_nodes(&mut self) -> Vec<usize> {
        let mut freed = Vec::new();
        for id in self.graph.nodes.ids_used() {
            let Some(node) = self.graph.nodes.get(id) else {
                continue;
            };
            if !node.mess.removed {
                continue;
            }
            let has_dependents = self.graph.hosts.iter().any(|(_, h)| h.node == id)
                || self.contexts.iter().any(|(_, c)| c.node == id);
            if has_dependents {
                continue;
            }
            let check = {
                let node = self.graph.nodes.get_mut(id).expect("tombstone present");
                node.mess.num_remove_check += 1;
                node.mess.num_remove_check
            };
            if check > REMOVE_CHECK_THRESHOLD {
                self.graph.nodes.remove(id);
                freed.push(id);
            }
        }
        if !freed.is_empty() {
            debug!(?freed, "reaped tombstoned node slots");
            self.inc_version();
        }
        freed
    }
}

/// Exclusive access to the context table alone.
pub struct ContextsGuard<'a> {
    contexts: MutexGuard<'a, SlotTable<ContextInfo>>,
}

impl ContextsGuard<'_> {
    pub fn get(&self, id: usize) -> Option<ContextInfo> {
        self.contexts.get(id).cloned()
    }

    pub fn ids_used(&self) -> Vec<usize> {
        self.contexts.ids_used()
    }

    pub fn max_size(&self) -> usize {
        self.contexts.max_size()
    }

    /// Update the live request counter for a context.
    pub fn set_nbrequests(&mut self, id: usize, nbrequests: u64) {
        if let Some(context) = self.contexts.get_mut(id) {
            context.nbrequests = nbrequests;
        }
    }
}
