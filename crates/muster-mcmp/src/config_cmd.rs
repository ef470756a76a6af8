//! The CONFIG transaction: register or re-register a node, its balancer,
//! and optionally its initial aliases and contexts.

use tracing::{debug, error, warn};

use muster_proxy::BalancerHandler;
use muster_registry::{
    BalancerInfo, ContextInfo, ContextStatus, HostInfo, NodeInfo, NodeMess, NodesGuard,
    RegistryResult, ALIAS_MAX, BALANCER_MAX, CONTEXT_MAX, COOKIE_MAX, DOMAIN_MAX, HOST_MAX,
    JVMROUTE_MAX, PATH_KEY_MAX, PORT_MAX, REMOVED_ROUTE, SCHEME_MAX,
};

use crate::error::McmpError;
use crate::parser::{key_is, Pairs};
use crate::ManagerState;

/// One `Alias` group and the `Context` group paired with it.
struct VhostGroup {
    aliases: String,
    contexts: Option<String>,
}

/// Lowercase a balancer name, logging when the sender used upper case.
fn normalize_balancer_name(name: &str) -> String {
    if name.bytes().any(|b| b.is_ascii_uppercase()) {
        let lowered = name.to_ascii_lowercase();
        warn!(
            balancer = %lowered,
            "balancer name contained an upper case character, using the lowercased form"
        );
        lowered
    } else {
        name.to_string()
    }
}

/// Remove a `%zone` suffix from a bracketed IPv6 literal.
fn strip_ipv6_zone(host: &str) -> String {
    if !host.starts_with('[') {
        return host.to_string();
    }
    match (host.find('%'), host.rfind(']')) {
        (Some(pct), Some(end)) if pct < end => format!("{}{}", &host[..pct], &host[end..]),
        _ => host.to_string(),
    }
}

fn parse_u64(val: &str) -> u64 {
    val.parse().unwrap_or(0)
}

/// Insert every alias of a comma list for (node, vhost). Aliases are
/// lowercased on entry: DNS names are case-insensitive.
pub(crate) fn insert_update_aliases(
    guard: &mut NodesGuard<'_>,
    list: &str,
    node: usize,
    vhost: u32,
) -> RegistryResult<()> {
    for alias in list.split(',') {
        guard.insert_update_host(&HostInfo {
            node,
            vhost,
            alias: alias.to_ascii_lowercase(),
        })?;
    }
    Ok(())
}

/// Install every context of a comma list for (node, vhost) in the given
/// state, or remove them when `status` is `None`.
pub(crate) fn insert_update_contexts(
    guard: &mut NodesGuard<'_>,
    list: &str,
    node: usize,
    vhost: u32,
    status: Option<ContextStatus>,
) -> RegistryResult<()> {
    for path in list.split(',') {
        match status {
            Some(status) => {
                guard.insert_update_context(&ContextInfo {
                    node,
                    vhost,
                    path: path.to_string(),
                    status,
                    nbrequests: 0,
                })?;
            }
            None => {
                // Removal of an absent row is still a success.
                if let Some((id, _)) = guard.read_context(node, vhost, path) {
                    guard.remove_context(id);
                }
            }
        }
    }
    Ok(())
}

/// Process a CONFIG message.
pub fn process_config(state: &ManagerState, pairs: &Pairs) -> Result<(), McmpError> {
    let settings = &state.settings;

    let mut mess = NodeMess::default();
    let mut balancer = BalancerInfo::default();
    if let Some(name) = &settings.balancer_name {
        let name = normalize_balancer_name(name);
        mess.balancer = name.clone();
        balancer.balancer = name;
    }

    let mut vhosts: Vec<VhostGroup> = Vec::new();

    for (key, val) in pairs {
        // Balancer part.
        if key_is(key, "Balancer") {
            if val.len() >= BALANCER_MAX {
                return Err(McmpError::balancer_too_big());
            }
            let name = normalize_balancer_name(val);
            mess.balancer = name.clone();
            balancer.balancer = name;
        } else if key_is(key, "StickySession") {
            if val.eq_ignore_ascii_case("no") {
                balancer.sticky_session = false;
            }
        } else if key_is(key, "StickySessionCookie") {
            if val.len() >= COOKIE_MAX {
                return Err(McmpError::field_too_big());
            }
            balancer.sticky_session_cookie = val.clone();
        } else if key_is(key, "StickySessionPath") {
            if val.len() >= PATH_KEY_MAX {
                return Err(McmpError::field_too_big());
            }
            balancer.sticky_session_path = val.clone();
        } else if key_is(key, "StickySessionRemove") {
            if val.eq_ignore_ascii_case("yes") {
                balancer.sticky_session_remove = true;
            }
        } else if key_is(key, "StickySessionForce") {
            // The sender assumes the default is yes and only ever sends no.
            if val.eq_ignore_ascii_case("no") {
                balancer.sticky_session_force = false;
            }
        } else if key_is(key, "WaitWorker") {
            balancer.timeout_secs = parse_u64(val);
        } else if key_is(key, "Maxattempts") {
            balancer.max_attempts = val.parse().unwrap_or(0);
        }
        // Node part.
        else if key_is(key, "JVMRoute") {
            if val.len() >= JVMROUTE_MAX {
                return Err(McmpError::route_too_big());
            }
            mess.jvm_route = val.clone();
        } else if key_is(key, "Domain") {
            if val.len() >= DOMAIN_MAX {
                return Err(McmpError::domain_too_big());
            }
            mess.domain = val.clone();
        } else if key_is(key, "Host") {
            if val.len() >= HOST_MAX {
                return Err(McmpError::host_too_big());
            }
            mess.host = strip_ipv6_zone(val);
        } else if key_is(key, "Port") {
            if val.len() >= PORT_MAX {
                return Err(McmpError::port_too_big());
            }
            mess.port = val.clone();
        } else if key_is(key, "Type") {
            if val.len() >= SCHEME_MAX {
                return Err(McmpError::type_too_big());
            }
            mess.scheme = val.clone();
        } else if key_is(key, "Reversed") {
            if val.eq_ignore_ascii_case("yes") {
                mess.reversed = true;
            }
        } else if key_is(key, "flushpackets") {
            if val.eq_ignore_ascii_case("on") {
                mess.flush_packets = muster_registry::FlushPackets::On;
            } else if val.eq_ignore_ascii_case("auto") {
                mess.flush_packets = muster_registry::FlushPackets::Auto;
            }
        } else if key_is(key, "flushwait") {
            mess.flush_wait_ms = parse_u64(val);
        } else if key_is(key, "ping") {
            mess.ping_secs = parse_u64(val);
        } else if key_is(key, "smax") {
            mess.smax = val.parse().unwrap_or(0);
        } else if key_is(key, "ttl") {
            mess.ttl_secs = parse_u64(val);
        } else if key_is(key, "Timeout") {
            mess.timeout_secs = parse_u64(val);
        }
        // Alias / Context groups.
        else if key_is(key, "Alias") {
            if val.len() >= ALIAS_MAX {
                return Err(McmpError::field_too_big());
            }
            if vhosts.last().is_some_and(|g| g.contexts.is_none()) {
                return Err(McmpError::alias_without_context());
            }
            vhosts.push(VhostGroup {
                aliases: val.clone(),
                contexts: None,
            });
        } else if key_is(key, "Context") {
            if val.len() >= CONTEXT_MAX {
                return Err(McmpError::field_too_big());
            }
            match vhosts.last_mut() {
                None => return Err(McmpError::context_without_alias()),
                Some(group) if group.contexts.is_some() => {
                    return Err(McmpError::context_without_alias())
                }
                Some(group) => group.contexts = Some(val.clone()),
            }
        }
        // Unknown keys are ignored: CONFIG messages from newer senders
        // may carry fields this manager does not know.
    }

    if mess.jvm_route.is_empty() {
        return Err(McmpError::route_empty());
    }
    if vhosts.last().is_some_and(|g| g.contexts.is_none()) {
        return Err(McmpError::alias_without_context());
    }

    // Configuration-driven rewrites.
    if settings.enable_ws_tunnel && mess.scheme != "ajp" {
        if mess.scheme == "http" {
            mess.scheme = "ws".to_string();
        } else if mess.scheme == "https" {
            mess.scheme = "wss".to_string();
        }
        mess.upgrade = settings
            .ws_upgrade_header
            .clone()
            .unwrap_or_else(|| "websocket".to_string());
    }
    if mess.scheme == "ajp" {
        if let Some(secret) = &settings.ajp_secret {
            mess.ajp_secret = secret.clone();
        }
    } else if settings.response_field_size != 0 {
        mess.response_field_size = settings.response_field_size;
    }

    debug!(route = %mess.jvm_route, host = %mess.host, port = %mess.port, "processing CONFIG");

    let mut guard = state.registry.lock_nodes();

    if guard.insert_update_balancer(&balancer).is_err() {
        return Err(McmpError::balancer_upsert(&mess.jvm_route));
    }

    // A node re-registered with a different identity cannot be updated
    // in place: tombstone the old row and make the sender retry.
    let existing = guard.find_node(&mess.jvm_route);
    if let Some((eid, enode)) = &existing {
        if !enode.mess.is_same_node(&mess) {
            let err = McmpError::old_node(&enode.mess.jvm_route);
            error!(
                route = %enode.mess.jvm_route,
                id = eid,
                old_port = %enode.mess.port,
                new_port = %mess.port,
                "node already exists with a different identity, removing"
            );
            guard.mark_node_removed(*eid);
            guard.remove_host_context(*eid);
            guard.inc_version();
            return Err(err);
        }
    }

    if let Some(other) = guard.same_worker_exists(&mess) {
        warn!(route = %mess.jvm_route, existing = %other, "nodes correspond to the same worker");
        return Err(McmpError::same_worker());
    }

    let mut node_row = NodeInfo::new(mess.clone());
    let mut id: Option<usize> = None;
    let mut clean = true;
    let mut reused_slot: Option<usize> = None;

    match state
        .balancer
        .proxy_node_getid(&mess.balancer, &mess.scheme, &mess.host, &mess.port)
    {
        Some((worker, wid)) => {
            if existing.as_ref().is_some_and(|(eid, _)| *eid == wid) {
                debug!(id = wid, route = %mess.jvm_route, "worker exists and matches the node row");
            } else {
                warn!(id = wid, route = %mess.jvm_route, "worker exists but is bound to another node row");
                if existing.is_none() {
                    if let Some(row) = guard.get_node(wid) {
                        if row.mess.jvm_route != REMOVED_ROUTE
                            && !row.mess.jvm_route.is_empty()
                            && row.mess.jvm_route != mess.jvm_route
                        {
                            error!(
                                id = wid,
                                bound = %row.mess.jvm_route,
                                route = %mess.jvm_route,
                                "worker does not correspond to the registering node"
                            );
                            return Err(McmpError::same_worker());
                        }
                        // Remember the slot for rollback if the upsert fails.
                        reused_slot = Some(wid);
                    }
                }
                // Carry the live worker counters over into the row.
                clean = false;
                node_row.stats = worker.stats;
            }
            id = Some(wid);
        }
        None => {
            if let Some((hid, hnode)) = guard.find_node_by_host_port(&mess.host, &mess.port) {
                debug!(
                    id = hid,
                    bound = %hnode.mess.jvm_route,
                    route = %mess.jvm_route,
                    "endpoint already has a node slot"
                );
                if hnode.mess.jvm_route == REMOVED_ROUTE {
                    guard.rehydrate_node(hid, &mess.jvm_route);
                }
                id = Some(hid);
            } else {
                debug!(route = %mess.jvm_route, port = %mess.port, "new node");
            }
        }
    }

    if id.is_none() {
        id = state.balancer.proxy_node_get_free_id(guard.max_size_node());
        match id {
            Some(id) => {
                debug!(id, route = %mess.jvm_route, "allocated free worker slot")
            }
            None => debug!(route = %mess.jvm_route, "no free worker slot, node table may be full"),
        }
    }

    let id = match guard.insert_update_node(&node_row, id, clean) {
        Ok(id) => id,
        Err(err) => {
            debug!(error = %err, route = %mess.jvm_route, clean, "node upsert failed");
            if let Some(rid) = reused_slot {
                guard.mark_node_removed(rid);
            }
            return Err(McmpError::node_upsert(&mess.jvm_route));
        }
    };

    if !clean {
        // The worker survived a node identity change: rewrite its
        // endpoint and route in place.
        state.balancer.reenable_proxy_worker(id, &node_row.mess);
    }
    guard.inc_version();

    let mut vid: u32 = 1;
    for group in &vhosts {
        if insert_update_aliases(&mut guard, &group.aliases, id, vid).is_err() {
            return Err(McmpError::host_upsert(&mess.jvm_route));
        }
        let contexts = group.contexts.as_deref().unwrap_or("/");
        if insert_update_contexts(&mut guard, contexts, id, vid, Some(ContextStatus::Stopped))
            .is_err()
        {
            return Err(McmpError::context_upsert(&mess.jvm_route));
        }
        vid += 1;
    }
    drop(guard);

    // Hand the worker parameters to the routing plane.
    state.balancer.manage_worker(id, &node_row.mess, &balancer);
    debug!(id, route = %mess.jvm_route, "CONFIG done");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_pairs;
    use crate::ManagerSettings;
    use muster_proxy::{BalancerHandler, ProxyWorkerTable};
    use muster_registry::{Registry, TableSizes};
    use std::sync::Arc;

    fn state_with(sizes: TableSizes, settings: ManagerSettings) -> ManagerState {
        let registry = Registry::new(sizes);
        let workers = ProxyWorkerTable::new(sizes.nodes);
        ManagerState::new(registry, Arc::new(workers), settings)
    }

    fn test_state() -> ManagerState {
        state_with(TableSizes::default(), ManagerSettings::default())
    }

    fn config(state: &ManagerState, body: &str) -> Result<(), McmpError> {
        process_config(state, &parse_pairs(body).unwrap())
    }

    #[test]
    fn fresh_config_creates_node_host_and_context() {
        let state = test_state();
        let before = state.registry.version();
        config(
            &state,
            "JVMRoute=node1&Host=10.0.0.1&Port=8009&Type=ajp&Alias=example.com&Context=/app",
        )
        .unwrap();

        let guard = state.registry.lock_nodes();
        let (id, node) = guard.find_node("node1").unwrap();
        assert_eq!(node.mess.host, "10.0.0.1");
        assert_eq!(node.mess.port, "8009");
        assert_eq!(node.mess.scheme, "ajp");

        let (_, host) = guard.read_host(id, "example.com").unwrap();
        assert_eq!(host.vhost, 1);

        let (_, context) = guard.read_context(id, 1, "/app").unwrap();
        assert_eq!(context.status, ContextStatus::Stopped);

        assert!(guard.version() > before);
    }

    #[test]
    fn defaults_apply_when_fields_missing() {
        let state = test_state();
        config(&state, "JVMRoute=node1").unwrap();

        let guard = state.registry.lock_nodes();
        let (_, node) = guard.find_node("node1").unwrap();
        assert_eq!(node.mess.balancer, "mycluster");
        assert_eq!(node.mess.host, "localhost");
        assert_eq!(node.mess.port, "8009");
        assert_eq!(node.mess.scheme, "ajp");
        assert!(guard.find_balancer("mycluster").is_some());
    }

    #[test]
    fn missing_route_is_syntax() {
        let state = test_state();
        let err = config(&state, "Host=10.0.0.1").unwrap_err();
        assert_eq!(err, McmpError::route_empty());
        assert_eq!(state.registry.version(), 0);
    }

    #[test]
    fn alias_context_pairing_is_enforced() {
        let state = test_state();
        let err = config(&state, "JVMRoute=n&Alias=a.com&Alias=b.com").unwrap_err();
        assert_eq!(err, McmpError::alias_without_context());

        let err = config(&state, "JVMRoute=n&Context=/app").unwrap_err();
        assert_eq!(err, McmpError::context_without_alias());

        let err = config(&state, "JVMRoute=n&Alias=a.com").unwrap_err();
        assert_eq!(err, McmpError::alias_without_context());
    }

    #[test]
    fn oversize_fields_are_syntax() {
        let state = test_state();
        let long = "x".repeat(200);
        let err = config(&state, &format!("JVMRoute={long}")).unwrap_err();
        assert_eq!(err, McmpError::route_too_big());

        let err = config(&state, &format!("JVMRoute=n&Port={long}")).unwrap_err();
        assert_eq!(err, McmpError::port_too_big());
    }

    #[test]
    fn duplicate_route_different_endpoint_tombstones() {
        let state = test_state();
        config(&state, "JVMRoute=node1&Host=10.0.0.1&Port=8009&Type=ajp&Alias=example.com&Context=/app").unwrap();
        let v = state.registry.version();

        let err = config(&state, "JVMRoute=node1&Host=10.0.0.2&Port=8009&Type=ajp").unwrap_err();
        assert_eq!(err, McmpError::old_node("node1"));

        let guard = state.registry.lock_nodes();
        // Old row tombstoned and cascade-deleted.
        assert!(guard.find_node("node1").is_none());
        let (_, tomb) = guard.find_node_by_host_port("10.0.0.1", "8009").unwrap();
        assert!(tomb.mess.removed);
        assert_eq!(tomb.mess.jvm_route, muster_registry::REMOVED_ROUTE);
        assert!(guard.list_hosts().is_empty());
        assert!(guard.list_contexts().is_empty());
        assert!(guard.version() > v);
    }

    #[test]
    fn tombstoned_slot_is_reused_by_matching_endpoint() {
        let state = test_state();
        config(&state, "JVMRoute=node1&Host=10.0.0.1&Port=8009&Type=ajp").unwrap();
        let old_id = state.registry.lock_nodes().find_node("node1").unwrap().0;

        // Identity conflict tombstones the slot.
        config(&state, "JVMRoute=node1&Host=10.0.0.2&Port=8009&Type=ajp").unwrap_err();

        // A new route at the old endpoint rehydrates the same slot.
        config(&state, "JVMRoute=node2&Host=10.0.0.1&Port=8009&Type=ajp").unwrap();
        let guard = state.registry.lock_nodes();
        let (id, node) = guard.find_node("node2").unwrap();
        assert_eq!(id, old_id);
        assert!(!node.mess.removed);
    }

    #[test]
    fn same_worker_different_route_is_refused() {
        let state = test_state();
        config(&state, "JVMRoute=node1&Host=10.0.0.1&Port=8009&Type=ajp").unwrap();

        let err = config(&state, "JVMRoute=node2&Host=10.0.0.1&Port=8009&Type=ajp").unwrap_err();
        assert_eq!(err, McmpError::same_worker());
    }

    #[test]
    fn capacity_exhaustion_is_mem_and_leaves_first_node() {
        let state = state_with(
            TableSizes {
                nodes: 1,
                ..TableSizes::default()
            },
            ManagerSettings::default(),
        );
        config(&state, "JVMRoute=node1&Host=10.0.0.1&Port=8009&Type=ajp").unwrap();
        let v = state.registry.version();

        let err = config(&state, "JVMRoute=node2&Host=10.0.0.2&Port=8010&Type=ajp").unwrap_err();
        assert_eq!(err.kind, crate::ErrorKind::Mem);

        let guard = state.registry.lock_nodes();
        assert!(guard.find_node("node1").is_some());
        assert!(guard.find_node("node2").is_none());
        drop(guard);
        assert_eq!(state.registry.version(), v);
    }

    #[test]
    fn reconfig_same_identity_updates_in_place() {
        let state = test_state();
        config(&state, "JVMRoute=node1&Host=10.0.0.1&Port=8009&Type=ajp").unwrap();
        let id1 = state.registry.lock_nodes().find_node("node1").unwrap().0;

        config(&state, "JVMRoute=node1&Host=10.0.0.1&Port=8009&Type=ajp&ping=20").unwrap();
        let guard = state.registry.lock_nodes();
        let (id2, node) = guard.find_node("node1").unwrap();
        assert_eq!(id1, id2);
        assert_eq!(node.mess.ping_secs, 20);
        assert_eq!(guard.list_nodes().len(), 1);
    }

    #[test]
    fn reused_worker_keeps_its_stats() {
        let state = test_state();
        config(&state, "JVMRoute=node1&Host=10.0.0.1&Port=8009&Type=ajp").unwrap();
        let id = state.registry.lock_nodes().find_node("node1").unwrap().0;

        // Traffic accrues on the proxy worker.
        let worker_table = state.balancer.clone();
        assert!(worker_table.proxy_worker(id).is_some());

        // Tombstone the registry row while the worker lives on.
        {
            let mut guard = state.registry.lock_nodes();
            guard.mark_node_removed(id);
            guard.inc_version();
        }

        // Re-registering the endpoint under a new route reuses the
        // worker and its counters survive.
        config(&state, "JVMRoute=node9&Host=10.0.0.1&Port=8009&Type=ajp").unwrap();
        let guard = state.registry.lock_nodes();
        let (nid, node) = guard.find_node("node9").unwrap();
        assert_eq!(nid, id);
        assert!(!node.mess.removed);
        let worker = worker_table.proxy_worker(id).unwrap();
        assert_eq!(worker.route, "node9");
    }

    #[test]
    fn ws_tunnel_rewrites_http_schemes() {
        let state = state_with(
            TableSizes::default(),
            ManagerSettings {
                enable_ws_tunnel: true,
                ..ManagerSettings::default()
            },
        );
        config(&state, "JVMRoute=node1&Host=10.0.0.1&Port=8080&Type=http").unwrap();

        let guard = state.registry.lock_nodes();
        let (_, node) = guard.find_node("node1").unwrap();
        assert_eq!(node.mess.scheme, "ws");
        assert_eq!(node.mess.upgrade, "websocket");
    }

    #[test]
    fn ajp_secret_is_copied_into_ajp_nodes_only() {
        let state = state_with(
            TableSizes::default(),
            ManagerSettings {
                ajp_secret: Some("s3cret".to_string()),
                ..ManagerSettings::default()
            },
        );
        config(&state, "JVMRoute=node1&Host=10.0.0.1&Port=8009&Type=ajp").unwrap();
        config(&state, "JVMRoute=node2&Host=10.0.0.2&Port=8080&Type=http").unwrap();

        let guard = state.registry.lock_nodes();
        assert_eq!(guard.find_node("node1").unwrap().1.mess.ajp_secret, "s3cret");
        assert_eq!(guard.find_node("node2").unwrap().1.mess.ajp_secret, "");
    }

    #[test]
    fn balancer_name_is_lowercased() {
        let state = test_state();
        config(&state, "JVMRoute=node1&Balancer=MyCluster").unwrap();

        let guard = state.registry.lock_nodes();
        assert!(guard.find_balancer("mycluster").is_some());
        assert_eq!(guard.find_node("node1").unwrap().1.mess.balancer, "mycluster");
    }

    #[test]
    fn ipv6_zone_suffix_is_stripped() {
        let state = test_state();
        config(&state, "JVMRoute=node1&Host=[fe80::1%25eth0]&Port=8009").unwrap();

        let guard = state.registry.lock_nodes();
        // %25 decodes to '%', then the zone is dropped.
        assert_eq!(guard.find_node("node1").unwrap().1.mess.host, "[fe80::1]");
    }

    #[test]
    fn multiple_alias_groups_get_dense_vhost_ids() {
        let state = test_state();
        config(
            &state,
            "JVMRoute=node1&Alias=a.com,b.com&Context=/app&Alias=c.com&Context=/shop,/cart",
        )
        .unwrap();

        let guard = state.registry.lock_nodes();
        let (id, _) = guard.find_node("node1").unwrap();
        assert_eq!(guard.read_host(id, "a.com").unwrap().1.vhost, 1);
        assert_eq!(guard.read_host(id, "b.com").unwrap().1.vhost, 1);
        assert_eq!(guard.read_host(id, "c.com").unwrap().1.vhost, 2);
        assert!(guard.read_context(id, 2, "/shop").is_some());
        assert!(guard.read_context(id, 2, "/cart").is_some());
        assert_eq!(guard.max_vhost(id), 2);
    }

    #[test]
    fn sticky_session_fields_update_the_balancer() {
        let state = test_state();
        config(
            &state,
            "JVMRoute=node1&StickySession=No&StickySessionCookie=MYSESSION&StickySessionForce=No&Maxattempts=3&WaitWorker=15",
        )
        .unwrap();

        let guard = state.registry.lock_nodes();
        let (_, bal) = guard.find_balancer("mycluster").unwrap();
        assert!(!bal.sticky_session);
        assert!(!bal.sticky_session_force);
        assert_eq!(bal.sticky_session_cookie, "MYSESSION");
        assert_eq!(bal.max_attempts, 3);
        assert_eq!(bal.timeout_secs, 15);
    }
}
