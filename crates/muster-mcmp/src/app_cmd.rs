//! ENABLE-APP, DISABLE-APP, STOP-APP and REMOVE-APP.
//!
//! All four verbs take a `JVMRoute`, exactly one `Alias` comma list and
//! exactly one `Context` comma list, and run in one of three scopes:
//! context scope (the default), node scope (URL `*` or trailing `/*`),
//! or domain scope (console only), which fans a node-scope command out
//! to every node of an LB group.

use tracing::{debug, warn};

use muster_registry::{ContextStatus, NodesGuard, ALIAS_MAX, CONTEXT_MAX, JVMROUTE_MAX};

use crate::config_cmd::{insert_update_aliases, insert_update_contexts};
use crate::error::McmpError;
use crate::parser::{first_of_list, key_is, Pairs};
use crate::ManagerState;

/// Transition applied by an application command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppAction {
    Enable,
    Disable,
    Stop,
    Remove,
}

impl AppAction {
    /// Target context state; `None` removes the rows instead.
    fn status(&self) -> Option<ContextStatus> {
        match self {
            AppAction::Enable => Some(ContextStatus::Enabled),
            AppAction::Disable => Some(ContextStatus::Disabled),
            AppAction::Stop => Some(ContextStatus::Stopped),
            AppAction::Remove => None,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            AppAction::Enable => "ENABLE-APP",
            AppAction::Disable => "DISABLE-APP",
            AppAction::Stop => "STOP-APP",
            AppAction::Remove => "REMOVE-APP",
        }
    }
}

/// Command scope, decided by the request path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Transition only the listed contexts on the vhost of the first alias.
    Context,
    /// Transition every host and context owned by the node.
    Node,
}

pub fn process_enable(
    state: &ManagerState,
    pairs: &Pairs,
    scope: Scope,
) -> Result<Option<String>, McmpError> {
    process_appl_cmd(state, pairs, AppAction::Enable, scope, false)
}

pub fn process_disable(
    state: &ManagerState,
    pairs: &Pairs,
    scope: Scope,
) -> Result<Option<String>, McmpError> {
    process_appl_cmd(state, pairs, AppAction::Disable, scope, false)
}

pub fn process_stop(
    state: &ManagerState,
    pairs: &Pairs,
    scope: Scope,
    from_node: bool,
) -> Result<Option<String>, McmpError> {
    process_appl_cmd(state, pairs, AppAction::Stop, scope, from_node)
}

pub fn process_remove(
    state: &ManagerState,
    pairs: &Pairs,
    scope: Scope,
) -> Result<Option<String>, McmpError> {
    process_appl_cmd(state, pairs, AppAction::Remove, scope, false)
}

/// Fan a verb out to every node of the LB group, in node scope.
pub fn process_domain(
    state: &ManagerState,
    pairs: &Pairs,
    action: AppAction,
    domain: &str,
) -> Result<Option<String>, McmpError> {
    let routes: Vec<String> = {
        let guard = state.registry.lock_nodes();
        guard
            .list_nodes()
            .into_iter()
            .filter(|(_, n)| n.mess.domain == domain && !n.mess.removed)
            .map(|(_, n)| n.mess.jvm_route)
            .collect()
    };
    debug!(domain, nodes = routes.len(), verb = action.as_str(), "processing domain command");

    let mut result = Ok(None);
    for route in routes {
        let mut node_pairs = pairs.clone();
        node_pairs.push(("JVMRoute".to_string(), route));
        result = process_appl_cmd(state, &node_pairs, action, Scope::Node, false);
    }
    result
}

fn process_appl_cmd(
    state: &ManagerState,
    pairs: &Pairs,
    action: AppAction,
    scope: Scope,
    from_node: bool,
) -> Result<Option<String>, McmpError> {
    let mut route: Option<String> = None;
    let mut alias: Option<String> = None;
    let mut context: Option<String> = None;

    for (key, val) in pairs {
        if key_is(key, "JVMRoute") {
            if val.len() >= JVMROUTE_MAX {
                return Err(McmpError::route_too_big());
            }
            route = Some(val.clone());
        } else if key_is(key, "Alias") {
            if alias.is_some() {
                return Err(McmpError::multiple_alias());
            }
            if val.len() >= ALIAS_MAX {
                return Err(McmpError::field_too_big());
            }
            alias = Some(val.to_ascii_lowercase());
        } else if key_is(key, "Context") {
            if context.is_some() {
                return Err(McmpError::multiple_context());
            }
            if val.len() >= CONTEXT_MAX {
                return Err(McmpError::field_too_big());
            }
            context = Some(val.clone());
        }
        // Other keys (console parameters) are ignored here.
    }

    let route = match route {
        Some(route) if !route.is_empty() => route,
        _ => return Err(McmpError::route_empty()),
    };
    if context.is_none() && alias.is_some() {
        return Err(McmpError::alias_without_context());
    }
    if alias.is_none() && context.is_some() {
        return Err(McmpError::context_without_alias());
    }

    debug!(verb = action.as_str(), %route, ?scope, "processing application command");

    let mut guard = state.registry.lock_nodes();
    let (node_id, node) = match guard.find_node(&route) {
        Some(found) => found,
        None => {
            return if action == AppAction::Remove {
                // Already gone.
                Ok(None)
            } else {
                Err(McmpError::node_read(&route))
            };
        }
    };
    if node.mess.removed {
        return if action == AppAction::Remove {
            Ok(None)
        } else {
            Err(McmpError::node_read(&node.mess.jvm_route))
        };
    }
    guard.inc_version();

    if scope == Scope::Node {
        process_node_cmd(&mut guard, action, node_id);
        return Ok(None);
    }

    let first_alias = alias.as_deref().map(first_of_list).unwrap_or("");
    let host = match guard.read_host(node_id, first_alias) {
        Some((_, host)) => host,
        None => {
            if action == AppAction::Remove {
                return Ok(None);
            }
            // Install the alias group under the next free vhost id.
            let vid = guard.max_vhost(node_id) + 1;
            debug!(vhost = vid, node = node_id, %route, "adding vhost for aliases");
            let list = alias.as_deref().unwrap_or("");
            if insert_update_aliases(&mut guard, list, node_id, vid).is_err() {
                return Err(McmpError::host_upsert(&route));
            }
            match guard.read_host(node_id, first_alias) {
                Some((_, host)) => host,
                None => return Err(McmpError::host_read(&node.mess.jvm_route)),
            }
        }
    };

    let context_list = context.as_deref().unwrap_or("/");

    if action == AppAction::Enable {
        // The same context on two balancers is a common misconfiguration;
        // warn but proceed.
        for path in context_list.split(',') {
            for (_, other) in guard.list_contexts() {
                if other.path != path || other.node == node_id {
                    continue;
                }
                if let Some(owner) = guard.get_node(other.node) {
                    if owner.mess.balancer != node.mess.balancer {
                        warn!(
                            context = %path,
                            balancer = %node.mess.balancer,
                            other_balancer = %owner.mess.balancer,
                            "context is enabled in two balancers"
                        );
                    }
                }
            }
        }
    }

    if insert_update_contexts(&mut guard, context_list, node_id, host.vhost, action.status())
        .is_err()
    {
        return Err(McmpError::context_upsert(&node.mess.jvm_route));
    }

    match action {
        AppAction::Remove => {
            // Drop the host rows once their last context is gone.
            let any_left = guard
                .list_contexts()
                .iter()
                .any(|(_, c)| c.node == node_id && c.vhost == host.vhost);
            if !any_left {
                for (hid, h) in guard.list_hosts() {
                    if h.node == node_id && h.vhost == host.vhost {
                        guard.remove_host(hid);
                    }
                }
            }
        }
        AppAction::Stop => {
            let first_context = first_of_list(context_list);
            if let Some((_, stopped)) = guard.read_context(node_id, host.vhost, first_context) {
                debug!(nbrequests = stopped.nbrequests, "STOP-APP on context");
                if from_node {
                    let alias = alias.as_deref().unwrap_or("");
                    // This response spells the route key JvmRoute; senders
                    // match on the exact casing per verb.
                    return Ok(Some(format!(
                        "Type=STOP-APP-RSP&JvmRoute={route}&Alias={alias}&Context={first_context}&Requests={}\n",
                        stopped.nbrequests
                    )));
                }
            } else {
                debug!("STOP-APP could not read the context back");
            }
        }
        _ => {}
    }

    Ok(None)
}

/// Apply a verb to every host and context owned by the node; REMOVE also
/// tombstones the node itself.
fn process_node_cmd(guard: &mut NodesGuard<'_>, action: AppAction, node_id: usize) {
    debug!(verb = action.as_str(), node = node_id, "processing node-scope command");

    for (hid, host) in guard.list_hosts() {
        if host.node != node_id {
            continue;
        }
        for (cid, context) in guard.list_contexts() {
            if context.node != node_id || context.vhost != host.vhost {
                continue;
            }
            match action.status() {
                Some(status) => {
                    let _ = guard.insert_update_context(&muster_registry::ContextInfo {
                        status,
                        ..context
                    });
                }
                None => {
                    guard.remove_context(cid);
                }
            }
        }
        if action == AppAction::Remove {
            guard.remove_host(hid);
        }
    }

    if action == AppAction::Remove {
        if let Some(mut node) = guard.get_node(node_id) {
            node.mess.removed = true;
            let _ = guard.insert_update_node(&node, Some(node_id), false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config_cmd::process_config;
    use crate::parser::parse_pairs;
    use crate::ManagerSettings;
    use muster_proxy::ProxyWorkerTable;
    use muster_registry::{Registry, TableSizes};
    use std::sync::Arc;

    fn test_state() -> ManagerState {
        let sizes = TableSizes::default();
        ManagerState::new(
            Registry::new(sizes),
            Arc::new(ProxyWorkerTable::new(sizes.nodes)),
            ManagerSettings::default(),
        )
    }

    fn configured_state() -> ManagerState {
        let state = test_state();
        let pairs = parse_pairs(
            "JVMRoute=node1&Host=10.0.0.1&Port=8009&Type=ajp&Alias=example.com&Context=/app",
        )
        .unwrap();
        process_config(&state, &pairs).unwrap();
        state
    }

    fn app_pairs(route: &str) -> Pairs {
        parse_pairs(&format!("JVMRoute={route}&Alias=example.com&Context=/app")).unwrap()
    }

    fn context_status(state: &ManagerState) -> Option<ContextStatus> {
        let guard = state.registry.lock_nodes();
        let (id, _) = guard.find_node("node1")?;
        guard.read_context(id, 1, "/app").map(|(_, c)| c.status)
    }

    #[test]
    fn enable_stop_remove_cycle() {
        let state = configured_state();

        process_enable(&state, &app_pairs("node1"), Scope::Context).unwrap();
        assert_eq!(context_status(&state), Some(ContextStatus::Enabled));

        let body = process_stop(&state, &app_pairs("node1"), Scope::Context, true)
            .unwrap()
            .unwrap();
        assert_eq!(
            body,
            "Type=STOP-APP-RSP&JvmRoute=node1&Alias=example.com&Context=/app&Requests=0\n"
        );
        assert_eq!(context_status(&state), Some(ContextStatus::Stopped));

        process_remove(&state, &app_pairs("node1"), Scope::Context).unwrap();
        assert_eq!(context_status(&state), None);

        // The host row went away with its last context.
        let guard = state.registry.lock_nodes();
        let (id, _) = guard.find_node("node1").unwrap();
        assert!(guard.read_host(id, "example.com").is_none());
    }

    #[test]
    fn disable_transitions_context() {
        let state = configured_state();
        process_disable(&state, &app_pairs("node1"), Scope::Context).unwrap();
        assert_eq!(context_status(&state), Some(ContextStatus::Disabled));
    }

    #[test]
    fn stop_without_fromnode_has_no_body() {
        let state = configured_state();
        let body = process_stop(&state, &app_pairs("node1"), Scope::Context, false).unwrap();
        assert!(body.is_none());
    }

    #[test]
    fn unknown_node_is_mem_except_remove() {
        let state = test_state();
        let err = process_enable(&state, &app_pairs("ghost"), Scope::Context).unwrap_err();
        assert_eq!(err, McmpError::node_read("ghost"));

        // REMOVE of an unknown node is idempotent success.
        assert!(process_remove(&state, &app_pairs("ghost"), Scope::Context)
            .unwrap()
            .is_none());
    }

    #[test]
    fn missing_route_and_pairing_violations() {
        let state = configured_state();
        let err = process_enable(
            &state,
            &parse_pairs("Alias=example.com&Context=/app").unwrap(),
            Scope::Context,
        )
        .unwrap_err();
        assert_eq!(err, McmpError::route_empty());

        let err = process_enable(
            &state,
            &parse_pairs("JVMRoute=node1&Alias=example.com").unwrap(),
            Scope::Context,
        )
        .unwrap_err();
        assert_eq!(err, McmpError::alias_without_context());

        let err = process_enable(
            &state,
            &parse_pairs("JVMRoute=node1&Context=/app").unwrap(),
            Scope::Context,
        )
        .unwrap_err();
        assert_eq!(err, McmpError::context_without_alias());

        let err = process_enable(
            &state,
            &parse_pairs("JVMRoute=node1&Alias=a.com&Alias=b.com&Context=/app").unwrap(),
            Scope::Context,
        )
        .unwrap_err();
        assert_eq!(err, McmpError::multiple_alias());
    }

    #[test]
    fn node_scope_transitions_everything() {
        let state = test_state();
        let pairs = parse_pairs(
            "JVMRoute=node1&Host=10.0.0.1&Port=8009&Alias=a.com&Context=/app&Alias=b.com&Context=/shop",
        )
        .unwrap();
        process_config(&state, &pairs).unwrap();

        process_enable(&state, &app_pairs("node1"), Scope::Node).unwrap();
        let guard = state.registry.lock_nodes();
        for (_, context) in guard.list_contexts() {
            assert_eq!(context.status, ContextStatus::Enabled);
        }
    }

    #[test]
    fn node_scope_remove_clears_node_graph() {
        let state = configured_state();
        let before = state.registry.version();

        process_remove(&state, &app_pairs("node1"), Scope::Node).unwrap();

        let guard = state.registry.lock_nodes();
        let (id, node) = guard.find_node("node1").unwrap();
        assert!(node.mess.removed);
        assert!(guard.list_hosts().iter().all(|(_, h)| h.node != id));
        assert!(guard.list_contexts().iter().all(|(_, c)| c.node != id));
        assert!(guard.version() > before);
    }

    #[test]
    fn commands_on_tombstoned_node_fail_except_remove() {
        let state = configured_state();
        process_remove(&state, &app_pairs("node1"), Scope::Node).unwrap();

        let err = process_enable(&state, &app_pairs("node1"), Scope::Context).unwrap_err();
        assert_eq!(err, McmpError::node_read("node1"));

        assert!(process_remove(&state, &app_pairs("node1"), Scope::Node)
            .unwrap()
            .is_none());
    }

    #[test]
    fn enable_on_new_alias_creates_dense_vhost() {
        let state = configured_state();
        let pairs = parse_pairs("JVMRoute=node1&Alias=other.com&Context=/other").unwrap();
        process_enable(&state, &pairs, Scope::Context).unwrap();

        let guard = state.registry.lock_nodes();
        let (id, _) = guard.find_node("node1").unwrap();
        let (_, host) = guard.read_host(id, "other.com").unwrap();
        assert_eq!(host.vhost, 2);
        let (_, context) = guard.read_context(id, 2, "/other").unwrap();
        assert_eq!(context.status, ContextStatus::Enabled);
    }

    #[test]
    fn aliases_are_lowercased() {
        let state = configured_state();
        let pairs = parse_pairs("JVMRoute=node1&Alias=EXAMPLE.COM&Context=/app").unwrap();
        process_enable(&state, &pairs, Scope::Context).unwrap();
        assert_eq!(context_status(&state), Some(ContextStatus::Enabled));
    }

    #[test]
    fn domain_scope_fans_out_to_group_nodes() {
        let state = test_state();
        for (route, host, domain) in [
            ("node1", "10.0.0.1", "dom1"),
            ("node2", "10.0.0.2", "dom1"),
            ("node3", "10.0.0.3", "dom2"),
        ] {
            let pairs = parse_pairs(&format!(
                "JVMRoute={route}&Host={host}&Port=8009&Domain={domain}&Alias=a.com&Context=/app"
            ))
            .unwrap();
            process_config(&state, &pairs).unwrap();
        }

        process_domain(&state, &Pairs::new(), AppAction::Disable, "dom1").unwrap();

        let guard = state.registry.lock_nodes();
        for (_, context) in guard.list_contexts() {
            let owner = guard.get_node(context.node).unwrap();
            if owner.mess.domain == "dom1" {
                assert_eq!(context.status, ContextStatus::Disabled);
            } else {
                assert_eq!(context.status, ContextStatus::Stopped);
            }
        }
    }
}
