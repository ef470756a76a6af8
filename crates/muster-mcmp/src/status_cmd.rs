//! STATUS and PING processing.
//!
//! STATUS carries a node's load factor and triggers a liveness probe so
//! the worker status follows the real back-end, preventing split-brain
//! between what the node reports and what the proxy can reach. PING
//! probes a known node, an arbitrary endpoint, or just the manager.

use tracing::debug;

use muster_proxy::BalancerHandler;
use muster_registry::JVMROUTE_MAX;

use crate::error::McmpError;
use crate::parser::{key_is, Pairs};
use crate::ManagerState;

/// Process a STATUS message: `JVMRoute` plus `Load` in [-1, 100], where
/// -1 means broken and 0 standby.
pub async fn process_status(state: &ManagerState, pairs: &Pairs) -> Result<String, McmpError> {
    let mut route = String::new();
    let mut load: i32 = -1;

    for (key, val) in pairs {
        if key_is(key, "JVMRoute") {
            if val.len() >= JVMROUTE_MAX {
                return Err(McmpError::route_too_big());
            }
            route = val.clone();
        } else if key_is(key, "Load") {
            load = val.parse().unwrap_or(-1);
        } else {
            return Err(McmpError::bad_field(key));
        }
    }
    debug!(%route, load, "processing STATUS");

    let node = {
        let guard = state.registry.lock_nodes();
        guard.find_node(&route)
    };
    let Some((id, _)) = node else {
        return Err(McmpError::node_read(&route));
    };

    let up = state.balancer.proxy_node_isup(id, load).await;
    let status = if up { "OK" } else { "NOTOK" };
    Ok(format!(
        "Type=STATUS-RSP&JVMRoute={route}&State={status}&id={}\n",
        state.boot_time
    ))
}

/// Process a PING message in one of its three modes: known node
/// (`JVMRoute`), arbitrary endpoint (`Scheme`+`Host`+`Port`), or bare
/// (liveness of the manager itself).
pub async fn process_ping(state: &ManagerState, pairs: &Pairs) -> Result<String, McmpError> {
    let mut route: Option<String> = None;
    let mut scheme: Option<String> = None;
    let mut host: Option<String> = None;
    let mut port: Option<String> = None;

    for (key, val) in pairs {
        if key_is(key, "JVMRoute") {
            if val.len() >= JVMROUTE_MAX {
                return Err(McmpError::route_too_big());
            }
            route = Some(val.clone());
        } else if key_is(key, "Scheme") {
            scheme = Some(val.clone());
        } else if key_is(key, "Host") {
            host = Some(val.clone());
        } else if key_is(key, "Port") {
            port = Some(val.clone());
        } else {
            return Err(McmpError::bad_field(key));
        }
    }
    debug!(?route, ?scheme, ?host, ?port, "processing PING");

    let body = match route {
        None => {
            if scheme.is_none() && host.is_none() && port.is_none() {
                "Type=PING-RSP&State=OK".to_string()
            } else {
                let (Some(scheme), Some(host), Some(port)) = (scheme, host, port) else {
                    return Err(McmpError::missing_fields());
                };
                let up = state.balancer.proxy_host_isup(scheme, host, port).await;
                format!("Type=PING-RSP&State={}", if up { "OK" } else { "NOTOK" })
            }
        }
        Some(route) => {
            let node = {
                let guard = state.registry.lock_nodes();
                guard.find_node(&route)
            };
            let Some((id, _)) = node else {
                return Err(McmpError::node_read(&route));
            };
            // -2 probes without disturbing the stored load factor.
            let up = state.balancer.proxy_node_isup(id, -2).await;
            format!(
                "Type=PING-RSP&JVMRoute={route}&State={}",
                if up { "OK" } else { "NOTOK" }
            )
        }
    };

    Ok(format!("{body}&id={}\n", state.boot_time))
}
