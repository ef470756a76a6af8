//! Snapshot persistence for the registry tables.
//!
//! Each table is written whole to `<base>/manager.<table>` as JSON; there
//! is no journal. Missing files at load time simply leave the table
//! empty, so a fresh base directory behaves like a cold start.

use std::fs;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::RegistryResult;
use crate::registry::Registry;
use crate::table::SlotTable;

const NODE_FILE: &str = "manager.node";
const HOST_FILE: &str = "manager.host";
const CONTEXT_FILE: &str = "manager.context";
const BALANCER_FILE: &str = "manager.balancer";
const SESSIONID_FILE: &str = "manager.sessionid";
const DOMAIN_FILE: &str = "manager.domain";
const VERSION_FILE: &str = "manager.version";

fn store_table<T: Clone + Serialize>(table: &SlotTable<T>, path: &Path) -> RegistryResult<()> {
    let data = serde_json::to_vec(table.slots())?;
    fs::write(path, data)?;
    Ok(())
}

fn load_table<T: Clone + DeserializeOwned>(
    table: &mut SlotTable<T>,
    path: &Path,
) -> RegistryResult<bool> {
    if !path.exists() {
        return Ok(false);
    }
    let data = fs::read(path)?;
    let slots: Vec<Option<T>> = serde_json::from_slice(&data)?;
    table.load_slots(slots);
    Ok(true)
}

/// Write every table (and the version counter) under `base`.
pub fn store(registry: &Registry, base: &Path) -> RegistryResult<()> {
    fs::create_dir_all(base)?;
    let guard = registry.lock_nodes();
    store_table(&guard.graph.nodes, &base.join(NODE_FILE))?;
    store_table(&guard.graph.hosts, &base.join(HOST_FILE))?;
    store_table(&*guard.contexts, &base.join(CONTEXT_FILE))?;
    store_table(&guard.graph.balancers, &base.join(BALANCER_FILE))?;
    store_table(&guard.graph.sessions, &base.join(SESSIONID_FILE))?;
    store_table(&guard.graph.domains, &base.join(DOMAIN_FILE))?;
    fs::write(base.join(VERSION_FILE), guard.version().to_string())?;
    debug!(base = %base.display(), "registry snapshot stored");
    Ok(())
}

/// Restore tables from a snapshot directory, tolerating absent files.
pub fn load(registry: &Registry, base: &Path) -> RegistryResult<()> {
    let mut guard = registry.lock_nodes();
    let mut any = false;
    any |= load_table(&mut guard.graph.nodes, &base.join(NODE_FILE))?;
    any |= load_table(&mut guard.graph.hosts, &base.join(HOST_FILE))?;
    any |= load_table(&mut guard.contexts, &base.join(CONTEXT_FILE))?;
    any |= load_table(&mut guard.graph.balancers, &base.join(BALANCER_FILE))?;
    any |= load_table(&mut guard.graph.sessions, &base.join(SESSIONID_FILE))?;
    any |= load_table(&mut guard.graph.domains, &base.join(DOMAIN_FILE))?;
    if any {
        // Force a rebuild of any derived state in the routing plane.
        guard.inc_version();
        debug!(base = %base.display(), "registry snapshot loaded");
    } else {
        warn!(base = %base.display(), "no snapshot files found, starting empty");
    }
    Ok(())
}
