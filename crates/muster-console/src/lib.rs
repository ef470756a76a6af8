//! muster-console — the human-facing status and command page.
//!
//! A single GET endpoint renders the cluster state as HTML: LB groups,
//! nodes, aliases, contexts and their counters, plus action links that
//! drive the same command processors the MCMP receiver uses. Every
//! action link carries a nonce generated once at startup; a request
//! whose nonce does not match silently drops all other parameters, so a
//! cross-site request can never mutate state.

pub mod actions;
pub mod page;

use std::collections::HashMap;
use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use uuid::Uuid;

use muster_mcmp::ManagerState;

/// Console-side tunables.
#[derive(Debug, Clone)]
pub struct ConsoleSettings {
    /// Require the startup nonce on command links.
    pub check_nonce: bool,
    /// Render command links and accept `Cmd=` parameters.
    pub allow_cmd: bool,
    /// Skip the per-context detail on the main page.
    pub reduce_display: bool,
}

impl Default for ConsoleSettings {
    fn default() -> Self {
        Self {
            check_nonce: true,
            allow_cmd: true,
            reduce_display: false,
        }
    }
}

/// Shared state for the console handlers.
#[derive(Clone)]
pub struct ConsoleState {
    pub manager: ManagerState,
    pub settings: Arc<ConsoleSettings>,
    /// UUID generated at startup, required on every command link.
    pub nonce: Arc<str>,
}

impl ConsoleState {
    pub fn new(manager: ManagerState, settings: ConsoleSettings) -> Self {
        Self {
            manager,
            settings: Arc::new(settings),
            nonce: Uuid::new_v4().to_string().into(),
        }
    }

    /// Leading query-string fragment carrying the nonce, empty when
    /// nonce checking is off.
    pub(crate) fn nonce_prefix(&self) -> String {
        if self.settings.check_nonce {
            format!("nonce={}&", self.nonce)
        } else {
            String::new()
        }
    }

    /// Drop every parameter of a request whose nonce does not match.
    pub(crate) fn filter_params(&self, params: HashMap<String, String>) -> HashMap<String, String> {
        if !self.settings.check_nonce {
            return params;
        }
        match params.get("nonce") {
            Some(nonce) if **nonce == *self.nonce => params,
            _ => HashMap::new(),
        }
    }
}

/// Build the console router; nest it under the manager's handler path.
pub fn console_router(state: ConsoleState) -> Router {
    Router::new()
        .route("/", get(page::status_page))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use muster_mcmp::ManagerSettings;
    use muster_proxy::ProxyWorkerTable;
    use muster_registry::{Registry, TableSizes};

    fn test_console() -> ConsoleState {
        let sizes = TableSizes::default();
        let manager = ManagerState::new(
            Registry::new(sizes),
            Arc::new(ProxyWorkerTable::new(sizes.nodes)),
            ManagerSettings::default(),
        );
        ConsoleState::new(manager, ConsoleSettings::default())
    }

    #[test]
    fn bad_nonce_drops_all_parameters() {
        let state = test_console();
        let mut params = HashMap::new();
        params.insert("nonce".to_string(), "not-the-nonce".to_string());
        params.insert("Cmd".to_string(), "ENABLE-APP".to_string());
        assert!(state.filter_params(params).is_empty());
    }

    #[test]
    fn matching_nonce_keeps_parameters() {
        let state = test_console();
        let mut params = HashMap::new();
        params.insert("nonce".to_string(), state.nonce.to_string());
        params.insert("Cmd".to_string(), "INFO".to_string());
        assert_eq!(state.filter_params(params).len(), 2);
    }

    #[test]
    fn nonce_check_can_be_disabled() {
        let sizes = TableSizes::default();
        let manager = ManagerState::new(
            Registry::new(sizes),
            Arc::new(ProxyWorkerTable::new(sizes.nodes)),
            ManagerSettings::default(),
        );
        let state = ConsoleState::new(
            manager,
            ConsoleSettings {
                check_nonce: false,
                ..ConsoleSettings::default()
            },
        );
        let mut params = HashMap::new();
        params.insert("Cmd".to_string(), "INFO".to_string());
        assert_eq!(state.filter_params(params).len(), 1);
        assert!(state.nonce_prefix().is_empty());
    }
}
