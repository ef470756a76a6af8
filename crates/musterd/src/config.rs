//! musterd.toml configuration parser.
//!
//! Every field is optional in the file; unset fields take the same
//! defaults the manager has always shipped with. CLI flags override
//! file values.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use muster_mcmp::ManagerSettings;
use muster_registry::TableSizes;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Listen address, e.g. "0.0.0.0:6666".
    pub listen: Option<String>,
    /// Path prefix of the status/command page.
    pub console_path: Option<String>,

    /// Table capacities.
    pub max_context: Option<usize>,
    pub max_node: Option<usize>,
    pub max_host: Option<usize>,
    pub max_sessionid: Option<usize>,

    /// Snapshot persistence.
    pub persist: Option<bool>,
    pub base_path: Option<PathBuf>,

    /// Default balancer name for CONFIG messages without one.
    pub balancer_name: Option<String>,

    /// Console behavior.
    pub check_nonce: Option<bool>,
    pub allow_cmd: Option<bool>,
    pub reduce_display: Option<bool>,

    /// Receiver tunables.
    pub max_mess_size: Option<usize>,
    pub enable_ws_tunnel: Option<bool>,
    pub ws_upgrade_header: Option<String>,
    pub ajp_secret: Option<String>,
    pub response_field_size: Option<u64>,

    /// Watchdog period in seconds.
    pub watchdog_secs: Option<u64>,
}

impl ManagerConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ManagerConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn listen(&self) -> &str {
        self.listen.as_deref().unwrap_or("0.0.0.0:6666")
    }

    pub fn console_path(&self) -> &str {
        self.console_path.as_deref().unwrap_or("/mod_cluster-manager")
    }

    pub fn persist(&self) -> bool {
        self.persist.unwrap_or(false)
    }

    pub fn base_path(&self) -> PathBuf {
        self.base_path
            .clone()
            .unwrap_or_else(|| PathBuf::from("logs"))
    }

    pub fn watchdog_secs(&self) -> u64 {
        self.watchdog_secs.unwrap_or(10)
    }

    pub fn table_sizes(&self) -> TableSizes {
        let defaults = TableSizes::default();
        TableSizes {
            nodes: self.max_node.unwrap_or(defaults.nodes),
            hosts: self.max_host.unwrap_or(defaults.hosts),
            contexts: self.max_context.unwrap_or(defaults.contexts),
            balancers: self.max_host.unwrap_or(defaults.balancers),
            sessions: self.max_sessionid.unwrap_or(defaults.sessions),
            domains: self.max_node.unwrap_or(defaults.domains),
        }
    }

    pub fn manager_settings(&self) -> ManagerSettings {
        let defaults = ManagerSettings::default();
        ManagerSettings {
            balancer_name: self.balancer_name.clone(),
            max_mess_size: self.max_mess_size.unwrap_or(defaults.max_mess_size).max(1024),
            enable_ws_tunnel: self.enable_ws_tunnel.unwrap_or(false),
            ws_upgrade_header: self.ws_upgrade_header.clone(),
            ajp_secret: self.ajp_secret.clone(),
            response_field_size: self.response_field_size.unwrap_or(0),
        }
    }

    pub fn console_settings(&self) -> muster_console::ConsoleSettings {
        muster_console::ConsoleSettings {
            check_nonce: self.check_nonce.unwrap_or(true),
            allow_cmd: self.allow_cmd.unwrap_or(true),
            reduce_display: self.reduce_display.unwrap_or(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_manager() {
        let config = ManagerConfig::default();
        assert_eq!(config.listen(), "0.0.0.0:6666");
        assert_eq!(config.console_path(), "/mod_cluster-manager");
        assert!(!config.persist());

        let sizes = config.table_sizes();
        assert_eq!(sizes.nodes, 20);
        assert_eq!(sizes.hosts, 20);
        assert_eq!(sizes.contexts, 100);
        assert_eq!(sizes.sessions, 0);

        let settings = config.manager_settings();
        assert_eq!(settings.max_mess_size, 1024);
        assert!(!settings.enable_ws_tunnel);
    }

    #[test]
    fn parse_partial_file() {
        let toml_str = r#"
listen = "127.0.0.1:7777"
max_node = 50
persist = true
balancer_name = "prod"
max_mess_size = 64
"#;
        let config: ManagerConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.listen(), "127.0.0.1:7777");
        assert_eq!(config.table_sizes().nodes, 50);
        assert!(config.persist());
        assert_eq!(config.manager_settings().balancer_name.as_deref(), Some("prod"));
        // The message size floor holds.
        assert_eq!(config.manager_settings().max_mess_size, 1024);
    }

    #[test]
    fn from_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("musterd.toml");
        std::fs::write(&path, "max_context = 200\n").unwrap();

        let config = ManagerConfig::from_file(&path).unwrap();
        assert_eq!(config.table_sizes().contexts, 200);
    }
}
