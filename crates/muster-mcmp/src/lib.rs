//! muster-mcmp — the Management Control Protocol surface.
//!
//! Back-end servers register themselves by sending MCMP requests (HTTP
//! methods `CONFIG`, `ENABLE-APP`, `STATUS`, …) with `key=value&…` bodies.
//! This crate parses those bodies, validates them against the protocol's
//! field caps, runs the per-verb transaction against the registry and
//! worker reconciler, and renders the wire responses.
//!
//! # Components
//!
//! - **`parser`** — percent-decoding tokenizer for request bodies
//! - **`error`** — the SYNTAX/MEM/GENERAL error surface with its
//!   catalogued messages
//! - **`config_cmd`** — the CONFIG transaction
//! - **`app_cmd`** — ENABLE-APP / DISABLE-APP / STOP-APP / REMOVE-APP in
//!   context, node and domain scope
//! - **`status_cmd`** — STATUS and PING probes
//! - **`report`** — DUMP, INFO and VERSION renderers
//! - **`receiver`** — the axum router dispatching on the request method

pub mod app_cmd;
pub mod config_cmd;
pub mod error;
pub mod parser;
pub mod receiver;
pub mod report;
pub mod status_cmd;

use std::sync::Arc;

use muster_proxy::BalancerHandler;
use muster_registry::Registry;

pub use app_cmd::{AppAction, Scope};
pub use error::{ErrorKind, McmpError};
pub use receiver::build_receiver;
pub use report::OutputKind;

/// Protocol version spoken on the wire.
pub const VERSION_PROTOCOL: &str = "0.2.1";

/// Release string reported by the VERSION command and the console.
pub const VERSION_RELEASE: &str = concat!("muster/", env!("CARGO_PKG_VERSION"));

/// Receiver-side tunables.
#[derive(Debug, Clone)]
pub struct ManagerSettings {
    /// Default balancer name when CONFIG does not carry one.
    pub balancer_name: Option<String>,
    /// Upper bound on an MCMP request body, floor 1024.
    pub max_mess_size: usize,
    /// Rewrite http/https nodes to ws/wss and set the upgrade header.
    pub enable_ws_tunnel: bool,
    /// Upgrade header used when tunnelling; defaults to `websocket`.
    pub ws_upgrade_header: Option<String>,
    /// Secret copied into AJP nodes.
    pub ajp_secret: Option<String>,
    /// Proxy response field buffer size pushed to non-AJP nodes.
    pub response_field_size: u64,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            balancer_name: None,
            max_mess_size: 1024,
            enable_ws_tunnel: false,
            ws_upgrade_header: None,
            ajp_secret: None,
            response_field_size: 0,
        }
    }
}

/// Shared state for the MCMP handlers.
#[derive(Clone)]
pub struct ManagerState {
    pub registry: Registry,
    pub balancer: Arc<dyn BalancerHandler>,
    pub settings: Arc<ManagerSettings>,
    /// Startup timestamp echoed in STATUS/PING responses so senders can
    /// detect a manager restart.
    pub boot_time: u64,
}

impl ManagerState {
    pub fn new(registry: Registry, balancer: Arc<dyn BalancerHandler>, settings: ManagerSettings) -> Self {
        let boot_time = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        Self {
            registry,
            balancer,
            settings: Arc::new(settings),
            boot_time,
        }
    }
}
