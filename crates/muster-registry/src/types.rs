//! Row types stored in the registry tables.
//!
//! Every text field has a fixed byte cap inherited from the wire protocol;
//! a longer value is rejected as a syntax error before it reaches the
//! tables. All types are serializable for the snapshot files.

use serde::{Deserialize, Serialize};

// ── Field caps ─────────────────────────────────────────────────────

/// Max bytes for a balancer name.
pub const BALANCER_MAX: usize = 40;
/// Max bytes for a JVMRoute routing token.
pub const JVMROUTE_MAX: usize = 96;
/// Max bytes for an LB group (Domain) name.
pub const DOMAIN_MAX: usize = 20;
/// Max bytes for a node host.
pub const HOST_MAX: usize = 64;
/// Max bytes for a node port.
pub const PORT_MAX: usize = 7;
/// Max bytes for a scheme/type or upgrade header value.
pub const SCHEME_MAX: usize = 16;
/// Max bytes for an AJP secret.
pub const AJP_SECRET_MAX: usize = 64;
/// Max bytes for a sticky-session cookie name.
pub const COOKIE_MAX: usize = 30;
/// Max bytes for a sticky-session path key.
pub const PATH_KEY_MAX: usize = 30;
/// Max bytes for a virtual-host alias.
pub const ALIAS_MAX: usize = 255;
/// Max bytes for a context path.
pub const CONTEXT_MAX: usize = 80;
/// Max bytes for a session id.
pub const SESSIONID_MAX: usize = 128;

/// Route written into a tombstoned node slot so a later CONFIG on the
/// same endpoint can rematch it.
pub const REMOVED_ROUTE: &str = "REMOVED";

/// Watchdog ticks a tombstoned node must survive, with no dependent host
/// or context rows left, before its slot is freed.
pub const REMOVE_CHECK_THRESHOLD: u32 = 10;

// ── Node ───────────────────────────────────────────────────────────

/// Response flush policy for a node's proxied responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushPackets {
    #[default]
    Off,
    On,
    Auto,
}

impl FlushPackets {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlushPackets::Off => "Off",
            FlushPackets::On => "On",
            FlushPackets::Auto => "Auto",
        }
    }
}

/// Node configuration as received from the back-end server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeMess {
    /// Slot id in the node table; doubles as the proxy worker id.
    pub id: Option<usize>,
    pub balancer: String,
    pub jvm_route: String,
    /// LB group ("Domain" on the wire): failover scope.
    pub domain: String,
    pub host: String,
    pub port: String,
    /// Connector scheme: ajp, http, https, ws or wss.
    pub scheme: String,
    /// Upgrade header for WebSocket tunnelling, empty when unused.
    pub upgrade: String,
    pub ajp_secret: String,
    /// The node connects outbound to the proxy instead of the reverse.
    pub reversed: bool,
    /// Tombstone flag; the slot is held pending reuse or reaping.
    pub removed: bool,
    pub response_field_size: u64,
    pub flush_packets: FlushPackets,
    pub flush_wait_ms: u64,
    pub ping_secs: u64,
    pub smax: i32,
    pub ttl_secs: u64,
    pub timeout_secs: u64,
    /// Watchdog ticks survived while tombstoned with no dependents.
    pub num_remove_check: u32,
}

impl Default for NodeMess {
    fn default() -> Self {
        Self {
            id: None,
            balancer: "mycluster".to_string(),
            jvm_route: String::new(),
            domain: String::new(),
            host: "localhost".to_string(),
            port: "8009".to_string(),
            scheme: "ajp".to_string(),
            upgrade: String::new(),
            ajp_secret: String::new(),
            reversed: false,
            removed: false,
            response_field_size: 0,
            flush_packets: FlushPackets::Off,
            flush_wait_ms: 10,
            ping_secs: 10,
            smax: -1,
            ttl_secs: 60,
            timeout_secs: 0,
            num_remove_check: 0,
        }
    }
}

impl NodeMess {
    /// Whether two descriptions can share a slot without rebuilding the
    /// proxy worker. Fields outside this set can change in place.
    pub fn is_same_node(&self, other: &NodeMess) -> bool {
        self.balancer == other.balancer
            && self.host == other.host
            && self.port == other.port
            && self.scheme == other.scheme
            && self.reversed == other.reversed
            && self.smax == other.smax
            && self.ttl_secs == other.ttl_secs
    }
}

/// Proxy worker counters colocated with the node row.
///
/// These survive a CONFIG that re-binds the same endpoint to a new
/// JVMRoute: the upsert preserves them when `clean` is false.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WorkerStats {
    pub elected: u64,
    pub read_bytes: u64,
    pub transferred: u64,
    pub busy: u64,
    pub lb_factor: i32,
    pub lb_status: i32,
}

/// A node row: the received configuration plus manager-side state.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NodeInfo {
    pub mess: NodeMess,
    /// Unix timestamp of the last received message for this node.
    pub update_time: u64,
    pub stats: WorkerStats,
}

impl NodeInfo {
    pub fn new(mess: NodeMess) -> Self {
        Self {
            mess,
            update_time: 0,
            stats: WorkerStats::default(),
        }
    }
}

// ── Balancer ───────────────────────────────────────────────────────

/// Sticky-session policy group aggregating one or more nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalancerInfo {
    pub balancer: String,
    pub sticky_session: bool,
    pub sticky_session_cookie: String,
    pub sticky_session_path: String,
    pub sticky_session_remove: bool,
    pub sticky_session_force: bool,
    pub timeout_secs: u64,
    pub max_attempts: u32,
}

impl Default for BalancerInfo {
    fn default() -> Self {
        Self {
            balancer: "mycluster".to_string(),
            sticky_session: true,
            sticky_session_cookie: "JSESSIONID".to_string(),
            sticky_session_path: "jsessionid".to_string(),
            sticky_session_remove: false,
            sticky_session_force: true,
            timeout_secs: 0,
            max_attempts: 1,
        }
    }
}

// ── Host ───────────────────────────────────────────────────────────

/// Virtual-host alias owned by a node. Aliases sharing one logical
/// virtual host share one vhost id, dense per node starting at 1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostInfo {
    pub node: usize,
    pub vhost: u32,
    /// Lowercased on entry: DNS names are case-insensitive.
    pub alias: String,
}

// ── Context ────────────────────────────────────────────────────────

/// Lifecycle state of an application context.
///
/// Removal frees the row rather than storing a state, so the stored set
/// has no `Removed` member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextStatus {
    Enabled,
    Disabled,
    Stopped,
}

impl ContextStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContextStatus::Enabled => "ENABLED",
            ContextStatus::Disabled => "DISABLED",
            ContextStatus::Stopped => "STOPPED",
        }
    }

    /// Numeric status as exposed on the DUMP/INFO wire.
    pub fn as_wire(&self) -> u8 {
        match self {
            ContextStatus::Enabled => 1,
            ContextStatus::Disabled => 2,
            ContextStatus::Stopped => 3,
        }
    }
}

/// URI path prefix installed on a (node, vhost) with a lifecycle state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextInfo {
    pub node: usize,
    pub vhost: u32,
    pub path: String,
    pub status: ContextStatus,
    /// Requests currently being served; reported by STOP-APP so the
    /// sender can drain before removal.
    pub nbrequests: u64,
}

// ── SessionId ──────────────────────────────────────────────────────

/// Observed session-id → route mapping, kept for display only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub sessionid: String,
    pub jvm_route: String,
    pub update_time: u64,
}

// ── Domain ─────────────────────────────────────────────────────────

/// Remembers which LB group a removed node belonged to, so sessions can
/// keep failing over inside the group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainInfo {
    pub domain: String,
    pub balancer: String,
    pub jvm_route: String,
}
