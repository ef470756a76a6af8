//! muster-proxy — bridge between the registry and the proxy worker plane.
//!
//! # Components
//!
//! - **`worker`** — the proxy worker table and the `BalancerHandler`
//!   provider interface consumed by the CONFIG processor
//! - **`probe`** — async endpoint liveness probes behind STATUS and PING
//! - **`sync`** — version-watch rebuild of the worker table from the
//!   registry

pub mod probe;
pub mod sync;
pub mod worker;

pub use probe::{probe_endpoint, ProbeResult};
pub use sync::{RegistrySync, SyncStats};
pub use worker::{BalancerHandler, BoxFuture, ProxyWorker, ProxyWorkerTable};
