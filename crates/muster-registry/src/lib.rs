//! muster-registry — shared cluster registry for the muster manager.
//!
//! Holds the six fixed-capacity tables the manager reconciles against the
//! proxy's worker plane: nodes, virtual-host aliases, application contexts,
//! balancers, LB groups ("domains") and observed session ids, plus a
//! monotonic version counter the routing plane watches to refresh derived
//! state.
//!
//! # Architecture
//!
//! All cross-entity references are integer slot ids into preallocated
//! tables; no allocation happens on the data path and capacity exhaustion
//! is a reportable error, never a panic. The `Registry` is `Clone` + `Send`
//! + `Sync` (backed by `Arc`) and can be shared across request handlers.
//! Multi-table mutations run under a single node lock; a finer context lock
//! covers lone context updates made while the node lock is not held.

pub mod error;
pub mod registry;
pub mod snapshot;
pub mod table;
pub mod types;

pub use error::{RegistryError, RegistryResult};
pub use registry::{ContextsGuard, NodesGuard, Registry, TableSizes};
pub use table::SlotTable;
pub use types::*;
