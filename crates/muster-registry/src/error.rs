//! Error types for the registry.

use thiserror::Error;

/// Result type alias for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Errors that can occur during registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The table has no free slot left. Capacity acts as admission
    /// control; callers surface this as a MEM protocol error.
    #[error("table {0} is full")]
    TableFull(&'static str),

    #[error("no {0} row at slot {1}")]
    NoSuchSlot(&'static str, usize),

    #[error("snapshot io error: {0}")]
    Snapshot(#[from] std::io::Error),

    #[error("snapshot decode error: {0}")]
    SnapshotDecode(#[from] serde_json::Error),
}
