//! The MCMP error surface.
//!
//! Two error kinds reach senders: SYNTAX (malformed or oversize input)
//! and MEM (table full, conflicting worker identity, unreadable rows).
//! Each carries one catalogued message, reported verbatim in the `Mess`
//! response header. The message texts are part of the wire protocol and
//! must not be reworded.

use thiserror::Error;

/// Error kind reported in the `Type` response header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Syntax,
    Mem,
    General,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Syntax => "SYNTAX",
            ErrorKind::Mem => "MEM",
            ErrorKind::General => "GENERAL",
        }
    }
}

/// A protocol error: kind plus catalogued message.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct McmpError {
    pub kind: ErrorKind,
    pub message: String,
}

impl McmpError {
    fn syntax(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Syntax,
            message: message.into(),
        }
    }

    fn mem(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Mem,
            message: message.into(),
        }
    }

    // ── SYNTAX catalogue ───────────────────────────────────────────

    pub fn mess_parse() -> Self {
        Self::syntax(
            "SYNTAX: Can't parse MCMP message. It might have contained illegal symbols or unknown elements.",
        )
    }

    pub fn balancer_too_big() -> Self {
        Self::syntax("SYNTAX: Balancer field too big")
    }

    pub fn field_too_big() -> Self {
        Self::syntax("SYNTAX: A field is too big")
    }

    pub fn route_too_big() -> Self {
        Self::syntax("SYNTAX: JVMRoute field too big")
    }

    pub fn route_empty() -> Self {
        Self::syntax("SYNTAX: JVMRoute can't be empty")
    }

    pub fn domain_too_big() -> Self {
        Self::syntax("SYNTAX: LBGroup field too big")
    }

    pub fn host_too_big() -> Self {
        Self::syntax("SYNTAX: Host field too big")
    }

    pub fn port_too_big() -> Self {
        Self::syntax("SYNTAX: Port field too big")
    }

    pub fn type_too_big() -> Self {
        Self::syntax("SYNTAX: Type field too big")
    }

    pub fn alias_without_context() -> Self {
        Self::syntax("SYNTAX: Alias without Context")
    }

    pub fn context_without_alias() -> Self {
        Self::syntax("SYNTAX: Context without Alias")
    }

    pub fn bad_field(field: &str) -> Self {
        Self::syntax(format!("SYNTAX: Invalid field \"{field}\" in message"))
    }

    pub fn missing_fields() -> Self {
        Self::syntax("SYNTAX: Mandatory field(s) missing in message")
    }

    pub fn command_unsupported() -> Self {
        Self::syntax("SYNTAX: Command is not supported")
    }

    pub fn multiple_alias() -> Self {
        Self::syntax("SYNTAX: Only one Alias in APP command")
    }

    pub fn multiple_context() -> Self {
        Self::syntax("SYNTAX: Only one Context in APP command")
    }

    pub fn body_read(method: &str) -> Self {
        Self::syntax(format!("SYNTAX: {method} can't read POST data"))
    }

    // ── MEM catalogue ──────────────────────────────────────────────

    pub fn node_upsert(route: &str) -> Self {
        Self::mem(format!("MEM: Can't update or insert node with \"{route}\" JVMRoute"))
    }

    pub fn old_node(route: &str) -> Self {
        Self::mem(format!("MEM: Old node with \"{route}\" JVMRoute still exists"))
    }

    pub fn balancer_upsert(route: &str) -> Self {
        Self::mem(format!(
            "MEM: Can't update or insert balancer for node with \"{route}\" JVMRoute"
        ))
    }

    pub fn node_read(route: &str) -> Self {
        Self::mem(format!("MEM: Can't read node with \"{route}\" JVMRoute"))
    }

    pub fn host_read(route: &str) -> Self {
        Self::mem(format!(
            "MEM: Can't read host alias for node with \"{route}\" JVMRoute"
        ))
    }

    pub fn host_upsert(route: &str) -> Self {
        Self::mem(format!(
            "MEM: Can't update or insert host alias for node with \"{route}\" JVMRoute"
        ))
    }

    pub fn context_upsert(route: &str) -> Self {
        Self::mem(format!(
            "MEM: Can't update or insert context for node with \"{route}\" JVMRoute"
        ))
    }

    pub fn same_worker() -> Self {
        Self::mem("MEM: Another for the same worker already exist")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_map_to_header_values() {
        assert_eq!(ErrorKind::Syntax.as_str(), "SYNTAX");
        assert_eq!(ErrorKind::Mem.as_str(), "MEM");
        assert_eq!(ErrorKind::General.as_str(), "GENERAL");
    }

    #[test]
    fn formatted_messages_carry_the_route() {
        let err = McmpError::node_upsert("node1");
        assert_eq!(err.kind, ErrorKind::Mem);
        assert_eq!(
            err.message,
            "MEM: Can't update or insert node with \"node1\" JVMRoute"
        );

        let err = McmpError::bad_field("Bogus");
        assert_eq!(err.kind, ErrorKind::Syntax);
        assert_eq!(err.message, "SYNTAX: Invalid field \"Bogus\" in message");
    }
}
