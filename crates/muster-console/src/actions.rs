//! Command handling for the console's query parameters.
//!
//! The page accepts `Cmd=<verb>&Range=CONTEXT|NODE|DOMAIN` plus the
//! verb's own fields, after the nonce filter has run. DUMP and INFO are
//! rendered inline; the *-APP verbs run through the same processors the
//! MCMP receiver uses and report their error string back to the page.

use std::collections::HashMap;

use tracing::debug;

use muster_mcmp::app_cmd::{self, AppAction};
use muster_mcmp::parser::Pairs;
use muster_mcmp::report::{self, OutputKind};
use muster_mcmp::{ManagerState, Scope};

/// What the parameter block decided the page should do.
pub enum Outcome {
    /// Plain status page, nothing requested.
    Page,
    /// Serve a raw report body instead of the page.
    Report(OutputKind, String),
    /// A command ran and failed; the page shows the message.
    Failed(String),
}

/// Run the `Cmd` parameter block against the manager.
pub fn apply_params(
    manager: &ManagerState,
    params: &HashMap<String, String>,
    allow_cmd: bool,
    accept: Option<&str>,
) -> Outcome {
    let Some(cmd) = params.get("Cmd") else {
        return Outcome::Page;
    };
    debug!(cmd = %cmd, "console command");

    if cmd.eq_ignore_ascii_case("DUMP") {
        let kind = OutputKind::from_accept(accept);
        return Outcome::Report(kind, report::process_dump(manager, kind));
    }
    if cmd.eq_ignore_ascii_case("INFO") {
        let kind = OutputKind::from_accept(accept);
        return Outcome::Report(kind, report::process_info(manager, kind));
    }

    let Some(range) = params.get("Range") else {
        return Outcome::Page;
    };
    if !allow_cmd {
        return Outcome::Page;
    }

    let action = match cmd.to_ascii_uppercase().as_str() {
        "ENABLE-APP" => AppAction::Enable,
        "DISABLE-APP" => AppAction::Disable,
        "STOP-APP" => AppAction::Stop,
        "REMOVE-APP" => AppAction::Remove,
        _ => return Outcome::Failed("SYNTAX: Command is not supported".to_string()),
    };

    // Forward the verb's own fields as wire pairs.
    let mut pairs = Pairs::new();
    for key in ["JVMRoute", "Alias", "Context"] {
        if let Some(val) = params.get(key) {
            pairs.push((key.to_string(), val.clone()));
        }
    }

    let result = if range.eq_ignore_ascii_case("DOMAIN") {
        let domain = params.get("Domain").map(String::as_str).unwrap_or("");
        app_cmd::process_domain(manager, &pairs, action, domain)
    } else {
        let scope = if range.eq_ignore_ascii_case("NODE") {
            Scope::Node
        } else {
            Scope::Context
        };
        match action {
            AppAction::Enable => app_cmd::process_enable(manager, &pairs, scope),
            AppAction::Disable => app_cmd::process_disable(manager, &pairs, scope),
            AppAction::Stop => app_cmd::process_stop(manager, &pairs, scope, false),
            AppAction::Remove => app_cmd::process_remove(manager, &pairs, scope),
        }
    };

    match result {
        Ok(_) => Outcome::Page,
        Err(err) => Outcome::Failed(err.message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use muster_mcmp::config_cmd::process_config;
    use muster_mcmp::parser::parse_pairs;
    use muster_mcmp::ManagerSettings;
    use muster_proxy::ProxyWorkerTable;
    use muster_registry::{ContextStatus, Registry, TableSizes};
    use std::sync::Arc;

    fn configured_manager() -> ManagerState {
        let sizes = TableSizes::default();
        let manager = ManagerState::new(
            Registry::new(sizes),
            Arc::new(ProxyWorkerTable::new(sizes.nodes)),
            ManagerSettings::default(),
        );
        let pairs = parse_pairs(
            "JVMRoute=node1&Host=10.0.0.1&Port=8009&Type=ajp&Alias=example.com&Context=/app",
        )
        .unwrap();
        process_config(&manager, &pairs).unwrap();
        manager
    }

    fn params(entries: &[(&str, &str)]) -> HashMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn no_cmd_is_a_plain_page() {
        let manager = configured_manager();
        assert!(matches!(
            apply_params(&manager, &HashMap::new(), true, None),
            Outcome::Page
        ));
    }

    #[test]
    fn dump_and_info_render_inline() {
        let manager = configured_manager();
        match apply_params(&manager, &params(&[("Cmd", "DUMP")]), true, None) {
            Outcome::Report(OutputKind::Plain, body) => assert!(body.contains("node1")),
            _ => panic!("expected a report"),
        }
        match apply_params(&manager, &params(&[("Cmd", "INFO")]), true, Some("text/xml")) {
            Outcome::Report(OutputKind::Xml, body) => assert!(body.contains("<Info>")),
            _ => panic!("expected an xml report"),
        }
    }

    #[test]
    fn enable_command_runs_in_context_range() {
        let manager = configured_manager();
        let outcome = apply_params(
            &manager,
            &params(&[
                ("Cmd", "ENABLE-APP"),
                ("Range", "CONTEXT"),
                ("JVMRoute", "node1"),
                ("Alias", "example.com"),
                ("Context", "/app"),
            ]),
            true,
            None,
        );
        assert!(matches!(outcome, Outcome::Page));

        let guard = manager.registry.lock_nodes();
        let (id, _) = guard.find_node("node1").unwrap();
        assert_eq!(
            guard.read_context(id, 1, "/app").unwrap().1.status,
            ContextStatus::Enabled
        );
    }

    #[test]
    fn domain_range_uses_the_domain_parameter() {
        let manager = configured_manager();
        // node1 has no domain, so a domain command touches nothing.
        let outcome = apply_params(
            &manager,
            &params(&[("Cmd", "DISABLE-APP"), ("Range", "DOMAIN"), ("Domain", "dom9")]),
            true,
            None,
        );
        assert!(matches!(outcome, Outcome::Page));
        let guard = manager.registry.lock_nodes();
        let (id, _) = guard.find_node("node1").unwrap();
        assert_eq!(
            guard.read_context(id, 1, "/app").unwrap().1.status,
            ContextStatus::Stopped
        );
    }

    #[test]
    fn unknown_cmd_fails_without_mutation() {
        let manager = configured_manager();
        let outcome = apply_params(
            &manager,
            &params(&[("Cmd", "EXPLODE"), ("Range", "NODE"), ("JVMRoute", "node1")]),
            true,
            None,
        );
        match outcome {
            Outcome::Failed(message) => {
                assert_eq!(message, "SYNTAX: Command is not supported")
            }
            _ => panic!("expected failure"),
        }
    }

    #[test]
    fn commands_disabled_renders_plain_page() {
        let manager = configured_manager();
        let outcome = apply_params(
            &manager,
            &params(&[
                ("Cmd", "ENABLE-APP"),
                ("Range", "CONTEXT"),
                ("JVMRoute", "node1"),
                ("Alias", "example.com"),
                ("Context", "/app"),
            ]),
            false,
            None,
        );
        assert!(matches!(outcome, Outcome::Page));

        let guard = manager.registry.lock_nodes();
        let (id, _) = guard.find_node("node1").unwrap();
        // Nothing ran.
        assert_eq!(
            guard.read_context(id, 1, "/app").unwrap().1.status,
            ContextStatus::Stopped
        );
    }

    #[test]
    fn failed_command_reports_its_message() {
        let manager = configured_manager();
        let outcome = apply_params(
            &manager,
            &params(&[
                ("Cmd", "ENABLE-APP"),
                ("Range", "CONTEXT"),
                ("JVMRoute", "ghost"),
                ("Alias", "example.com"),
                ("Context", "/app"),
            ]),
            true,
            None,
        );
        match outcome {
            Outcome::Failed(message) => {
                assert_eq!(message, "MEM: Can't read node with \"ghost\" JVMRoute")
            }
            _ => panic!("expected failure"),
        }
    }
}
