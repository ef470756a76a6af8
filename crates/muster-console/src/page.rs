//! The status page: HTML rendering and the GET handler.
//!
//! Stored registry strings can be interpolated into the markup directly:
//! the MCMP parser refuses `< > " '` on entry, so nothing in the tables
//! can break out of the page.

use std::collections::HashMap;

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::{Html, IntoResponse, Response};
use std::fmt::Write;

use muster_mcmp::{ManagerState, VERSION_RELEASE};
use muster_proxy::BalancerHandler;
use muster_registry::{ContextInfo, HostInfo};

use crate::actions::{self, Outcome};
use crate::ConsoleState;

/// GET handler for the console page.
pub async fn status_page(
    State(state): State<ConsoleState>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let params = state.filter_params(params);

    // An explicit Refresh parameter turns on meta refresh, min 10s.
    let refresh = params.get("Refresh").map(|val| {
        let secs: i64 = val.parse().unwrap_or(10);
        if secs < 1 {
            10
        } else {
            secs
        }
    });

    let accept = headers.get("accept").and_then(|v| v.to_str().ok());
    let outcome = actions::apply_params(
        &state.manager,
        &params,
        state.settings.allow_cmd,
        accept,
    );

    let mut response = match outcome {
        Outcome::Report(kind, body) => {
            return ([("content-type", kind.content_type())], body).into_response()
        }
        Outcome::Failed(message) => Html(render_error(&state, &message)).into_response(),
        Outcome::Page => Html(render_page(&state)).into_response(),
    };
    if let Some(secs) = refresh {
        if let Ok(value) = secs.to_string().parse() {
            response.headers_mut().insert("Refresh", value);
        }
    }
    response
}

fn render_error(state: &ConsoleState, message: &str) -> String {
    format!(
        "<html><head>\n<title>Muster Status</title>\n</head><body>\n\
         <h1>{VERSION_RELEASE}</h1>\
         <h1> Command failed: {message}</h1>\n \
         <a href=\"?{}\">Continue</a>\n</body></html>\n",
        state.nonce_prefix()
    )
}

fn render_page(state: &ConsoleState) -> String {
    let manager = &state.manager;
    let guard = manager.registry.lock_nodes();
    let nonce = state.nonce_prefix();
    let allow_cmd = state.settings.allow_cmd;
    let reduce = state.settings.reduce_display;

    let mut out = String::new();
    out.push_str("<html><head>\n<title>Muster Status</title>\n</head><body>\n");
    let _ = write!(out, "<h1>{VERSION_RELEASE}</h1>");
    let _ = write!(
        out,
        "<a href=\"?{nonce}Refresh=10\">Auto Refresh</a> \
         <a href=\"?{nonce}Cmd=DUMP&Range=ALL\">show DUMP output</a> \
         <a href=\"?{nonce}Cmd=INFO&Range=ALL\">show INFO output</a>\n"
    );

    // Nodes grouped by LB group.
    let mut nodes = guard.list_nodes();
    nodes.sort_by(|a, b| a.1.mess.domain.cmp(&b.1.mess.domain));

    let session_table = guard.max_size_sessionid() > 0;
    let mut current_domain: Option<String> = None;

    for (id, node) in &nodes {
        let mess = &node.mess;
        if current_domain.as_deref() != Some(mess.domain.as_str()) {
            current_domain = Some(mess.domain.clone());
            let _ = write!(out, "<h1> LBGroup {}: ", mess.domain);
            if allow_cmd {
                domain_command_string(&mut out, &nonce, &mess.domain);
            }
            out.push_str("</h1>\n");
        }

        let _ = write!(
            out,
            "<h1> Node {} ({}://{}:{}): </h1>\n",
            mess.jvm_route, mess.scheme, mess.host, mess.port
        );
        if allow_cmd {
            node_command_string(&mut out, &nonce, &mess.jvm_route);
        }

        let _ = write!(
            out,
            "<br/>\nBalancer: {},LBGroup: {},Flushpackets: {},Flushwait: {},Ping: {},Smax: {},Ttl: {}",
            mess.balancer,
            mess.domain,
            mess.flush_packets.as_str(),
            mess.flush_wait_ms,
            mess.ping_secs,
            mess.smax,
            mess.ttl_secs,
        );
        proxy_stat_string(&mut out, manager, *id);
        if session_table {
            let _ = write!(
                out,
                ",Num sessions: {}",
                guard.count_sessionids(&mess.jvm_route)
            );
        }
        out.push('\n');

        // Virtual hosts of the node.
        let hosts: Vec<(usize, HostInfo)> = guard
            .list_hosts()
            .into_iter()
            .filter(|(_, h)| h.node == *id)
            .collect();
        let mut vhosts: Vec<u32> = hosts.iter().map(|(_, h)| h.vhost).collect();
        vhosts.sort_unstable();
        vhosts.dedup();

        for vhost in vhosts {
            if !reduce {
                let _ = write!(out, "<h2> Virtual Host {vhost}:</h2>");
            }
            let aliases: Vec<&HostInfo> = hosts
                .iter()
                .filter(|(_, h)| h.vhost == vhost)
                .map(|(_, h)| h)
                .collect();
            let first_alias = aliases.first().map(|h| h.alias.as_str()).unwrap_or("");

            let contexts: Vec<(usize, ContextInfo)> = guard
                .list_contexts()
                .into_iter()
                .filter(|(_, c)| c.node == *id && c.vhost == vhost)
                .collect();
            if !reduce {
                out.push_str("<h3>Contexts:</h3>");
                out.push_str("<pre>");
                for (_, context) in &contexts {
                    let _ = write!(
                        out,
                        "{}, Status: {} Request: {} ",
                        context.path,
                        context.status.as_str(),
                        context.nbrequests
                    );
                    if allow_cmd {
                        context_command_string(
                            &mut out,
                            &nonce,
                            context,
                            first_alias,
                            &mess.jvm_route,
                        );
                    }
                    out.push('\n');
                }
                out.push_str("</pre>");
            }

            if reduce {
                out.push_str("Aliases: ");
            } else {
                out.push_str("<h3>Aliases:</h3><pre>");
            }
            for host in &aliases {
                out.push_str(&host.alias);
                out.push(if reduce { ' ' } else { '\n' });
            }
            if !reduce {
                out.push_str("</pre>");
            }
        }
    }

    // Observed session ids.
    if session_table {
        let sessions = guard.list_sessionids();
        if !sessions.is_empty() {
            out.push_str("<h1>SessionIDs:</h1><pre>");
            for (_, session) in sessions {
                let _ = writeln!(out, "id: {} route: {}", session.sessionid, session.jvm_route);
            }
            out.push_str("</pre>");
        }
    }

    out.push_str("</body></html>\n");
    out
}

fn proxy_stat_string(out: &mut String, manager: &ManagerState, id: usize) {
    match manager.balancer.proxy_worker(id) {
        Some(worker) => {
            let status = if worker.usable { "OK" } else { "NOTOK" };
            let _ = write!(
                out,
                ",Status: {status},Elected: {},Read: {},Transferred: {},Connected: {},Load: {}",
                worker.stats.elected,
                worker.stats.read_bytes,
                worker.stats.transferred,
                worker.stats.busy,
                worker.stats.lb_factor,
            );
        }
        None => {
            let _ = write!(
                out,
                ",Status: NOTOK,Elected: 0,Read: 0,Transferred: 0,Connected: 0,Load: 0"
            );
        }
    }
}

fn context_string(context: &ContextInfo, alias: &str, route: &str) -> String {
    format!(
        "JVMRoute={route}&Alias={alias}&Context={}",
        context.path
    )
}

fn context_command_string(out: &mut String, nonce: &str, context: &ContextInfo, alias: &str, route: &str) {
    use muster_registry::ContextStatus::*;
    let args = context_string(context, alias, route);
    match context.status {
        Disabled => {
            let _ = write!(
                out,
                "<a href=\"?{nonce}Cmd=ENABLE-APP&Range=CONTEXT&{args}\">Enable</a> \
                 <a href=\"?{nonce}Cmd=STOP-APP&Range=CONTEXT&{args}\">Stop</a>"
            );
        }
        Enabled => {
            let _ = write!(
                out,
                "<a href=\"?{nonce}Cmd=DISABLE-APP&Range=CONTEXT&{args}\">Disable</a> \
                 <a href=\"?{nonce}Cmd=STOP-APP&Range=CONTEXT&{args}\">Stop</a>"
            );
        }
        Stopped => {
            let _ = write!(
                out,
                "<a href=\"?{nonce}Cmd=ENABLE-APP&Range=CONTEXT&{args}\">Enable</a> \
                 <a href=\"?{nonce}Cmd=DISABLE-APP&Range=CONTEXT&{args}\">Disable</a>"
            );
        }
    }
}

fn node_command_string(out: &mut String, nonce: &str, route: &str) {
    let _ = write!(
        out,
        "<a href=\"?{nonce}Cmd=ENABLE-APP&Range=NODE&JVMRoute={route}\">Enable Contexts</a> \
         <a href=\"?{nonce}Cmd=DISABLE-APP&Range=NODE&JVMRoute={route}\">Disable Contexts</a> \
         <a href=\"?{nonce}Cmd=STOP-APP&Range=NODE&JVMRoute={route}\">Stop Contexts</a>"
    );
}

fn domain_command_string(out: &mut String, nonce: &str, domain: &str) {
    let _ = write!(
        out,
        "<a href=\"?{nonce}Cmd=ENABLE-APP&Range=DOMAIN&Domain={domain}\">Enable Nodes</a> \
         <a href=\"?{nonce}Cmd=DISABLE-APP&Range=DOMAIN&Domain={domain}\">Disable Nodes</a> \
         <a href=\"?{nonce}Cmd=STOP-APP&Range=DOMAIN&Domain={domain}\">Stop Nodes</a>"
    );
}
