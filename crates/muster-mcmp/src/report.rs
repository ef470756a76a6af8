//! DUMP, INFO and VERSION renderers.
//!
//! Both report verbs enumerate the tables as `text/plain`, or as
//! `text/xml` when the `Accept` header asks for it. INFO additionally
//! joins each node with its live proxy worker counters.

use std::fmt::Write;

use muster_proxy::BalancerHandler;
use muster_registry::WorkerStats;

use crate::{ManagerState, VERSION_PROTOCOL, VERSION_RELEASE};

/// Report output format, selected by the `Accept` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    Plain,
    Xml,
}

impl OutputKind {
    pub fn from_accept(accept: Option<&str>) -> Self {
        match accept {
            Some(value) if value.contains("text/xml") => OutputKind::Xml,
            _ => OutputKind::Plain,
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            OutputKind::Plain => "text/plain",
            OutputKind::Xml => "text/xml",
        }
    }
}

const XML_PROLOGUE: &str = "<?xml version=\"1.0\" standalone=\"yes\" ?>\n";

/// Render a DUMP: raw table contents.
pub fn process_dump(state: &ManagerState, kind: OutputKind) -> String {
    let guard = state.registry.lock_nodes();
    let mut out = String::new();

    if kind == OutputKind::Xml {
        out.push_str(XML_PROLOGUE);
        out.push_str("<Dump><Balancers>");
    }
    for (id, bal) in guard.list_balancers() {
        match kind {
            OutputKind::Xml => {
                let _ = write!(
                    out,
                    "<Balancer id=\"{id}\" name=\"{}\"><StickySession><Enabled>{}</Enabled>\
                     <Cookie>{}</Cookie><Path>{}</Path><Remove>{}</Remove><Force>{}</Force>\
                     </StickySession><Timeout>{}</Timeout><MaxAttempts>{}</MaxAttempts></Balancer>",
                    bal.balancer,
                    bal.sticky_session as u8,
                    bal.sticky_session_cookie,
                    bal.sticky_session_path,
                    bal.sticky_session_remove as u8,
                    bal.sticky_session_force as u8,
                    bal.timeout_secs,
                    bal.max_attempts,
                );
            }
            OutputKind::Plain => {
                let _ = writeln!(
                    out,
                    "balancer: [{id}] Name: {} Sticky: {} [{}]/[{}] remove: {} force: {} Timeout: {} maxAttempts: {}",
                    bal.balancer,
                    bal.sticky_session as u8,
                    bal.sticky_session_cookie,
                    bal.sticky_session_path,
                    bal.sticky_session_remove as u8,
                    bal.sticky_session_force as u8,
                    bal.timeout_secs,
                    bal.max_attempts,
                );
            }
        }
    }

    if kind == OutputKind::Xml {
        out.push_str("</Balancers><Nodes>");
    }
    for (id, node) in guard.list_nodes() {
        let mess = &node.mess;
        match kind {
            OutputKind::Xml => {
                let _ = write!(
                    out,
                    "<Node id=\"{id}\"><Balancer>{}</Balancer><JVMRoute>{}</JVMRoute>\
                     <LBGroup>{}</LBGroup><Host>{}</Host><Port>{}</Port><Type>{}</Type>\
                     <FlushPackets>{}</FlushPackets><FlushWait>{}</FlushWait><Ping>{}</Ping>\
                     <Smax>{}</Smax><Ttl>{}</Ttl><Timeout>{}</Timeout></Node>",
                    mess.balancer,
                    mess.jvm_route,
                    mess.domain,
                    mess.host,
                    mess.port,
                    mess.scheme,
                    mess.flush_packets as u8,
                    mess.flush_wait_ms,
                    mess.ping_secs,
                    mess.smax,
                    mess.ttl_secs,
                    mess.timeout_secs,
                );
            }
            OutputKind::Plain => {
                let _ = writeln!(
                    out,
                    "node: [{id}:{id}],Balancer: {},JVMRoute: {},LBGroup: [{}],Host: {},Port: {},\
                     Type: {},flushpackets: {},flushwait: {},ping: {},smax: {},ttl: {},timeout: {}",
                    mess.balancer,
                    mess.jvm_route,
                    mess.domain,
                    mess.host,
                    mess.port,
                    mess.scheme,
                    mess.flush_packets as u8,
                    mess.flush_wait_ms,
                    mess.ping_secs,
                    mess.smax,
                    mess.ttl_secs,
                    mess.timeout_secs,
                );
            }
        }
    }

    if kind == OutputKind::Xml {
        out.push_str("</Nodes><Hosts>");
    }
    for (id, host) in guard.list_hosts() {
        match kind {
            OutputKind::Xml => {
                let _ = write!(
                    out,
                    "<Host id=\"{id}\" alias=\"{}\"><Vhost>{}</Vhost><Node>{}</Node></Host>",
                    host.alias, host.vhost, host.node,
                );
            }
            OutputKind::Plain => {
                let _ = writeln!(
                    out,
                    "host: {id} [{}] vhost: {} node: {}",
                    host.alias, host.vhost, host.node,
                );
            }
        }
    }

    if kind == OutputKind::Xml {
        out.push_str("</Hosts><Contexts>");
    }
    for (id, context) in guard.list_contexts() {
        match kind {
            OutputKind::Xml => {
                let _ = write!(
                    out,
                    "<Context id=\"{id}\" path=\"{}\"><Vhost>{}</Vhost><Node>{}</Node>\
                     <Status id=\"{}\">{}</Status></Context>",
                    context.path,
                    context.vhost,
                    context.node,
                    context.status.as_wire(),
                    context.status.as_str(),
                );
            }
            OutputKind::Plain => {
                let _ = writeln!(
                    out,
                    "context: {id} [{}] vhost: {} node: {} status: {}",
                    context.path,
                    context.vhost,
                    context.node,
                    context.status.as_wire(),
                );
            }
        }
    }
    if kind == OutputKind::Xml {
        out.push_str("</Contexts></Dump>");
    }
    out
}

/// Render an INFO: nodes with live worker counters, vhosts and contexts.
pub fn process_info(state: &ManagerState, kind: OutputKind) -> String {
    let guard = state.registry.lock_nodes();
    let mut out = String::new();

    if kind == OutputKind::Xml {
        out.push_str(XML_PROLOGUE);
        out.push_str("<Info><Nodes>");
    }
    for (id, node) in guard.list_nodes() {
        let mess = &node.mess;
        let stats = state
            .balancer
            .proxy_worker(id)
            .map(|w| w.stats)
            .unwrap_or(WorkerStats::default());
        match kind {
            OutputKind::Xml => {
                let _ = write!(
                    out,
                    "<Node id=\"{id}\" name=\"{}\"><Balancer>{}</Balancer><LBGroup>{}</LBGroup>\
                     <Host>{}</Host><Port>{}</Port><Type>{}</Type>\
                     <Flushpackets>{}</Flushpackets><Flushwait>{}</Flushwait><Ping>{}</Ping>\
                     <Smax>{}</Smax><Ttl>{}</Ttl>\
                     <Elected>{}</Elected><Read>{}</Read><Transfered>{}</Transfered>\
                     <Connected>{}</Connected><Load>{}</Load></Node>",
                    mess.jvm_route,
                    mess.balancer,
                    mess.domain,
                    mess.host,
                    mess.port,
                    mess.scheme,
                    mess.flush_packets.as_str(),
                    mess.flush_wait_ms,
                    mess.ping_secs,
                    mess.smax,
                    mess.ttl_secs,
                    stats.elected,
                    stats.read_bytes,
                    stats.transferred,
                    stats.busy,
                    stats.lb_factor,
                );
            }
            OutputKind::Plain => {
                let _ = writeln!(
                    out,
                    "Node: [{id}],Name: {},Balancer: {},LBGroup: {},Host: {},Port: {},Type: {},\
                     Flushpackets: {},Flushwait: {},Ping: {},Smax: {},Ttl: {},\
                     Elected: {},Read: {},Transfered: {},Connected: {},Load: {}",
                    mess.jvm_route,
                    mess.balancer,
                    mess.domain,
                    mess.host,
                    mess.port,
                    mess.scheme,
                    mess.flush_packets.as_str(),
                    mess.flush_wait_ms,
                    mess.ping_secs,
                    mess.smax,
                    mess.ttl_secs,
                    stats.elected,
                    stats.read_bytes,
                    stats.transferred,
                    stats.busy,
                    stats.lb_factor,
                );
            }
        }
    }

    if kind == OutputKind::Xml {
        out.push_str("</Nodes><Vhosts>");
    }
    for (id, host) in guard.list_hosts() {
        match kind {
            OutputKind::Xml => {
                let _ = write!(
                    out,
                    "<Vhost id=\"{}\" alias=\"{}\"><Node id=\"{}\"/></Vhost>",
                    host.vhost, host.alias, host.node,
                );
            }
            OutputKind::Plain => {
                let _ = writeln!(
                    out,
                    "Vhost: [{}:{}:{id}], Alias: {}",
                    host.node, host.vhost, host.alias,
                );
            }
        }
    }

    if kind == OutputKind::Xml {
        out.push_str("</Vhosts><Contexts>");
    }
    for (id, context) in guard.list_contexts() {
        match kind {
            OutputKind::Xml => {
                let _ = write!(
                    out,
                    "<Context id=\"{id}\"><Status id=\"{}\">{}</Status><Context>{}</Context>\
                     <Node id=\"{}\"/><Vhost id=\"{}\"/></Context>",
                    context.status.as_wire(),
                    context.status.as_str(),
                    context.path,
                    context.node,
                    context.vhost,
                );
            }
            OutputKind::Plain => {
                let _ = writeln!(
                    out,
                    "Context: [{}:{}:{id}], Context: {}, Status: {}",
                    context.node,
                    context.vhost,
                    context.path,
                    context.status.as_str(),
                );
            }
        }
    }
    if kind == OutputKind::Xml {
        out.push_str("</Contexts></Info>");
    }
    out
}

/// Render a VERSION response.
pub fn process_version(kind: OutputKind) -> String {
    match kind {
        OutputKind::Xml => format!(
            "{XML_PROLOGUE}<version><release>{VERSION_RELEASE}</release>\
             <protocol>{VERSION_PROTOCOL}</protocol></version>\n"
        ),
        OutputKind::Plain => {
            format!("release: {VERSION_RELEASE}, protocol: {VERSION_PROTOCOL}\n")
        }
    }
}
