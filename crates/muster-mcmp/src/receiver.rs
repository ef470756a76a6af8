//! The MCMP receiver: an axum service dispatching on the request method.
//!
//! MCMP overloads the HTTP method with its verbs (`CONFIG`,
//! `ENABLE-APP`, …), so the receiver is a single fallback handler that
//! inspects the extension method rather than a per-path route table. A
//! URL of `*` or ending in `/*` elevates the `*-APP` verbs to node
//! scope.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use tracing::{debug, error};

use crate::app_cmd::{self, Scope};
use crate::config_cmd::process_config;
use crate::error::McmpError;
use crate::parser::parse_pairs;
use crate::report::{self, OutputKind};
use crate::status_cmd;
use crate::{ManagerState, VERSION_PROTOCOL};

/// All methods the receiver recognises, including the ones it answers
/// with "not supported".
const MCMP_METHODS: &[&str] = &[
    "CONFIG",
    "ENABLE-APP",
    "DISABLE-APP",
    "STOP-APP",
    "REMOVE-APP",
    "STATUS",
    "DUMP",
    "ERROR",
    "INFO",
    "PING",
    "ADDID",
    "REMOVEID",
    "QUERY",
    "VERSION",
];

/// Build the receiver router. Mount it at the virtual-host root.
pub fn build_receiver(state: ManagerState) -> Router {
    Router::new().fallback(handle_mcmp).with_state(state)
}

/// Body produced by a successful command, if any.
type CommandBody = Option<(OutputKind, String)>;

async fn handle_mcmp(
    State(state): State<ManagerState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let verb = method.as_str().to_ascii_uppercase();
    if !MCMP_METHODS.contains(&verb.as_str()) {
        return StatusCode::NOT_FOUND.into_response();
    }

    // The URL decides the scope of the *-APP verbs.
    let path = uri.path();
    let scope = if path == "*" || path.ends_with("/*") {
        Scope::Node
    } else {
        Scope::Context
    };

    // Bound the message like the original receiver: read at most the
    // configured maximum and parse what fits.
    let limit = state.settings.max_mess_size.max(1024);
    let body = &body[..body.len().min(limit)];
    let text = match std::str::from_utf8(body) {
        Ok(text) => text,
        Err(_) => return error_response(&verb, &McmpError::mess_parse()),
    };
    debug!(%verb, %path, body = %text, "processing MCMP request");

    let pairs = match parse_pairs(text) {
        Ok(pairs) => pairs,
        Err(err) => return error_response(&verb, &err),
    };

    let accept = headers.get("accept").and_then(|v| v.to_str().ok());
    let kind = OutputKind::from_accept(accept);

    let result: Result<CommandBody, McmpError> = match verb.as_str() {
        "CONFIG" => process_config(&state, &pairs).map(|()| None),
        "ENABLE-APP" => app_cmd::process_enable(&state, &pairs, scope).map(plain),
        "DISABLE-APP" => app_cmd::process_disable(&state, &pairs, scope).map(plain),
        "STOP-APP" => app_cmd::process_stop(&state, &pairs, scope, true).map(plain),
        "REMOVE-APP" => app_cmd::process_remove(&state, &pairs, scope).map(plain),
        "STATUS" => status_cmd::process_status(&state, &pairs)
            .await
            .map(|body| Some((OutputKind::Plain, body))),
        "PING" => status_cmd::process_ping(&state, &pairs)
            .await
            .map(|body| Some((OutputKind::Plain, body))),
        "DUMP" => Ok(Some((kind, report::process_dump(&state, kind)))),
        "INFO" => Ok(Some((kind, report::process_info(&state, kind)))),
        "VERSION" => Ok(Some((kind, report::process_version(kind)))),
        // Recognised but unimplemented.
        _ => Err(McmpError::command_unsupported()),
    };

    match result {
        Ok(None) => StatusCode::OK.into_response(),
        Ok(Some((kind, body))) => (
            StatusCode::OK,
            [("content-type", kind.content_type())],
            body,
        )
            .into_response(),
        Err(err) => error_response(&verb, &err),
    }
}

fn plain(body: Option<String>) -> CommandBody {
    body.map(|body| (OutputKind::Plain, body))
}

/// Build the HTTP 500 error response with the protocol's headers.
fn error_response(method: &str, err: &McmpError) -> Response {
    error!(method, error = %err.message, "command failed");
    // Header values cannot carry control characters.
    let mess = err.message.replace(|c: char| c.is_control(), " ");
    let mut response = StatusCode::INTERNAL_SERVER_ERROR.into_response();
    let headers = response.headers_mut();
    headers.insert("Version", HeaderValue::from_static(VERSION_PROTOCOL));
    headers.insert(
        "Type",
        HeaderValue::from_static(err.kind.as_str()),
    );
    if let Ok(value) = HeaderValue::from_str(&mess) {
        headers.insert("Mess", value);
    }
    response
}
