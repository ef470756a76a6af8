//! Endpoint liveness probes.
//!
//! AJP back-ends are probed with a bare TCP connect; HTTP-family
//! back-ends additionally get an `OPTIONS *` request over the open
//! connection. Either way the probe is bounded by a timeout.

use std::time::Duration;

use tracing::debug;

/// Result of a single liveness probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeResult {
    /// The endpoint accepted the probe.
    Up,
    /// The endpoint answered but not successfully.
    Down,
    /// The probe could not be executed (connect error or timeout).
    Failed,
}

impl ProbeResult {
    pub fn is_up(&self) -> bool {
        matches!(self, ProbeResult::Up)
    }
}

/// Probe `scheme://host:port` for liveness.
pub async fn probe_endpoint(scheme: &str, host: &str, port: &str, timeout: Duration) -> ProbeResult {
    let address = format!("{host}:{port}");

    let result = tokio::time::timeout(timeout, async {
        let stream = match tokio::net::TcpStream::connect(&address).await {
            Ok(s) => s,
            Err(e) => {
                debug!(error = %e, %address, "probe connect failed");
                return ProbeResult::Failed;
            }
        };

        // A reachable AJP connector is all a cping can establish here.
        if scheme == "ajp" {
            return ProbeResult::Up;
        }

        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = match hyper::client::conn::http1::handshake(io).await {
            Ok(pair) => pair,
            Err(e) => {
                debug!(error = %e, %address, "probe handshake failed");
                return ProbeResult::Failed;
            }
        };

        // Drive the connection in the background.
        tokio::spawn(async move {
            let _ = conn.await;
        });

        let req = http::Request::builder()
            .method("OPTIONS")
            .uri(format!("http://{address}/"))
            .header("host", &address)
            .header("user-agent", "muster-probe/0.3")
            .body(http_body_util::Empty::<bytes::Bytes>::new())
            .expect("static probe request");

        match sender.send_request(req).await {
            Ok(resp) if resp.status().is_success() => ProbeResult::Up,
            Ok(resp) => {
                debug!(status = %resp.status(), %address, "probe non-2xx");
                ProbeResult::Down
            }
            Err(e) => {
                debug!(error = %e, %address, "probe request failed");
                ProbeResult::Failed
            }
        }
    })
    .await;

    match result {
        Ok(probe) => probe,
        Err(_) => {
            debug!(%address, "probe timed out");
            ProbeResult::Failed
        }
    }
}
