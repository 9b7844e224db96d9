//! Connection session: the per-identity lifecycle state machine.
//!
//! One [`Session`] owns one long-lived connection for one identity and
//! cycles through PROBING -> CONNECTING -> ACTIVE -> CLOSING forever. A
//! cycle ends when the connection closes or a failure is classified; the
//! supervisor's restart loop decides the pause before the next cycle from
//! the returned [`CycleEnd`].
//!
//! # Connection wiring
//!
//! While ACTIVE the WebSocket is split: a writer task owns the sink half
//! and drains an unbounded mpsc queue, the session's read loop owns the
//! stream half, and the heartbeat task feeds the queue every
//! [`HEARTBEAT_PERIOD`]. The heartbeat handle is stored on the session and
//! aborted on every path that ends the connection, so at most one timer is
//! ever live per session.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures_util::{SinkExt, StreamExt};
use herd_protocol::{
    AuthReply, AuthResult, CLIENT_VERSION, DEVICE_TYPE, Inbound, Ping, ServerRequest, USER_AGENT,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::identity::IdentityCache;
use crate::probe::{self, ProbeError};
use crate::proxy::{self, ProxyDescriptor};
use crate::transport::{BoxedStream, Tunnel};

/// Heartbeat period while a connection is active.
pub const HEARTBEAT_PERIOD: Duration = Duration::from_secs(120);

/// Per-run connection parameters shared by all sessions.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// "what is my IP" endpoint used by the transport probe.
    pub ip_check_url: String,
    /// Gateway host for the long-lived connection (`wss://{wss_host}`).
    pub wss_host: String,
}

/// How a connection cycle ended; drives the supervisor's restart pacing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleEnd {
    /// The connection was active and then closed or errored. Reconnect
    /// immediately; only the probe layer paces the next attempt.
    Closed,
    /// The gateway throttled the probe. Retry the full cycle after the
    /// long cooldown.
    Throttled,
    /// The probe or the connection attempt failed without classification.
    /// Retry after the short cooldown.
    Abandoned,
}

/// One identity's session state, created once and reused across every
/// connection attempt for the process lifetime.
pub struct Session {
    user_id: String,
    proxy: Option<ProxyDescriptor>,
    fingerprint: String,
    label: String,
    config: Arc<SessionConfig>,
    cache: Arc<IdentityCache>,
    tunnel: Arc<dyn Tunnel>,
    /// Live heartbeat task, if any. Owned exclusively by this session and
    /// aborted before a new one is armed.
    heartbeat: Option<JoinHandle<()>>,
}

impl Session {
    /// Binds a session to one identity and its (optional) proxy.
    pub fn new(
        user_id: String,
        proxy: Option<ProxyDescriptor>,
        config: Arc<SessionConfig>,
        cache: Arc<IdentityCache>,
        tunnel: Arc<dyn Tunnel>,
    ) -> Self {
        let fingerprint = proxy::fingerprint(proxy.as_ref());
        let label = match &proxy {
            Some(p) => format!("{user_id}@{p}"),
            None => format!("{user_id}@direct"),
        };
        Self {
            user_id,
            proxy,
            fingerprint,
            label,
            config,
            cache,
            tunnel,
            heartbeat: None,
        }
    }

    /// Cache key identifying this session's network path.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Redacted human-readable identity label for logging.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Runs one full connection cycle: probe, connect, then serve the
    /// connection until it ends.
    pub async fn cycle(&mut self) -> CycleEnd {
        // PROBING. A reset-class failure re-probes in place indefinitely;
        // the other classes hand pacing back to the restart loop.
        let info = loop {
            match probe::probe(&self.config.ip_check_url, self.proxy.as_ref()).await {
                Ok(info) => break info,
                Err(ProbeError::Reset) => {
                    warn!(session = %self.label, "connection reset; re-probing in 60s");
                    tokio::time::sleep(probe::RESET_COOLDOWN).await;
                }
                Err(ProbeError::Throttled) => {
                    warn!(session = %self.label, "gateway throttled; backing off 10 minutes");
                    return CycleEnd::Throttled;
                }
                Err(err) => {
                    warn!(session = %self.label, error = %err, "probe failed; ending this cycle");
                    return CycleEnd::Abandoned;
                }
            }
        };

        // CONNECTING.
        let ws = match self.open_connection().await {
            Ok(ws) => ws,
            Err(err) => {
                error!(session = %self.label, error = %err, "failed to open connection");
                return CycleEnd::Abandoned;
            }
        };
        info!(
            session = %self.label,
            ip = %info.ip,
            location = %info.location(),
            "connection established"
        );

        // ACTIVE until close or error, then CLOSING.
        self.drive(ws).await;
        CycleEnd::Closed
    }

    async fn open_connection(&self) -> Result<WebSocketStream<MaybeTlsStream<BoxedStream>>> {
        let stream = self.tunnel.connect(&self.config.wss_host, 443).await?;

        let mut request = format!("wss://{}", self.config.wss_host).into_client_request()?;
        request
            .headers_mut()
            .insert("User-Agent", HeaderValue::from_static(USER_AGENT));

        let (ws, _response) = tokio_tungstenite::client_async_tls(request, stream).await?;
        Ok(ws)
    }

    /// Serves an established connection until it closes or errors.
    ///
    /// Generic over the underlying stream so tests can drive it over an
    /// in-memory duplex pipe.
    pub(crate) async fn drive<S>(&mut self, ws: WebSocketStream<S>)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (mut sink, mut stream) = ws.split();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();

        // Writer task: sole owner of the sink half.
        let writer = tokio::spawn(async move {
            while let Some(text) = outbound_rx.recv().await {
                if let Err(err) = sink.send(Message::Text(text)).await {
                    debug!(error = %err, "outbound write failed; stopping writer");
                    break;
                }
            }
        });

        // Heartbeat starts at connection open, not gated on AUTH.
        self.arm_heartbeat(outbound_tx.clone());

        while let Some(frame) = stream.next().await {
            match frame {
                Ok(Message::Text(text)) => self.handle_frame(&text, &outbound_tx),
                Ok(Message::Close(close)) => {
                    match close {
                        Some(f) => info!(
                            session = %self.label,
                            code = %f.code,
                            reason = %f.reason,
                            "connection closed"
                        ),
                        None => info!(session = %self.label, "connection closed"),
                    }
                    break;
                }
                Ok(_) => {}
                Err(err) => {
                    error!(session = %self.label, error = %err, "connection error; terminating");
                    break;
                }
            }
        }

        // CLOSING. The heartbeat dies first so no ping can be queued
        // against the dead connection, then the writer is torn down.
        self.cancel_heartbeat();
        drop(outbound_tx);
        writer.abort();
        let _ = writer.await;
    }

    fn handle_frame(&self, raw: &str, outbound: &mpsc::UnboundedSender<String>) {
        let inbound: Inbound = match serde_json::from_str(raw) {
            Ok(m) => m,
            Err(err) => {
                warn!(session = %self.label, error = %err, "malformed inbound frame; ignoring");
                return;
            }
        };

        match inbound {
            Inbound::Request(ServerRequest::Auth { id }) => {
                debug!(session = %self.label, id = %id, "auth challenge received");
                self.answer_auth(id, outbound);
            }
            Inbound::Request(ServerRequest::Pong { id }) => {
                debug!(session = %self.label, id = %id, "pong received");
            }
            Inbound::Unknown(value) => {
                debug!(session = %self.label, frame = %value, "unrecognized inbound frame; ignoring");
            }
        }
    }

    fn answer_auth(&self, id: serde_json::Value, outbound: &mpsc::UnboundedSender<String>) {
        let browser_id = match self.cache.get_or_create(&self.fingerprint) {
            Ok(id) => id,
            Err(err) => {
                error!(session = %self.label, error = %err, "identity lookup failed; auth unanswered");
                return;
            }
        };

        let reply = AuthReply::new(
            id,
            AuthResult {
                browser_id,
                user_id: self.user_id.clone(),
                user_agent: USER_AGENT.to_string(),
                timestamp: unix_now(),
                device_type: DEVICE_TYPE.to_string(),
                version: CLIENT_VERSION.to_string(),
            },
        );

        match serde_json::to_string(&reply) {
            Ok(json) => {
                if outbound.send(json).is_ok() {
                    info!(session = %self.label, "auth reply sent");
                }
            }
            Err(err) => {
                error!(session = %self.label, error = %err, "failed to encode auth reply");
            }
        }
    }

    fn arm_heartbeat(&mut self, outbound: mpsc::UnboundedSender<String>) {
        // Invariant: never two live timers for one session.
        self.cancel_heartbeat();

        let label = self.label.clone();
        self.heartbeat = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(HEARTBEAT_PERIOD);
            // The first tick of an interval completes immediately.
            interval.tick().await;
            loop {
                interval.tick().await;
                let ping = Ping::new();
                let json = match serde_json::to_string(&ping) {
                    Ok(json) => json,
                    Err(err) => {
                        error!(session = %label, error = %err, "failed to encode ping");
                        continue;
                    }
                };
                if outbound.send(json).is_err() {
                    // Writer gone, the connection is over.
                    break;
                }
                debug!(session = %label, id = %ping.id, "ping sent");
            }
        }));
    }

    fn cancel_heartbeat(&mut self) {
        if let Some(handle) = self.heartbeat.take() {
            handle.abort();
        }
    }

    #[cfg(test)]
    fn heartbeat_active(&self) -> bool {
        self.heartbeat
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
