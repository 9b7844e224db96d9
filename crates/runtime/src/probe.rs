//! Transport probe: reachability and external-IP resolution.
//!
//! Before a session opens its long-lived connection it makes one HTTP
//! request through the bound proxy (or directly) to the configured
//! "what is my IP" endpoint. A successful probe proves the transport works
//! and resolves the externally visible IP and geolocation for logging.
//!
//! Failures are classified to drive the retry policy:
//!
//! - [`ProbeError::Reset`] - transient network reset, re-probed in place
//!   after [`RESET_COOLDOWN`]
//! - [`ProbeError::Throttled`] - gateway overload (HTTP 502), the whole
//!   cycle retries after [`THROTTLE_COOLDOWN`]
//! - [`ProbeError::Other`] - no retry is scheduled at this layer; the
//!   session loop decides

use std::time::Duration;

use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

use crate::proxy::ProxyDescriptor;

/// Cooldown before re-probing after a connection reset.
pub const RESET_COOLDOWN: Duration = Duration::from_secs(60);

/// Cooldown before restarting the cycle after gateway throttling.
pub const THROTTLE_COOLDOWN: Duration = Duration::from_secs(600);

/// Externally visible address and location resolved by the probe.
#[derive(Debug, Clone, Deserialize)]
pub struct ProbeInfo {
    pub ip: String,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
}

impl ProbeInfo {
    /// Human-readable location label for logging.
    pub fn location(&self) -> String {
        match (&self.city, &self.country) {
            (Some(city), Some(country)) => format!("{city} ({country})"),
            (Some(city), None) => city.clone(),
            (None, Some(country)) => country.clone(),
            (None, None) => "unknown".to_string(),
        }
    }
}

/// Classified probe failure.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// Connection abruptly reset somewhere on the path.
    #[error("connection reset during probe")]
    Reset,

    /// Gateway signalled overload with HTTP 502.
    #[error("gateway throttled the probe (502)")]
    Throttled,

    /// Anything else: DNS failure, refused connection, bad proxy, etc.
    #[error("probe request failed: {0}")]
    Other(reqwest::Error),
}

/// Probes the transport and resolves the external IP/geo.
///
/// One GET through the resolved transport with the fixed
/// `Accept-Encoding: gzip` header. Logs the redacted proxy on both success
/// and failure.
pub async fn probe(
    ip_check_url: &str,
    proxy: Option<&ProxyDescriptor>,
) -> std::result::Result<ProbeInfo, ProbeError> {
    let mut builder = reqwest::Client::builder();
    if let Some(p) = proxy {
        let upstream = reqwest::Proxy::all(p.authority_url()).map_err(ProbeError::Other)?;
        builder = builder.proxy(upstream);
    }
    let client = builder.build().map_err(ProbeError::Other)?;

    let result = async {
        let response = client
            .get(ip_check_url)
            .header(reqwest::header::ACCEPT_ENCODING, "gzip")
            .send()
            .await?
            .error_for_status()?;
        response.json::<ProbeInfo>().await
    }
    .await;

    match result {
        Ok(info) => {
            match proxy {
                Some(p) => tracing::info!(proxy = %p, ip = %info.ip, "proxy connected"),
                None => tracing::info!(ip = %info.ip, "direct egress resolved"),
            }
            Ok(info)
        }
        Err(err) => {
            let classified = classify(err);
            match proxy {
                Some(p) => {
                    tracing::warn!(proxy = %p, error = %classified, "skipping proxy this cycle")
                }
                None => tracing::warn!(error = %classified, "direct probe failed"),
            }
            Err(classified)
        }
    }
}

fn classify(err: reqwest::Error) -> ProbeError {
    if err.status() == Some(StatusCode::BAD_GATEWAY) {
        return ProbeError::Throttled;
    }
    if chain_has_reset(&err) {
        return ProbeError::Reset;
    }
    ProbeError::Other(err)
}

/// Walks the error source chain looking for a connection-reset I/O error.
fn chain_has_reset(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut current: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(e) = current {
        if let Some(io) = e.downcast_ref::<std::io::Error>() {
            if io.kind() == std::io::ErrorKind::ConnectionReset {
                return true;
            }
        }
        current = e.source();
    }
    false
}
