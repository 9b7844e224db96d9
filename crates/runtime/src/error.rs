//! Error types for the herd runtime.

use thiserror::Error;

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the herd runtime.
#[derive(Debug, Error)]
pub enum Error {
    /// A proxy URL could not be parsed into a descriptor.
    #[error("Invalid proxy: {0}")]
    InvalidProxy(String),

    /// Failed to dial through the configured tunnel.
    #[error("Tunnel connect failed: {0}")]
    Tunnel(String),

    /// SOCKS5 negotiation with the proxy failed.
    #[error("SOCKS error: {0}")]
    Socks(#[from] tokio_socks::Error),

    /// WebSocket-level error (handshake or mid-session).
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The identity store could not be read or written.
    #[error("Identity store error: {0}")]
    Store(String),
}
