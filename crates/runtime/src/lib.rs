//! herd Runtime - Session lifecycle, identity cache, and transports
//!
//! This crate provides the machinery that keeps one keepalive session alive
//! per configured network identity:
//!
//! - **Proxy descriptors**: Parsed proxy bindings with redacted display and
//!   stable fingerprints
//! - **Identity cache**: Durable fingerprint -> device-id mapping shared by
//!   all sessions
//! - **Transport probe**: Reachability and external-IP resolution before the
//!   long-lived connection is opened
//! - **Tunnel**: Contract (and default implementation) for dialing through
//!   a bound proxy
//! - **Session**: The per-identity connection state machine
//! - **Supervisor**: One independent task per identity, no shared fate
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐
//! │   herd-cli   │  Config, logging, entry point
//! └──────┬───────┘
//! ┌──────▼───────┐
//! │ herd-runtime │  This crate
//! │ ┌──────────┐ │
//! │ │Supervisor│ │  One task per identity
//! │ └──────────┘ │
//! │ ┌──────────┐ │
//! │ │ Session  │ │  Probe -> connect -> auth/heartbeat -> restart
//! │ └──────────┘ │
//! │ ┌──────────┐ │
//! │ │ Tunnel   │ │  Direct / SOCKS5 / HTTP CONNECT
//! │ └──────────┘ │
//! └──────────────┘
//! ```
//!
//! Sessions never share mutable state except the [`IdentityCache`], which
//! supports concurrent per-key get-or-create.

pub mod error;
pub mod identity;
pub mod probe;
pub mod proxy;
pub mod session;
pub mod supervisor;
pub mod transport;

// Re-export key types at crate root
pub use error::{Error, Result};
pub use identity::IdentityCache;
pub use probe::{ProbeError, ProbeInfo, probe};
pub use proxy::{ProxyDescriptor, ProxyScheme, fingerprint};
pub use session::{Session, SessionConfig};
pub use supervisor::{Identity, Supervisor};
pub use transport::{BoxedStream, NetTunnel, Tunnel};
