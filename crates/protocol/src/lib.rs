//! Wire types for the herd keepalive protocol.
//!
//! This crate contains the serde-serializable types exchanged with the
//! gateway over the long-lived WebSocket connection. These types represent
//! the "protocol layer" - the shapes of data as they appear on the wire.
//!
//! # Design Philosophy
//!
//! Types in this crate are:
//! - **Pure data**: No behavior beyond serialization/deserialization and
//!   trivial constructors
//! - **1:1 with the wire**: Field names match the JSON the gateway expects
//! - **Stable**: Changes only when the wire protocol changes
//!
//! Connection lifecycle and dispatch are built on top of these types in
//! `herd-runtime`.

pub mod messages;

pub use messages::*;
