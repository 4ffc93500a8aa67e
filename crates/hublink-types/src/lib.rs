//! Shared protocol types for hublink.
//!
//! This crate defines the data model both sides of the heartbeat protocol
//! agree on:
//!
//! - **Envelope**: the JSON wire unit, an event tag plus an arbitrary payload.
//!   Exactly one event value, `"ping"`, is protocol-internal.
//! - **Identity**: the opaque byte string a client presents to the hub.
//! - **LinkConfig**: explicit, immutable configuration shared by both agents.

pub mod config;
pub mod envelope;
pub mod identity;

pub use config::LinkConfig;
pub use envelope::{Envelope, PING_EVENT};
pub use identity::Identity;
