//! Liveness-aware client/hub messaging.
//!
//! Two symmetric agents share one heartbeat protocol:
//!
//! - [`ClientNode`] owns one outbound connection to the hub. It runs a
//!   periodic heartbeat sender and a receive loop, and tracks its own belief
//!   about hub reachability with a decrementing liveness counter.
//! - [`HubNode`] owns one listening endpoint accepting messages from many
//!   clients. It runs a receive loop (every inbound message doubles as an
//!   implicit heartbeat) and a periodic sweep that ages out silent clients.
//!
//! Failure detection is coarse and edge-triggered on both sides: the client
//! declares the hub unreachable after `max_liveness` consecutive failed
//! heartbeat sends, the hub declares a client dead after `max_liveness`
//! consecutive sweep intervals without traffic. Each transition fires its
//! registered callback exactly once.
//!
//! ```no_run
//! use hublink::{ClientHandle, ClientNode, Endpoint, Envelope, LinkConfig};
//! use std::sync::Arc;
//!
//! struct Printer;
//!
//! #[async_trait::async_trait]
//! impl ClientHandle for Printer {
//!     async fn on_message(&self, message: Envelope) {
//!         println!("recv: {message:?}");
//!     }
//! }
//!
//! # async fn run() -> Result<(), hublink::LinkError> {
//! let endpoint: Endpoint = "tcp://127.0.0.1:3559".parse()?;
//! let node = ClientNode::connect("svc-1".into(), &endpoint, LinkConfig::default()).await?;
//! node.start(Arc::new(Printer)).await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod hub;
pub mod pacer;
pub mod registry;

mod callback;
mod error;
mod state;

pub use callback::{ConnectionHandler, HubTimeoutHandler, TimeoutHandler};
pub use client::{ClientHandle, ClientNode};
pub use error::LinkError;
pub use hub::{HubHandle, HubNode};
pub use registry::{ServiceRegistry, ServiceStatus};

pub use hublink_types::{Envelope, Identity, LinkConfig, PING_EVENT};
pub use hublink_wire::{Endpoint, WireError};
