//! Identity-addressed message transport for hublink.
//!
//! The protocol core consumes this layer through two small traits:
//! [`ClientSocket`] (one outbound link to the hub) and [`HubSocket`] (one
//! listening endpoint receiving from many clients, each message tagged with
//! the sender's identity). Sends are non-blocking and drop under
//! backpressure; receives suspend only while no message is available.
//!
//! The tokio implementations ([`DialerSocket`], [`ListenerSocket`]) speak a
//! simple framed protocol over TCP or Unix sockets: each frame is a 4-byte
//! big-endian length followed by the payload, and the first frame on every
//! connection carries the client's identity.

pub mod dialer;
pub mod endpoint;
pub mod frame;
pub mod listener;
pub mod socket;

pub use dialer::DialerSocket;
pub use endpoint::Endpoint;
pub use listener::ListenerSocket;
pub use socket::{ClientSocket, HubSocket, WireError, SEND_QUEUE_DEPTH};
