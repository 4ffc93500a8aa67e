//! Socket traits and the transport error taxonomy.

use async_trait::async_trait;
use bytes::Bytes;
use hublink_types::Identity;
use thiserror::Error;

/// Outstanding-message limit on every send queue.
///
/// Once a peer's queue is full, further sends fail with [`WireError::Busy`]
/// instead of blocking; the caller decides what dropping a message means.
pub const SEND_QUEUE_DEPTH: usize = 3;

/// Errors from the transport layer.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("send queue full")]
    Busy,
    #[error("link not established")]
    NotConnected,
    #[error("unknown destination identity: {0}")]
    UnknownIdentity(Identity),
    #[error("socket closed")]
    Closed,
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: u32, max: u32 },
}

impl WireError {
    /// Whether this failure is the recoverable busy/unreachable class: the
    /// message was dropped but the socket remains usable, so the caller may
    /// keep sending. Everything else is either fatal or shutdown-related.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Busy | Self::NotConnected | Self::UnknownIdentity(_)
        )
    }
}

/// Client side of the transport: one outbound link to the hub.
#[async_trait]
pub trait ClientSocket: Send + Sync + 'static {
    /// Queue a payload for the hub without blocking.
    ///
    /// Fails with a transient error when the link is down or the send queue
    /// is full; the payload is dropped in that case.
    fn try_send(&self, payload: Bytes) -> Result<(), WireError>;

    /// Await the next inbound payload. Returns [`WireError::Closed`] once
    /// the socket has been closed and drained.
    async fn recv(&self) -> Result<Bytes, WireError>;

    /// Release the link. Idempotent; callable from any task.
    fn close(&self);
}

/// Hub side of the transport: a listening endpoint shared by many clients.
#[async_trait]
pub trait HubSocket: Send + Sync + 'static {
    /// Queue a payload for one client without blocking.
    fn try_send(&self, destination: &Identity, payload: Bytes) -> Result<(), WireError>;

    /// Await the next inbound payload together with its sender's identity.
    async fn recv(&self) -> Result<(Identity, Bytes), WireError>;

    /// Release the listening endpoint. Idempotent; callable from any task.
    fn close(&self);
}
