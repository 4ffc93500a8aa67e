//! Hub agent: a listening endpoint, a per-client liveness registry, and a
//! periodic sweep that ages out silent clients.

use crate::callback::{CallbackSlot, ConnectionHandler, HubTimeoutHandler};
use crate::error::LinkError;
use crate::pacer::run_every;
use crate::registry::{ServiceRegistry, ServiceStatus};
use crate::state::StateCell;
use async_trait::async_trait;
use bytes::Bytes;
use hublink_types::{Envelope, Identity, LinkConfig};
use hublink_wire::{Endpoint, HubSocket, ListenerSocket, WireError};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Application hook for inbound messages on the hub side.
///
/// Ping envelopes are absorbed by the protocol and never delivered here;
/// everything else arrives unchanged, tagged with the sender's identity.
#[async_trait]
pub trait HubHandle: Send + Sync + 'static {
    async fn on_message(&self, sender: Identity, message: Envelope);
}

/// The hub agent.
///
/// Accepts messages from many clients over one listening endpoint. Every
/// inbound message counts as an implicit heartbeat for its sender; the
/// sweep loop ages out identities that go silent.
pub struct HubNode {
    config: LinkConfig,
    socket: Arc<dyn HubSocket>,
    registry: ServiceRegistry,
    local_addr: Option<SocketAddr>,
    state: StateCell,
    shutdown: watch::Sender<bool>,
    timeout_handler: CallbackSlot<HubTimeoutHandler>,
    connection_handler: CallbackSlot<ConnectionHandler>,
}

impl HubNode {
    /// Bind the listening endpoint. Bind failures (address in use, bad
    /// path) fail here, synchronously.
    pub async fn bind(endpoint: &Endpoint, config: LinkConfig) -> Result<Self, LinkError> {
        let socket = ListenerSocket::bind(endpoint).await?;
        let local_addr = socket.local_addr();
        let mut node = Self::with_socket(Arc::new(socket), config);
        node.local_addr = local_addr;
        Ok(node)
    }

    /// Build a hub over an already-bound socket. This is the seam tests use
    /// to inject a scripted transport.
    pub fn with_socket(socket: Arc<dyn HubSocket>, config: LinkConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            socket,
            registry: ServiceRegistry::new(),
            local_addr: None,
            state: StateCell::new(),
            shutdown,
            timeout_handler: CallbackSlot::new(),
            connection_handler: CallbackSlot::new(),
        }
    }

    /// Actual bound address for TCP endpoints (useful when binding port 0).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Point-in-time view of every tracked client.
    pub fn services(&self) -> Vec<ServiceStatus> {
        self.registry.snapshot()
    }

    /// Register the timeout callback, fired once per client dead
    /// transition. Registering replaces any previous handler; `None`
    /// clears it.
    pub fn on_timeout(&self, handler: Option<HubTimeoutHandler>) {
        self.timeout_handler.set(handler);
    }

    /// Register the connection callback, fired whenever a client instance
    /// makes first contact (including a restarted process reusing an
    /// existing identity). Same replace/clear semantics as
    /// [`on_timeout`](Self::on_timeout).
    pub fn on_connection(&self, handler: Option<ConnectionHandler>) {
        self.connection_handler.set(handler);
    }

    /// Run the sweep and receive loops until [`close`](Self::close).
    ///
    /// Both loops terminate on close and `start` waits for both before
    /// returning.
    pub async fn start(&self, handler: Arc<dyn HubHandle>) -> Result<(), LinkError> {
        self.state
            .begin_running()
            .map_err(|current| LinkError::InvalidState {
                current: current.as_str(),
                operation: "start",
            })?;
        info!("Hub running");

        let sweep = run_every(
            self.config.ping_interval(),
            self.shutdown.subscribe(),
            || self.sweep(),
        );
        let receive = self.receive_loop(handler);
        tokio::join!(sweep, receive);

        debug!("Hub stopped");
        Ok(())
    }

    /// Submit an envelope to one client, fire and forget.
    ///
    /// A closed hub silently ignores the call; transient transport
    /// failures (client gone, queue full) are logged and dropped. The
    /// registry is not consulted.
    pub async fn send(&self, destination: &Identity, envelope: &Envelope) {
        if self.state.get() == crate::state::AgentState::Closed {
            return;
        }
        let payload = match envelope.encode() {
            Ok(bytes) => Bytes::from(bytes),
            Err(e) => {
                warn!(client = %destination, error = %e, "Envelope encoding failed");
                return;
            }
        };
        match self.socket.try_send(destination, payload) {
            Ok(()) => {}
            Err(e) if e.is_transient() => {
                debug!(client = %destination, error = %e, "Message dropped");
            }
            Err(WireError::Closed) => {
                debug!(client = %destination, "Send after close dropped");
            }
            Err(e) => {
                warn!(client = %destination, error = %e, "Send failed");
            }
        }
    }

    /// Stop both loops and release the listening socket. Idempotent; safe
    /// to call concurrently with an in-flight sweep or receive.
    pub fn close(&self) {
        if self.state.close() {
            debug!("Hub closing");
        }
        let _ = self.shutdown.send(true);
        self.socket.close();
    }

    /// One sweep pass: age every record, fire the timeout callback once
    /// per dead transition.
    async fn sweep(&self) {
        let timed_out = self
            .registry
            .sweep(self.config.ping_interval(), self.config.max_liveness);
        for identity in timed_out {
            if let Some(handler) = self.timeout_handler.get() {
                handler(identity).await;
            }
        }
    }

    async fn receive_loop(&self, handler: Arc<dyn HubHandle>) {
        let mut shutdown = self.shutdown.subscribe();
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                received = self.socket.recv() => match received {
                    Ok((sender, bytes)) => self.process(sender, &bytes, &handler).await,
                    Err(WireError::Closed) => {
                        if self.state.close() {
                            warn!("Transport closed, terminating");
                            let _ = self.shutdown.send(true);
                            self.socket.close();
                        }
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "Receive failed");
                    }
                }
            }
        }
    }

    /// Handle one inbound message: registry upkeep, ping absorption, and
    /// application delivery.
    async fn process(&self, sender: Identity, bytes: &[u8], handler: &Arc<dyn HubHandle>) {
        let envelope = match Envelope::decode(bytes) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(client = %sender, error = %e, "Dropping malformed message");
                return;
            }
        };

        // Any traffic counts as a heartbeat for its sender.
        self.registry.observe(&sender, self.config.max_liveness);

        if envelope.is_ping() {
            match envelope.ping_instance() {
                Some(instance) => {
                    let transition = self.registry.note_ping(&sender, instance);
                    if transition.instance_changed {
                        debug!(client = %sender, %instance, "Client instance connected");
                        if let Some(handler) = self.connection_handler.get() {
                            handler(sender, true).await;
                        }
                    }
                }
                None => {
                    warn!(client = %sender, "Ping without a valid instance id");
                }
            }
            // Pings are protocol-internal, never forwarded.
            return;
        }

        handler.on_message(sender, envelope).await;
    }
}
