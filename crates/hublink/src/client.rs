//! Client agent: one outbound connection to the hub, a periodic heartbeat,
//! and a decrementing liveness counter watching the hub's reachability.

use crate::callback::{CallbackSlot, TimeoutHandler};
use crate::error::LinkError;
use crate::pacer::run_every;
use crate::state::StateCell;
use async_trait::async_trait;
use bytes::Bytes;
use hublink_types::{Envelope, Identity, LinkConfig};
use hublink_wire::{ClientSocket, DialerSocket, Endpoint, WireError};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Application hook for inbound messages on the client side.
///
/// Clients never receive pings, so every inbound envelope is delivered here
/// unfiltered.
#[async_trait]
pub trait ClientHandle: Send + Sync + 'static {
    async fn on_message(&self, message: Envelope);
}

/// The client agent.
///
/// Owns one outbound link to the hub. [`start`](Self::start) runs the
/// heartbeat pacer and the receive loop concurrently and returns only after
/// [`close`](Self::close); `close` may be called from any task, including a
/// signal handler.
pub struct ClientNode {
    identity: Identity,
    /// Per-process incarnation id, carried in every ping. A restart behind
    /// the same identity gets a fresh one, which is how the hub detects
    /// reconnection.
    instance: Uuid,
    config: LinkConfig,
    socket: Arc<dyn ClientSocket>,
    liveness: AtomicI64,
    state: StateCell,
    shutdown: watch::Sender<bool>,
    timeout_handler: CallbackSlot<TimeoutHandler>,
}

impl ClientNode {
    /// Dial the hub at `endpoint`. Unreachable or invalid endpoints fail
    /// here, synchronously; nothing is retried at setup time.
    pub async fn connect(
        identity: Identity,
        endpoint: &Endpoint,
        config: LinkConfig,
    ) -> Result<Self, LinkError> {
        let socket = DialerSocket::connect(identity.clone(), endpoint).await?;
        Ok(Self::with_socket(identity, Arc::new(socket), config))
    }

    /// Build a client over an already-established socket. This is the seam
    /// tests use to inject a scripted transport.
    pub fn with_socket(
        identity: Identity,
        socket: Arc<dyn ClientSocket>,
        config: LinkConfig,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        let liveness = AtomicI64::new(i64::from(config.max_liveness));
        Self {
            identity,
            instance: Uuid::new_v4(),
            config,
            socket,
            liveness,
            state: StateCell::new(),
            shutdown,
            timeout_handler: CallbackSlot::new(),
        }
    }

    /// This client's identity.
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// This client's per-process instance id.
    pub fn instance(&self) -> Uuid {
        self.instance
    }

    /// Register the timeout callback, fired once when the hub becomes
    /// unreachable. Registering replaces any previous handler; `None`
    /// clears it.
    pub fn on_timeout(&self, handler: Option<TimeoutHandler>) {
        self.timeout_handler.set(handler);
    }

    /// Run the heartbeat and receive loops until [`close`](Self::close).
    ///
    /// Both loops terminate on close and `start` waits for both before
    /// returning.
    pub async fn start(&self, handler: Arc<dyn ClientHandle>) -> Result<(), LinkError> {
        self.state
            .begin_running()
            .map_err(|current| LinkError::InvalidState {
                current: current.as_str(),
                operation: "start",
            })?;
        info!(identity = %self.identity, instance = %self.instance, "Client running");

        let heartbeat = run_every(
            self.config.ping_interval(),
            self.shutdown.subscribe(),
            || self.heartbeat(),
        );
        let receive = self.receive_loop(handler);
        tokio::join!(heartbeat, receive);

        debug!(identity = %self.identity, "Client stopped");
        Ok(())
    }

    /// Submit an application envelope, fire and forget.
    ///
    /// The reserved `"ping"` event is rejected (heartbeats are emitted
    /// internally). Transport failures never propagate to the caller: a
    /// successful submission re-arms the liveness counter, everything else
    /// is logged.
    pub async fn send(&self, envelope: &Envelope) {
        if envelope.is_ping() {
            warn!(identity = %self.identity, "\"ping\" is protocol-reserved, message dropped");
            return;
        }
        self.submit(envelope).await;
    }

    /// Stop both loops and release the connection. Idempotent; unblocks a
    /// concurrent [`start`](Self::start) promptly.
    pub fn close(&self) {
        if self.state.close() {
            debug!(identity = %self.identity, "Client closing");
        }
        let _ = self.shutdown.send(true);
        self.socket.close();
    }

    /// Emit one heartbeat through the shared submission path.
    async fn heartbeat(&self) {
        self.submit(&Envelope::ping(self.instance)).await;
    }

    /// One submission path for heartbeats and application messages, so both
    /// share the liveness bookkeeping.
    async fn submit(&self, envelope: &Envelope) {
        let payload = match envelope.encode() {
            Ok(bytes) => Bytes::from(bytes),
            Err(e) => {
                warn!(identity = %self.identity, error = %e, "Envelope encoding failed");
                return;
            }
        };

        match self.socket.try_send(payload) {
            Ok(()) => {
                self.liveness
                    .store(i64::from(self.config.max_liveness), Ordering::SeqCst);
            }
            Err(e) if e.is_transient() => {
                if envelope.is_ping() {
                    self.heartbeat_dropped().await;
                } else {
                    warn!(
                        identity = %self.identity,
                        event = %envelope.event,
                        error = %e,
                        "Could not send message"
                    );
                }
            }
            Err(WireError::Closed) => {
                // Expected when a send races the final teardown.
                debug!(identity = %self.identity, "Send after close dropped");
            }
            Err(e) => {
                warn!(identity = %self.identity, error = %e, "Send failed");
            }
        }
    }

    /// Account one dropped heartbeat. The unreachable transition is
    /// edge-triggered: it fires on the decrement that lands exactly on
    /// zero, and further drops only count down silently.
    async fn heartbeat_dropped(&self) {
        let liveness = self.liveness.fetch_sub(1, Ordering::SeqCst) - 1;

        if liveness >= 0 {
            info!(
                identity = %self.identity,
                liveness,
                from_max = liveness + 1 == i64::from(self.config.max_liveness),
                interval_ms = self.config.ping_interval_ms,
                "Heartbeat dropped"
            );
        }

        if liveness == 0 {
            error!(identity = %self.identity, "Hub seems unavailable now");
            if let Some(handler) = self.timeout_handler.get() {
                handler().await;
            }
        }
    }

    async fn receive_loop(&self, handler: Arc<dyn ClientHandle>) {
        let mut shutdown = self.shutdown.subscribe();
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                received = self.socket.recv() => match received {
                    Ok(bytes) => match Envelope::decode(&bytes) {
                        Ok(envelope) => handler.on_message(envelope).await,
                        Err(e) => {
                            warn!(identity = %self.identity, error = %e, "Dropping malformed message");
                        }
                    },
                    Err(WireError::Closed) => {
                        // Quiet during an orderly close; anything else is a
                        // fatal transport loss that ends the agent.
                        if self.state.close() {
                            warn!(identity = %self.identity, "Transport closed, terminating");
                            let _ = self.shutdown.send(true);
                            self.socket.close();
                        }
                        break;
                    }
                    Err(e) => {
                        warn!(identity = %self.identity, error = %e, "Receive failed");
                    }
                }
            }
        }
    }
}
