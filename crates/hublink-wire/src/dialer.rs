//! Client-side socket: one outbound link to the hub.
//!
//! The socket owns a background connection task that dials the hub, sends
//! the identity handshake frame, then shuttles frames in both directions.
//! If the link drops, the task keeps redialing until the socket is closed;
//! while the link is down, sends fail immediately with
//! [`WireError::NotConnected`] instead of queueing.

use crate::endpoint::Endpoint;
use crate::frame::{read_frame, write_frame};
use crate::socket::{ClientSocket, WireError, SEND_QUEUE_DEPTH};
use async_trait::async_trait;
use bytes::Bytes;
use hublink_types::Identity;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::debug;

/// Delay between redial attempts after the link drops.
const RECONNECT_DELAY: Duration = Duration::from_millis(100);

/// Depth of the inbound queue (hub replies awaiting the receive loop).
const INBOX_DEPTH: usize = 64;

/// Tokio implementation of [`ClientSocket`] over TCP or Unix streams.
pub struct DialerSocket {
    outbox: mpsc::Sender<Bytes>,
    inbox: Mutex<mpsc::Receiver<Bytes>>,
    connected: Arc<AtomicBool>,
    shutdown: watch::Sender<bool>,
}

impl DialerSocket {
    /// Dial the hub and start the connection task.
    ///
    /// The initial dial must succeed; an invalid or unreachable endpoint is
    /// a setup-time fault surfaced to the caller. Later link losses are
    /// handled internally by redialing.
    pub async fn connect(identity: Identity, endpoint: &Endpoint) -> Result<Self, WireError> {
        let stream = endpoint.dial().await?;
        debug!(identity = %identity, endpoint = %endpoint, "Dialed hub");

        let (outbox_tx, outbox_rx) = mpsc::channel(SEND_QUEUE_DEPTH);
        let (inbox_tx, inbox_rx) = mpsc::channel(INBOX_DEPTH);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let connected = Arc::new(AtomicBool::new(false));

        tokio::spawn(connection_task(
            identity,
            endpoint.clone(),
            stream,
            outbox_rx,
            inbox_tx,
            Arc::clone(&connected),
            shutdown_rx,
        ));

        Ok(Self {
            outbox: outbox_tx,
            inbox: Mutex::new(inbox_rx),
            connected,
            shutdown: shutdown_tx,
        })
    }

    fn is_closed(&self) -> bool {
        *self.shutdown.borrow()
    }
}

#[async_trait]
impl ClientSocket for DialerSocket {
    fn try_send(&self, payload: Bytes) -> Result<(), WireError> {
        if self.is_closed() {
            return Err(WireError::Closed);
        }
        if !self.connected.load(Ordering::SeqCst) {
            return Err(WireError::NotConnected);
        }
        self.outbox.try_send(payload).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => WireError::Busy,
            mpsc::error::TrySendError::Closed(_) => WireError::Closed,
        })
    }

    async fn recv(&self) -> Result<Bytes, WireError> {
        self.inbox
            .lock()
            .await
            .recv()
            .await
            .ok_or(WireError::Closed)
    }

    fn close(&self) {
        let _ = self.shutdown.send(true);
    }
}

/// Owns the link for the life of the socket: handshake, pump frames,
/// redial on loss, stop on shutdown.
async fn connection_task(
    identity: Identity,
    endpoint: Endpoint,
    first: crate::endpoint::LinkStream,
    mut outbox_rx: mpsc::Receiver<Bytes>,
    inbox_tx: mpsc::Sender<Bytes>,
    connected: Arc<AtomicBool>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut stream = Some(first);
    loop {
        let link = match stream.take() {
            Some(link) => link,
            None => {
                tokio::select! {
                    _ = shutdown.changed() => return,
                    _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                }
                match endpoint.dial().await {
                    Ok(link) => link,
                    Err(e) => {
                        debug!(identity = %identity, error = %e, "Redial failed");
                        continue;
                    }
                }
            }
        };

        let (mut reader, mut writer) = link.into_split();

        // First frame on every connection is the identity.
        if let Err(e) = write_frame(&mut writer, identity.as_bytes()).await {
            debug!(identity = %identity, error = %e, "Identity handshake failed");
            continue;
        }
        connected.store(true, Ordering::SeqCst);
        debug!(identity = %identity, endpoint = %endpoint, "Link established");

        let inbox = inbox_tx.clone();
        let mut read_task = tokio::spawn(async move {
            loop {
                match read_frame(&mut reader).await {
                    Ok(payload) => {
                        if inbox.send(payload).await.is_err() {
                            return;
                        }
                    }
                    Err(_) => return,
                }
            }
        });

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    read_task.abort();
                    return;
                }
                _ = &mut read_task => {
                    // Link lost from the read side.
                    break;
                }
                msg = outbox_rx.recv() => match msg {
                    Some(payload) => {
                        if let Err(e) = write_frame(&mut writer, &payload).await {
                            debug!(identity = %identity, error = %e, "Send failed, dropping link");
                            break;
                        }
                    }
                    // Socket handle dropped without close(); stop quietly.
                    None => {
                        read_task.abort();
                        return;
                    }
                }
            }
        }

        read_task.abort();
        connected.store(false, Ordering::SeqCst);
        debug!(identity = %identity, "Link lost, redialing");
    }
}
