//! Hub-side socket: a listening endpoint receiving from many clients.
//!
//! Each accepted connection announces its identity in the first frame, then
//! contributes `(identity, payload)` pairs to one shared inbound queue.
//! Outbound, every identity has its own bounded writer queue; a full queue
//! drops the message with [`WireError::Busy`]. A second connection carrying
//! an already-known identity takes over from the first.

use crate::endpoint::{Endpoint, LinkListener, LinkStream};
use crate::frame::{read_frame, write_frame};
use crate::socket::{HubSocket, WireError, SEND_QUEUE_DEPTH};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use hublink_types::Identity;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, error, warn};

/// Depth of the shared inbound queue across all clients.
const INBOX_DEPTH: usize = 1024;

/// Tokio implementation of [`HubSocket`] over TCP or Unix listeners.
pub struct ListenerSocket {
    peers: Arc<DashMap<Identity, mpsc::Sender<Bytes>>>,
    inbox: Mutex<mpsc::Receiver<(Identity, Bytes)>>,
    local_addr: Option<SocketAddr>,
    ipc_path: Option<PathBuf>,
    shutdown: watch::Sender<bool>,
}

impl ListenerSocket {
    /// Bind the listening endpoint and start the accept loop.
    ///
    /// Bind failures (address in use, bad path) are setup-time faults
    /// surfaced to the caller.
    pub async fn bind(endpoint: &Endpoint) -> Result<Self, WireError> {
        let listener = endpoint.listen().await?;
        let local_addr = listener.local_addr();
        let ipc_path = match endpoint {
            Endpoint::Ipc(path) => Some(path.clone()),
            Endpoint::Tcp { .. } => None,
        };
        debug!(endpoint = %endpoint, "Listening");

        let peers: Arc<DashMap<Identity, mpsc::Sender<Bytes>>> = Arc::new(DashMap::new());
        let (inbox_tx, inbox_rx) = mpsc::channel(INBOX_DEPTH);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(accept_loop(
            listener,
            Arc::clone(&peers),
            inbox_tx,
            shutdown_rx,
        ));

        Ok(Self {
            peers,
            inbox: Mutex::new(inbox_rx),
            local_addr,
            ipc_path,
            shutdown: shutdown_tx,
        })
    }

    /// Actual bound address for TCP endpoints (useful when binding port 0).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    fn is_closed(&self) -> bool {
        *self.shutdown.borrow()
    }
}

#[async_trait]
impl HubSocket for ListenerSocket {
    fn try_send(&self, destination: &Identity, payload: Bytes) -> Result<(), WireError> {
        if self.is_closed() {
            return Err(WireError::Closed);
        }
        let peer = self
            .peers
            .get(destination)
            .ok_or_else(|| WireError::UnknownIdentity(destination.clone()))?;
        peer.try_send(payload).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => WireError::Busy,
            mpsc::error::TrySendError::Closed(_) => WireError::NotConnected,
        })
    }

    async fn recv(&self) -> Result<(Identity, Bytes), WireError> {
        self.inbox
            .lock()
            .await
            .recv()
            .await
            .ok_or(WireError::Closed)
    }

    fn close(&self) {
        let _ = self.shutdown.send(true);
        // Dropping the writer queues ends the per-connection writer tasks.
        self.peers.clear();
        if let Some(path) = &self.ipc_path {
            let _ = std::fs::remove_file(path);
        }
    }
}

async fn accept_loop(
    listener: LinkListener,
    peers: Arc<DashMap<Identity, mpsc::Sender<Bytes>>>,
    inbox_tx: mpsc::Sender<(Identity, Bytes)>,
    shutdown: watch::Receiver<bool>,
) {
    let mut shutdown_accept = shutdown.clone();
    loop {
        tokio::select! {
            _ = shutdown_accept.changed() => return,
            res = listener.accept() => match res {
                Ok(stream) => {
                    tokio::spawn(client_connection(
                        stream,
                        Arc::clone(&peers),
                        inbox_tx.clone(),
                        shutdown.clone(),
                    ));
                }
                Err(e) => {
                    error!(error = %e, "Accept error");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }
}

/// Serve one client connection: identity handshake, then pump frames until
/// the connection drops, the socket shuts down, or a newer connection with
/// the same identity takes over.
async fn client_connection(
    stream: LinkStream,
    peers: Arc<DashMap<Identity, mpsc::Sender<Bytes>>>,
    inbox_tx: mpsc::Sender<(Identity, Bytes)>,
    mut shutdown: watch::Receiver<bool>,
) {
    let (mut reader, mut writer) = stream.into_split();

    let identity = match read_frame(&mut reader).await {
        Ok(bytes) => Identity::new(bytes),
        Err(e) => {
            debug!(error = %e, "Connection dropped before identity handshake");
            return;
        }
    };
    if identity.is_empty() {
        warn!("Rejected connection with empty identity");
        return;
    }

    let (writer_tx, mut writer_rx) = mpsc::channel::<Bytes>(SEND_QUEUE_DEPTH);
    // At most one connection per identity: a newer one takes over.
    if peers.insert(identity.clone(), writer_tx.clone()).is_some() {
        debug!(client = %identity, "Replaced existing link for identity");
    } else {
        debug!(client = %identity, "Client link attached");
    }

    let mut write_task = tokio::spawn(async move {
        while let Some(payload) = writer_rx.recv().await {
            if let Err(e) = write_frame(&mut writer, &payload).await {
                debug!(error = %e, "Client write failed");
                return;
            }
        }
    });

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = &mut write_task => break,
            res = read_frame(&mut reader) => match res {
                Ok(payload) => {
                    if inbox_tx.send((identity.clone(), payload)).await.is_err() {
                        break;
                    }
                }
                Err(WireError::Closed) => {
                    debug!(client = %identity, "Client link closed");
                    break;
                }
                Err(e) => {
                    debug!(client = %identity, error = %e, "Client read failed");
                    break;
                }
            }
        }
    }

    write_task.abort();
    // Detach only if the table still points at this connection; a takeover
    // by a newer connection must not be undone.
    peers.remove_if(&identity, |_, sender| sender.same_channel(&writer_tx));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialer::DialerSocket;
    use crate::socket::ClientSocket;

    async fn loopback_pair(identity: &str) -> (ListenerSocket, DialerSocket) {
        let hub = ListenerSocket::bind(&Endpoint::tcp("127.0.0.1", 0))
            .await
            .unwrap();
        let port = hub.local_addr().unwrap().port();
        let client = DialerSocket::connect(
            Identity::from(identity),
            &Endpoint::tcp("127.0.0.1", port),
        )
        .await
        .unwrap();
        (hub, client)
    }

    #[tokio::test]
    async fn test_identity_tagged_delivery() {
        let (hub, client) = loopback_pair("svc-1").await;

        // The dialer flips to connected asynchronously; wait for the first
        // send to go through.
        let payload = Bytes::from_static(b"hello");
        for _ in 0..50 {
            if client.try_send(payload.clone()).is_ok() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let (identity, received) = hub.recv().await.unwrap();
        assert_eq!(identity, Identity::from("svc-1"));
        assert_eq!(received, payload);
    }

    #[tokio::test]
    async fn test_hub_reply_reaches_client() {
        let (hub, client) = loopback_pair("svc-2").await;

        for _ in 0..50 {
            if client.try_send(Bytes::from_static(b"hi")).is_ok() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let (identity, _) = hub.recv().await.unwrap();

        hub.try_send(&identity, Bytes::from_static(b"reply")).unwrap();
        let reply = client.recv().await.unwrap();
        assert_eq!(reply, "reply");
    }

    #[tokio::test]
    async fn test_send_to_unknown_identity_is_transient() {
        let hub = ListenerSocket::bind(&Endpoint::tcp("127.0.0.1", 0))
            .await
            .unwrap();
        let err = hub
            .try_send(&Identity::from("ghost"), Bytes::from_static(b"x"))
            .unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_newer_connection_takes_over_identity() {
        let hub = ListenerSocket::bind(&Endpoint::tcp("127.0.0.1", 0))
            .await
            .unwrap();
        let port = hub.local_addr().unwrap().port();
        let endpoint = Endpoint::tcp("127.0.0.1", port);

        let first = DialerSocket::connect(Identity::from("svc-3"), &endpoint)
            .await
            .unwrap();
        let second = DialerSocket::connect(Identity::from("svc-3"), &endpoint)
            .await
            .unwrap();

        // Traffic from the second connection must arrive under the same
        // identity; one registration serves the latest link.
        for _ in 0..50 {
            if second.try_send(Bytes::from_static(b"v2")).is_ok() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let (identity, payload) = hub.recv().await.unwrap();
        assert_eq!(identity, Identity::from("svc-3"));
        assert_eq!(payload, "v2");

        first.close();
        second.close();
    }

    #[tokio::test]
    async fn test_closed_socket_rejects_sends() {
        let (hub, client) = loopback_pair("svc-4").await;
        client.close();
        assert!(matches!(
            client.try_send(Bytes::from_static(b"x")),
            Err(WireError::Closed)
        ));
        hub.close();
        assert!(matches!(
            hub.try_send(&Identity::from("svc-4"), Bytes::from_static(b"x")),
            Err(WireError::Closed)
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_ipc_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let endpoint = Endpoint::ipc(dir.path().join("hub.sock"));

        let hub = ListenerSocket::bind(&endpoint).await.unwrap();
        let client = DialerSocket::connect(Identity::from("ipc-svc"), &endpoint)
            .await
            .unwrap();

        for _ in 0..50 {
            if client.try_send(Bytes::from_static(b"over-ipc")).is_ok() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let (identity, payload) = hub.recv().await.unwrap();
        assert_eq!(identity, Identity::from("ipc-svc"));
        assert_eq!(payload, "over-ipc");
    }
}
