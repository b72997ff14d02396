//! In-process transport backed by Tokio channels.
//!
//! [`MemoryConnector`] hands out client connections; for each one the
//! matching [`MemoryPeer`] shows up on the [`MemoryListener`]. Tests drive
//! the peer to act as a scripted server: read what the client sent, reply,
//! close cleanly, or vanish.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use tokio::sync::{Mutex, Notify, mpsc};

use crate::{CloseFrame, Connection, ConnectionId, Connector, Incoming, TransportError, close_code};

/// What the client side put on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientFrame {
    /// A message frame.
    Message(Vec<u8>),
    /// The client started a close handshake.
    Close { code: u16, reason: String },
}

/// Client half: opens connections that appear on the paired listener.
#[derive(Clone)]
pub struct MemoryConnector {
    accept_tx: mpsc::UnboundedSender<MemoryPeer>,
    refuse: Arc<AtomicUsize>,
}

/// Server half: yields one [`MemoryPeer`] per successful `connect()`.
pub struct MemoryListener {
    accept_rx: mpsc::UnboundedReceiver<MemoryPeer>,
}

impl MemoryConnector {
    /// Creates a connected connector/listener pair.
    #[allow(clippy::new_ret_no_self)]
    pub fn new() -> (MemoryConnector, MemoryListener) {
        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        (
            MemoryConnector {
                accept_tx,
                refuse: Arc::new(AtomicUsize::new(0)),
            },
            MemoryListener { accept_rx },
        )
    }

    /// Makes the next `n` connect attempts fail with
    /// [`TransportError::ConnectFailed`].
    pub fn refuse_next(&self, n: usize) {
        self.refuse.store(n, Ordering::SeqCst);
    }
}

impl Connector for MemoryConnector {
    type Connection = MemoryConnection;
    type Error = TransportError;

    async fn connect(&self) -> Result<Self::Connection, Self::Error> {
        let refused = self
            .refuse
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(TransportError::ConnectFailed(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "memory connection refused",
            )));
        }

        let (to_server, from_client) = mpsc::unbounded_channel();
        let (to_client, from_server) = mpsc::unbounded_channel();
        let id = ConnectionId::next();

        let peer = MemoryPeer {
            id,
            from_client,
            to_client,
        };
        self.accept_tx.send(peer).map_err(|_| {
            TransportError::ConnectFailed(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "memory listener dropped",
            ))
        })?;

        tracing::debug!(%id, "opened memory connection");
        Ok(MemoryConnection {
            id,
            to_server,
            from_server: Mutex::new(from_server),
            open: AtomicBool::new(true),
            local_close: Mutex::new(None),
            close_notify: Notify::new(),
        })
    }
}

impl MemoryListener {
    /// Waits for the next client connection. `None` once every connector
    /// clone is gone.
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.accept_rx.recv().await
    }
}

/// Client-side connection produced by [`MemoryConnector`].
pub struct MemoryConnection {
    id: ConnectionId,
    to_server: mpsc::UnboundedSender<ClientFrame>,
    from_server: Mutex<mpsc::UnboundedReceiver<Incoming>>,
    open: AtomicBool,
    local_close: Mutex<Option<CloseFrame>>,
    close_notify: Notify,
}

impl Connection for MemoryConnection {
    type Error = TransportError;

    async fn send(&self, data: &[u8]) -> Result<(), Self::Error> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed("closed locally".into()));
        }
        self.to_server
            .send(ClientFrame::Message(data.to_vec()))
            .map_err(|_| TransportError::ConnectionClosed("peer dropped".into()))
    }

    async fn recv(&self) -> Result<Incoming, Self::Error> {
        let mut rx = self.from_server.lock().await;
        loop {
            if let Some(frame) = self.local_close.lock().await.clone() {
                return Ok(Incoming::Closed(frame));
            }
            tokio::select! {
                msg = rx.recv() => {
                    return Ok(msg.unwrap_or_else(|| Incoming::Closed(CloseFrame::abnormal("peer dropped"))));
                }
                _ = self.close_notify.notified() => continue,
            }
        }
    }

    async fn close(&self, code: u16, reason: &str) -> Result<(), Self::Error> {
        if !self.open.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        // The peer may already be gone; the local side still closes cleanly.
        let _ = self.to_server.send(ClientFrame::Close {
            code,
            reason: reason.to_owned(),
        });
        *self.local_close.lock().await = Some(CloseFrame::clean(code, reason));
        self.close_notify.notify_one();
        Ok(())
    }

    fn id(&self) -> ConnectionId {
        self.id
    }
}

/// Server-side handle of one memory connection.
///
/// Dropping the peer without calling [`close`](Self::close) looks like an
/// abnormal disconnect (1006) to the client.
pub struct MemoryPeer {
    id: ConnectionId,
    from_client: mpsc::UnboundedReceiver<ClientFrame>,
    to_client: mpsc::UnboundedSender<Incoming>,
}

impl MemoryPeer {
    /// The id of the client connection this peer is paired with.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Next raw frame from the client, including close frames.
    pub async fn next_frame(&mut self) -> Option<ClientFrame> {
        self.from_client.recv().await
    }

    /// Next message from the client. `None` on close or drop.
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        match self.from_client.recv().await? {
            ClientFrame::Message(data) => Some(data),
            ClientFrame::Close { .. } => None,
        }
    }

    /// Delivers a message to the client. Returns `false` if the client
    /// connection is gone.
    pub fn send(&self, data: impl Into<Vec<u8>>) -> bool {
        self.to_client.send(Incoming::Message(data.into())).is_ok()
    }

    /// Closes cleanly with the given code.
    pub fn close(self, code: u16, reason: &str) {
        let _ = self
            .to_client
            .send(Incoming::Closed(CloseFrame::clean(code, reason)));
    }

    /// Closes with [`close_code::NORMAL`].
    pub fn close_normal(self) {
        self.close(close_code::NORMAL, "bye");
    }

    /// Drops the connection without a close handshake.
    pub fn drop_abnormally(self) {
        drop(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_send_and_receive_both_ways() {
        let (connector, mut listener) = MemoryConnector::new();
        let conn = connector.connect().await.unwrap();
        let mut peer = listener.accept().await.unwrap();
        assert_eq!(peer.id(), conn.id());

        conn.send(b"ping").await.unwrap();
        assert_eq!(peer.recv().await.unwrap(), b"ping");

        assert!(peer.send(b"pong".to_vec()));
        assert_eq!(conn.recv().await.unwrap(), Incoming::Message(b"pong".to_vec()));
    }

    #[tokio::test]
    async fn test_memory_peer_drop_is_abnormal_close() {
        let (connector, mut listener) = MemoryConnector::new();
        let conn = connector.connect().await.unwrap();
        listener.accept().await.unwrap().drop_abnormally();

        match conn.recv().await.unwrap() {
            Incoming::Closed(frame) => {
                assert_eq!(frame.code, close_code::ABNORMAL);
                assert!(!frame.was_clean);
            }
            other => panic!("expected close, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_memory_peer_close_normal_is_clean() {
        let (connector, mut listener) = MemoryConnector::new();
        let conn = connector.connect().await.unwrap();
        listener.accept().await.unwrap().close_normal();

        let incoming = conn.recv().await.unwrap();
        assert_eq!(incoming, Incoming::Closed(CloseFrame::clean(close_code::NORMAL, "bye")));
    }

    #[tokio::test]
    async fn test_memory_local_close_wakes_pending_recv() {
        let (connector, mut listener) = MemoryConnector::new();
        let conn = Arc::new(connector.connect().await.unwrap());
        let mut peer = listener.accept().await.unwrap();

        let reader = {
            let conn = Arc::clone(&conn);
            tokio::spawn(async move { conn.recv().await })
        };
        tokio::task::yield_now().await;

        conn.close(close_code::NORMAL, "done").await.unwrap();
        let incoming = reader.await.unwrap().unwrap();
        assert_eq!(incoming, Incoming::Closed(CloseFrame::clean(close_code::NORMAL, "done")));

        assert_eq!(
            peer.next_frame().await,
            Some(ClientFrame::Close { code: close_code::NORMAL, reason: "done".into() })
        );
        assert!(conn.send(b"late").await.is_err());
    }

    #[tokio::test]
    async fn test_memory_refuse_next_fails_then_recovers() {
        let (connector, _listener) = MemoryConnector::new();
        connector.refuse_next(2);

        assert!(matches!(connector.connect().await, Err(TransportError::ConnectFailed(_))));
        assert!(matches!(connector.connect().await, Err(TransportError::ConnectFailed(_))));
        assert!(connector.connect().await.is_ok());
    }
}
