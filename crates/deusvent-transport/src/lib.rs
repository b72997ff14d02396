//! Transport abstraction layer for the Deusvent client.
//!
//! The session core never talks to a socket directly. It depends on two
//! traits:
//!
//! - [`Connector`] — opens a fresh connection to the server. Reconnecting
//!   means calling `connect()` again and discarding the old handle.
//! - [`Connection`] — one live duplex message stream: send bytes, receive
//!   the next [`Incoming`] event, close with a status code.
//!
//! # Feature Flags
//!
//! - `websocket` (default) — WebSocket client via `tokio-tungstenite`
//!
//! The in-memory transport ([`MemoryConnector`]) is always available. It is
//! what the integration tests use to play the server side without sockets.

mod error;
mod memory;
#[cfg(feature = "websocket")]
mod websocket;

pub use error::TransportError;
pub use memory::{ClientFrame, MemoryConnection, MemoryConnector, MemoryListener, MemoryPeer};
#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConnection, WebSocketConnector};

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

/// Close status codes shared by every transport.
///
/// The values follow the WebSocket registry (RFC 6455 §7.4.1) since that is
/// what the server speaks, but nothing here is WebSocket specific.
pub mod close_code {
    /// Deliberate, orderly shutdown. The session does not reconnect after it.
    pub const NORMAL: u16 = 1000;
    /// Peer closed without sending a status code.
    pub const NO_STATUS: u16 = 1005;
    /// Connection dropped without a close handshake.
    pub const ABNORMAL: u16 = 1006;
}

/// Counter for generating unique connection IDs within a process.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque identifier for a connection.
///
/// Every `connect()` produces a new id, which lets the session tell events
/// of the current connection apart from stragglers of a dropped one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Allocates the next process-wide unique id.
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// How a connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    /// Status code, see [`close_code`].
    pub code: u16,
    /// Human-readable reason sent by the closing side (may be empty).
    pub reason: String,
    /// `true` when the close handshake completed.
    pub was_clean: bool,
}

impl CloseFrame {
    /// A clean close with the given code and reason.
    pub fn clean(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
            was_clean: true,
        }
    }

    /// The connection vanished without a close handshake.
    pub fn abnormal(reason: impl Into<String>) -> Self {
        Self {
            code: close_code::ABNORMAL,
            reason: reason.into(),
            was_clean: false,
        }
    }

    /// Whether this close was a deliberate, orderly shutdown.
    pub fn is_normal(&self) -> bool {
        self.code == close_code::NORMAL
    }
}

/// The next thing that happened on a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    /// A complete message frame from the peer.
    Message(Vec<u8>),
    /// The connection is gone. No further events follow.
    Closed(CloseFrame),
}

/// Opens new connections to a fixed remote endpoint.
///
/// The returned futures are `Send` so the session driver can run them on
/// any Tokio worker thread.
pub trait Connector: Send + Sync + 'static {
    /// The connection type produced by this connector.
    type Connection: Connection;
    /// The error type for connect attempts.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Opens a new connection. Resolves once the connection is usable.
    fn connect(
        &self,
    ) -> impl Future<Output = Result<Self::Connection, Self::Error>> + Send;
}

/// A single connection that can send and receive message frames.
///
/// `send` and `recv` may run concurrently from different tasks; a pending
/// `recv` must not block `send`.
pub trait Connection: Send + Sync + 'static {
    /// The error type for connection operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Sends one message frame to the remote peer.
    fn send(
        &self,
        data: &[u8],
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Waits for the next event from the remote peer.
    ///
    /// After [`Incoming::Closed`] has been returned the connection is dead.
    fn recv(&self) -> impl Future<Output = Result<Incoming, Self::Error>> + Send;

    /// Starts the close handshake with the given status code.
    fn close(
        &self,
        code: u16,
        reason: &str,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Returns the unique identifier for this connection.
    fn id(&self) -> ConnectionId;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_new_and_into_inner() {
        let id = ConnectionId::new(42);
        assert_eq!(id.into_inner(), 42);
    }

    #[test]
    fn test_connection_id_display() {
        let id = ConnectionId::new(7);
        assert_eq!(id.to_string(), "conn-7");
    }

    #[test]
    fn test_connection_id_next_is_unique() {
        let a = ConnectionId::next();
        let b = ConnectionId::next();
        assert_ne!(a, b);
        assert!(b.into_inner() > a.into_inner());
    }

    #[test]
    fn test_close_frame_normal_detection() {
        assert!(CloseFrame::clean(close_code::NORMAL, "bye").is_normal());
        assert!(!CloseFrame::clean(close_code::NO_STATUS, "").is_normal());
        assert!(!CloseFrame::abnormal("reset").is_normal());
    }

    #[test]
    fn test_close_frame_abnormal_is_not_clean() {
        let frame = CloseFrame::abnormal("gone");
        assert_eq!(frame.code, close_code::ABNORMAL);
        assert!(!frame.was_clean);
    }
}
