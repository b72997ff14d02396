//! `Client` handle and its builder.
//!
//! This is the entry point for talking to a Deusvent server. It ties
//! together all the layers: transport → protocol → session.
//!
//! ```text
//!   caller ──request()──→ registry + queue ──Flush──→ driver ──send──→ transport
//!     ↑                                                  │
//!     └────────────── oneshot continuation ←── dispatch ←┘←──recv── transport
//! ```
//!
//! A [`Client`] is a cheap handle. All of them share one driver task that
//! owns the connection; dropping the last handle disconnects.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use deusvent_crypto::{Keys, PublicKey};
use deusvent_protocol::{
    ClientMessage, MessageSet, Ping, Request, RequestId, Response, ServerMessage, Timestamp,
    serialize,
};
use deusvent_session::{
    ConnectionState, OutboundMessage, OutboundQueue, RequestError, RequestRegistry,
    RequestResult, SessionConfig, SessionError, SyncedTimestamp,
};
use deusvent_transport::Connector;
use tokio::sync::{Mutex, broadcast, mpsc, oneshot, watch};
use tokio::time::Instant;

use crate::DeusventError;
use crate::driver::Driver;

/// Buffered uncorrelated messages per subscriber before it starts lagging.
pub const BROADCAST_CAPACITY: usize = 64;

/// Request bookkeeping shared between callers and the driver.
///
/// Registry and queue sit behind one lock so that a request is allocated,
/// registered, and queued atomically.
pub(crate) struct Core {
    pub(crate) registry: RequestRegistry,
    pub(crate) queue: OutboundQueue,
    /// Set once pending requests have been failed for good.
    pub(crate) closed: bool,
}

/// State shared by every client handle and the driver task.
pub(crate) struct Shared {
    pub(crate) core: Mutex<Core>,
    pub(crate) clock: SyncedTimestamp,
    pub(crate) keys: Option<Keys>,
    pub(crate) config: SessionConfig,
    pub(crate) broadcast: broadcast::Sender<ServerMessage>,
}

impl Shared {
    /// Allocates an id for `request`, registers it and queues its frame.
    ///
    /// All three happen under one lock; on failure the id is released and
    /// nothing stays queued.
    async fn submit<R: Request>(&self, request: R) -> Result<PendingReply<R>, DeusventError> {
        let message: ClientMessage = request.into();
        let tag = message.tag();

        let mut core = self.core.lock().await;
        if core.closed {
            return Err(SessionError::Closed.into());
        }
        let request_id = core.registry.allocate()?;
        let (tx, rx) = oneshot::channel();
        let deadline = self.config.request_timeout.map(|t| Instant::now() + t);

        let queued = serialize(&message, request_id, self.keys.as_ref())
            .map_err(DeusventError::from)
            .and_then(|frame| {
                core.registry
                    .register(request_id, tag, deadline, tx, frame.clone())?;
                core.queue.enqueue(OutboundMessage {
                    request_id,
                    bytes: frame,
                })?;
                Ok(())
            });
        if let Err(e) = queued {
            core.registry.release(request_id);
            return Err(e);
        }
        tracing::debug!(%request_id, name = R::NAME, "request queued");
        Ok(PendingReply {
            receiver: rx,
            request: PhantomData,
        })
    }
}

/// A queued request waiting for its reply.
struct PendingReply<R> {
    receiver: oneshot::Receiver<RequestResult>,
    request: PhantomData<fn() -> R>,
}

impl<R: Request> PendingReply<R> {
    /// Resolves to the typed response and the time its frame was last
    /// written, if it was written at all.
    async fn wait(self) -> Result<(R::Response, Option<Timestamp>), DeusventError> {
        let reply = self.receiver.await.map_err(|_| RequestError::Closed)??;
        let response = R::Response::from_message(reply.message).map_err(|other| {
            tracing::warn!(
                expected = R::NAME,
                got = ServerMessage::name_of(other.tag()),
                "unexpected response"
            );
            DeusventError::from(RequestError::UnexpectedResponse { tag: other.tag() })
        })?;
        Ok((response, reply.sent_at))
    }
}

/// What client handles ask of the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Command {
    /// New frames are queued.
    Flush,
    Disconnect,
}

struct ClientInner {
    shared: Arc<Shared>,
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
}

/// Builder for configuring and connecting a [`Client`].
///
/// # Example
///
/// ```rust,ignore
/// use deusvent::prelude::*;
///
/// let client = Client::builder()
///     .config(SessionConfig::default())
///     .keys(keys)
///     .connect(WebSocketConnector::new("ws://127.0.0.1:8080"))?;
/// let status = client.request(Ping).await?;
/// ```
pub struct ClientBuilder {
    config: SessionConfig,
    keys: Option<Keys>,
}

impl ClientBuilder {
    /// Creates a new builder with default settings and no identity.
    pub fn new() -> Self {
        Self {
            config: SessionConfig::default(),
            keys: None,
        }
    }

    /// Sets the session configuration.
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the identity used to sign authenticated messages.
    ///
    /// Without keys, authenticated requests fail with
    /// [`SerializationError::MissingKeys`](deusvent_protocol::SerializationError::MissingKeys).
    pub fn keys(mut self, keys: Keys) -> Self {
        self.keys = Some(keys);
        self
    }

    /// Starts the session on `connector` and returns immediately.
    ///
    /// The first connection attempt runs in the background; requests made
    /// before it opens are queued. Must be called inside a Tokio runtime.
    ///
    /// # Errors
    /// [`DeusventError::Config`] if the configuration fails
    /// [`SessionConfig::validate`]. Nothing is spawned in that case.
    pub fn connect<C: Connector>(self, connector: C) -> Result<Client, DeusventError> {
        self.config.validate()?;

        let (broadcast_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);

        let clock_sync_interval = self.config.clock_sync_interval;
        let shared = Arc::new(Shared {
            core: Mutex::new(Core {
                registry: RequestRegistry::new(),
                queue: OutboundQueue::new(self.config.max_queued_messages),
                closed: false,
            }),
            clock: SyncedTimestamp::new(self.config.clock_smoothing),
            keys: self.keys,
            config: self.config,
            broadcast: broadcast_tx,
        });

        let driver = Driver::new(connector, Arc::clone(&shared), commands_rx, state_tx);
        tokio::spawn(driver.run());

        let client = Client {
            inner: Arc::new(ClientInner {
                shared,
                commands: commands_tx,
                state: state_rx,
            }),
        };

        if let Some(period) = clock_sync_interval {
            tokio::spawn(clock_sync_loop(
                Arc::clone(&client.inner.shared),
                client.inner.commands.downgrade(),
                client.inner.state.clone(),
                period,
            ));
        }
        Ok(client)
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to a running client session.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// Creates a new builder.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Sends a correlated request and waits for its typed response.
    ///
    /// The request is queued immediately, whatever the connection state,
    /// and written once a connection is open. A server-side failure comes
    /// back as [`RequestError::Server`]; a reply of the wrong type as
    /// [`RequestError::UnexpectedResponse`].
    ///
    /// # Errors
    /// - [`SessionError::RequestIdsExhausted`] — 255 requests in flight
    /// - [`SessionError::QueueFull`] — outbound queue at its bound
    /// - [`SessionError::Closed`] — the session was torn down
    /// - [`DeusventError::Serialization`] — the request could not be encoded
    /// - [`DeusventError::Request`] — see [`RequestError`]
    pub async fn request<R: Request>(&self, request: R) -> Result<R::Response, DeusventError> {
        let reply = self.inner.shared.submit(request).await?;
        self.kick();
        let (response, _) = reply.wait().await?;
        Ok(response)
    }

    /// Sends a message without a request id. Nothing waits for a reply.
    pub async fn notify(&self, message: impl Into<ClientMessage>) -> Result<(), DeusventError> {
        let message = message.into();
        let frame = serialize(&message, RequestId::NONE, self.inner.shared.keys.as_ref())?;
        {
            let mut core = self.inner.shared.core.lock().await;
            if core.closed {
                return Err(SessionError::Closed.into());
            }
            core.queue.enqueue(OutboundMessage {
                request_id: RequestId::NONE,
                bytes: frame,
            })?;
        }
        self.kick();
        Ok(())
    }

    /// Receives every uncorrelated server message (request id 0) from now
    /// on, including unsolicited [`ServerError`](deusvent_protocol::ServerError)s.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerMessage> {
        self.inner.shared.broadcast.subscribe()
    }

    /// Pings the server and folds the round trip into the clock offset.
    ///
    /// Returns the new offset in milliseconds.
    ///
    /// The round trip is measured from when the ping frame was last written
    /// to the connection, so time spent queued while disconnected does not
    /// count as latency.
    pub async fn sync_clock(&self) -> Result<i64, DeusventError> {
        let submitted_at = Timestamp::now();
        let reply = self.inner.shared.submit(Ping).await?;
        self.kick();
        adjust_clock(&self.inner.shared, submitted_at, reply).await
    }

    /// Server-aligned current time. Local time until the first clock sync.
    pub fn now(&self) -> Timestamp {
        self.inner.shared.clock.now()
    }

    /// The synced clock shared by every handle of this session.
    pub fn clock(&self) -> &SyncedTimestamp {
        &self.inner.shared.clock
    }

    /// The identity this client signs with, if any.
    pub fn public_key(&self) -> Option<PublicKey> {
        self.inner.shared.keys.as_ref().map(|keys| keys.public_key)
    }

    /// Current connection state as last published by the driver.
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Waits until the session reaches `state`.
    ///
    /// Returns [`SessionError::Closed`] if the session stops before getting
    /// there. Waiting for a state the session never enters again (e.g.
    /// `Connected` after a normal close) only ends when the session does.
    pub async fn wait_for(&self, state: ConnectionState) -> Result<(), SessionError> {
        let mut rx = self.inner.state.clone();
        rx.wait_for(|current| *current == state || *current == ConnectionState::Closed)
            .await
            .map_err(|_| SessionError::Closed)
            .and_then(|current| {
                if *current == state {
                    Ok(())
                } else {
                    Err(SessionError::Closed)
                }
            })
    }

    /// Closes the session with a normal close.
    ///
    /// Pending requests resolve with [`RequestError::Closed`] and queued
    /// frames are discarded before this returns. No reconnect follows.
    pub async fn disconnect(&self) {
        if self.inner.commands.send(Command::Disconnect).is_err() {
            return;
        }
        let mut rx = self.inner.state.clone();
        let _ = rx
            .wait_for(|s| matches!(s, ConnectionState::Closing | ConnectionState::Closed))
            .await;
    }

    /// Number of requests waiting for a response.
    pub async fn pending_requests(&self) -> usize {
        self.inner.shared.core.lock().await.registry.pending_count()
    }

    /// Number of frames waiting for a connection.
    pub async fn queued_messages(&self) -> usize {
        self.inner.shared.core.lock().await.queue.len()
    }

    fn kick(&self) {
        // Err means the driver is gone; `closed` already rejects new work.
        let _ = self.inner.commands.send(Command::Flush);
    }
}

/// Waits for a ping reply and folds it into the clock offset.
async fn adjust_clock(
    shared: &Shared,
    submitted_at: Timestamp,
    reply: PendingReply<Ping>,
) -> Result<i64, DeusventError> {
    let (status, sent_at) = reply.wait().await?;
    let received_at = Timestamp::now();
    Ok(shared
        .clock
        .adjust(status.timestamp, sent_at.unwrap_or(submitted_at), received_at))
}

/// Re-syncs the clock every `period` while connected. Stops once the last
/// client handle is dropped or the session closes.
///
/// Only a weak command sender is kept across awaits, so this task never
/// holds the session open.
async fn clock_sync_loop(
    shared: Arc<Shared>,
    commands: mpsc::WeakUnboundedSender<Command>,
    mut state: watch::Receiver<ConnectionState>,
    period: Duration,
) {
    loop {
        let ready = state
            .wait_for(|s| matches!(s, ConnectionState::Connected | ConnectionState::Closed))
            .await
            .map(|s| *s);
        if !matches!(ready, Ok(ConnectionState::Connected)) {
            break;
        }
        let submitted_at = Timestamp::now();
        let reply = {
            let Some(commands) = commands.upgrade() else {
                break;
            };
            let reply = shared.submit(Ping).await;
            let _ = commands.send(Command::Flush);
            reply
        };
        let synced = match reply {
            Ok(reply) => adjust_clock(&shared, submitted_at, reply).await,
            Err(error) => Err(error),
        };
        match synced {
            Ok(offset_ms) => tracing::debug!(offset_ms, "clock re-synced"),
            Err(error) => tracing::debug!(%error, "clock sync failed"),
        }
        tokio::time::sleep(period).await;
    }
}
