//! The session driver: one task per client that owns the connection.
//!
//! The driver feeds transport events, client commands, and timers into the
//! [`SessionMachine`] and carries out the effects it returns. It is the
//! only place that touches the live connection.
//!
//! The flow is:
//!   1. `Connect` → open a connection in a background task
//!   2. `Opened` → start a reader task for it, flush the outbound queue
//!   3. Loop: inbound frames → dispatch to continuations or subscribers
//!   4. Drop or close → reconnect later, or tear down for good

use std::collections::VecDeque;
use std::sync::Arc;

use deusvent_protocol::{ServerMessage, Timestamp, deserialize, parse_request_id, peek_tag};
use deusvent_session::{
    ConnectionState, Effect, OutboundMessage, RequestError, SessionEvent, SessionMachine,
};
use deusvent_transport::{CloseFrame, Connection, ConnectionId, Connector, Incoming};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::client::{Command, Core, Shared};

/// What the connect and reader tasks report back.
enum TransportEvent<T> {
    Opened(T),
    ConnectFailed(String),
    Message(ConnectionId, Vec<u8>),
    Closed(ConnectionId, CloseFrame),
    Error(ConnectionId, String),
}

pub(crate) struct Driver<C: Connector> {
    connector: Arc<C>,
    shared: Arc<Shared>,
    machine: SessionMachine,
    connection: Option<Arc<C::Connection>>,
    reader: Option<JoinHandle<()>>,
    commands: mpsc::UnboundedReceiver<Command>,
    events_tx: mpsc::UnboundedSender<TransportEvent<C::Connection>>,
    events_rx: mpsc::UnboundedReceiver<TransportEvent<C::Connection>>,
    state_tx: watch::Sender<ConnectionState>,
    reconnect_at: Option<Instant>,
}

impl<C: Connector> Driver<C> {
    pub(crate) fn new(
        connector: C,
        shared: Arc<Shared>,
        commands: mpsc::UnboundedReceiver<Command>,
        state_tx: watch::Sender<ConnectionState>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let machine = SessionMachine::new(
            shared.config.reconnect,
            shared.config.resend_unanswered,
        );
        Self {
            connector: Arc::new(connector),
            shared,
            machine,
            connection: None,
            reader: None,
            commands,
            events_tx,
            events_rx,
            state_tx,
            reconnect_at: None,
        }
    }

    /// Runs until the session reaches [`ConnectionState::Closed`].
    pub(crate) async fn run(mut self) {
        self.process(SessionEvent::Connect).await;

        let mut sweep = tokio::time::interval(self.shared.config.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut commands_open = true;

        while self.machine.state() != ConnectionState::Closed {
            let reconnect_at = self.reconnect_at;
            tokio::select! {
                command = self.commands.recv(), if commands_open => match command {
                    Some(Command::Flush) => {
                        if let Some(event) = self.flush().await {
                            self.process(event).await;
                        }
                    }
                    Some(Command::Disconnect) => self.process(SessionEvent::Disconnect).await,
                    None => {
                        tracing::debug!("all client handles dropped");
                        commands_open = false;
                        self.process(SessionEvent::Disconnect).await;
                    }
                },
                Some(event) = self.events_rx.recv() => self.on_transport_event(event).await,
                _ = reconnect_timer(reconnect_at) => {
                    self.reconnect_at = None;
                    self.process(SessionEvent::ReconnectTimerFired).await;
                }
                _ = sweep.tick() => self.sweep().await,
            }
        }

        self.drop_transport();
        tracing::info!("session driver stopped");
    }

    /// Applies `event` and every event its effects produce, then publishes
    /// the resulting state.
    async fn process(&mut self, event: SessionEvent) {
        let mut events = VecDeque::from([event]);
        while let Some(event) = events.pop_front() {
            let effects = self.machine.handle(event);
            for effect in effects {
                if let Some(follow_up) = self.apply(effect).await {
                    events.push_back(follow_up);
                }
            }
        }

        let state = self.machine.state();
        self.state_tx.send_if_modified(|current| {
            let changed = *current != state;
            *current = state;
            changed
        });
    }

    async fn apply(&mut self, effect: Effect) -> Option<SessionEvent> {
        match effect {
            Effect::OpenTransport => {
                self.open();
                None
            }
            Effect::FlushQueue => self.flush().await,
            Effect::RequeueUnanswered => {
                self.requeue_unanswered().await;
                None
            }
            Effect::ScheduleReconnect(delay) => {
                self.reconnect_at = Some(Instant::now() + delay);
                None
            }
            Effect::CancelReconnect => {
                self.reconnect_at = None;
                None
            }
            Effect::CloseTransport { code, reason } => {
                let Some(connection) = &self.connection else {
                    return Some(SessionEvent::Closed(CloseFrame::clean(code, reason)));
                };
                match connection.close(code, &reason).await {
                    Ok(()) => None,
                    Err(e) => Some(SessionEvent::Error(e.to_string())),
                }
            }
            Effect::DropTransport => {
                self.drop_transport();
                None
            }
            Effect::Dispatch(bytes) => {
                self.dispatch(&bytes).await;
                None
            }
            Effect::FailPending => {
                self.fail_pending().await;
                None
            }
        }
    }

    // -----------------------------------------------------------------
    // Connection
    // -----------------------------------------------------------------

    fn open(&self) {
        let connector = Arc::clone(&self.connector);
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let event = match connector.connect().await {
                Ok(connection) => TransportEvent::Opened(connection),
                Err(e) => TransportEvent::ConnectFailed(e.to_string()),
            };
            let _ = events.send(event);
        });
    }

    async fn on_transport_event(&mut self, event: TransportEvent<C::Connection>) {
        let session_event = match event {
            TransportEvent::Opened(connection) => {
                let connection = Arc::new(connection);
                tracing::info!(conn_id = %connection.id(), "connection opened");
                self.drop_transport();
                self.reader = Some(spawn_reader(
                    Arc::clone(&connection),
                    self.events_tx.clone(),
                ));
                self.connection = Some(connection);
                SessionEvent::Opened
            }
            TransportEvent::ConnectFailed(error) => {
                tracing::warn!(%error, "connect failed");
                SessionEvent::Error(error)
            }
            TransportEvent::Message(id, bytes) if self.is_current(id) => SessionEvent::Message(bytes),
            TransportEvent::Closed(id, frame) if self.is_current(id) => {
                tracing::info!(
                    conn_id = %id,
                    code = frame.code,
                    clean = frame.was_clean,
                    reason = %frame.reason,
                    "connection closed"
                );
                SessionEvent::Closed(frame)
            }
            TransportEvent::Error(id, error) if self.is_current(id) => {
                tracing::warn!(conn_id = %id, %error, "connection failed");
                SessionEvent::Error(error)
            }
            TransportEvent::Message(id, _)
            | TransportEvent::Closed(id, _)
            | TransportEvent::Error(id, _) => {
                tracing::debug!(conn_id = %id, "ignoring event from old connection");
                return;
            }
        };
        self.process(session_event).await;
    }

    fn is_current(&self, id: ConnectionId) -> bool {
        self.connection.as_ref().is_some_and(|c| c.id() == id)
    }

    fn drop_transport(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        if let Some(connection) = self.connection.take() {
            tracing::debug!(conn_id = %connection.id(), "connection dropped");
        }
    }

    // -----------------------------------------------------------------
    // Outbound
    // -----------------------------------------------------------------

    /// Writes the queue to the open connection, stamping each request with
    /// its write time. A failed send is reported as an error event.
    async fn flush(&self) -> Option<SessionEvent> {
        if self.machine.state() != ConnectionState::Connected {
            return None;
        }
        let connection = self.connection.as_ref()?;

        let mut core = self.shared.core.lock().await;
        let Core { registry, queue, .. } = &mut *core;
        let flushed = queue
            .flush(Some(&**connection), |message| {
                registry.mark_sent(message.request_id, Timestamp::now());
                tracing::debug!(request_id = %message.request_id, len = message.bytes.len(), "frame sent");
            })
            .await;
        match flushed {
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(conn_id = %connection.id(), error = %e, "send failed");
                Some(SessionEvent::Error(e.to_string()))
            }
        }
    }

    async fn requeue_unanswered(&self) {
        let mut core = self.shared.core.lock().await;
        let unanswered = core.registry.take_unanswered();
        if unanswered.is_empty() {
            return;
        }
        tracing::info!(count = unanswered.len(), "re-queueing unanswered requests");
        core.queue.requeue_front(
            unanswered
                .into_iter()
                .map(|(request_id, bytes)| OutboundMessage { request_id, bytes }),
        );
    }

    async fn sweep(&self) {
        let mut core = self.shared.core.lock().await;
        let expired = core.registry.expire(Instant::now());
        for id in expired {
            core.queue.remove(id);
        }
    }

    async fn fail_pending(&self) {
        let mut core = self.shared.core.lock().await;
        core.closed = true;
        let rejected = core.registry.reject_all(RequestError::Closed);
        let discarded = core.queue.clear();
        tracing::info!(rejected, discarded, "session torn down");
    }

    // -----------------------------------------------------------------
    // Inbound
    // -----------------------------------------------------------------

    /// Routes one inbound frame.
    ///
    /// Request id 0 goes to subscribers. Any other id goes to the request
    /// registered under it, and nowhere else.
    async fn dispatch(&self, bytes: &[u8]) {
        let request_id = parse_request_id(bytes);
        let decoded = deserialize::<ServerMessage>(bytes);

        if request_id.is_none() {
            match decoded {
                Ok(envelope) => self.publish(envelope.message),
                Err(error) => {
                    tracing::warn!(tag = ?peek_tag(bytes), %error, "dropping undecodable frame");
                }
            }
            return;
        }

        let mut core = self.shared.core.lock().await;
        match decoded {
            Ok(envelope) => {
                let tag = envelope.tag;
                let delivered = match envelope.message {
                    ServerMessage::ServerError(error) => {
                        core.registry.reject(request_id, RequestError::Server(error))
                    }
                    message => core.registry.resolve(request_id, message),
                };
                if delivered {
                    tracing::debug!(%request_id, tag, "response delivered");
                } else {
                    core.registry.reject_unmatched(request_id, tag);
                }
            }
            Err(error) if core.registry.is_pending(request_id) => {
                tracing::warn!(%request_id, %error, "response could not be decoded");
                core.registry.reject(request_id, RequestError::Decode(error));
            }
            Err(error) => {
                tracing::warn!(%request_id, tag = ?peek_tag(bytes), %error, "dropping undecodable frame");
            }
        }
    }

    fn publish(&self, message: ServerMessage) {
        if let ServerMessage::ServerError(error) = &message {
            tracing::warn!(
                code = ?error.error_code,
                description = %error.error_description,
                recoverable = error.recoverable,
                "uncorrelated server error"
            );
        }
        // Err only means nobody is subscribed.
        let _ = self.shared.broadcast.send(message);
    }
}

/// Forwards everything `connection` receives until it closes.
fn spawn_reader<T: Connection>(
    connection: Arc<T>,
    events: mpsc::UnboundedSender<TransportEvent<T>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let id = connection.id();
        loop {
            let (event, last) = match connection.recv().await {
                Ok(Incoming::Message(bytes)) => (TransportEvent::Message(id, bytes), false),
                Ok(Incoming::Closed(frame)) => (TransportEvent::Closed(id, frame), true),
                Err(e) => (TransportEvent::Error(id, e.to_string()), true),
            };
            if events.send(event).is_err() || last {
                break;
            }
        }
    })
}

async fn reconnect_timer(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
