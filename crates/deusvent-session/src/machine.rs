//! The connection lifecycle as a pure state machine.
//!
//! [`SessionMachine::handle`] takes one [`SessionEvent`], updates the
//! state, and returns the [`Effect`]s the driver must carry out. It never
//! touches a socket or a timer itself, which keeps every transition
//! testable without a runtime.
//!
//! ```text
//!                connect()
//!  Disconnected ──────────→ Connecting ──(opened)──→ Connected
//!       ↑   ↑                   │                        │
//!       │   └──(error/close)────┘                        │
//!       │                                                │
//!       └──────(close ≠ 1000 or error, then backoff)─────┤
//!                                                        │ close = 1000
//!  any ──disconnect()──→ Closing ──(closed)──→ Closed ←──┘
//! ```
//!
//! `Closed` is terminal: every event after it is ignored.

use std::time::Duration;

use deusvent_transport::{CloseFrame, close_code};

use crate::ReconnectPolicy;

/// Where the session is in its connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No connection and none being opened. Initial state, and the state
    /// while waiting out a reconnect delay.
    Disconnected,
    /// A connect attempt is in progress.
    Connecting,
    /// The connection is open; frames flow both ways.
    Connected,
    /// An explicit disconnect is in progress.
    Closing,
    /// Done. No further reconnects.
    Closed,
}

/// Something that happened to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The application asked to connect.
    Connect,
    /// The transport finished opening.
    Opened,
    /// The transport failed (connect refused, send/receive error).
    Error(String),
    /// The transport closed.
    Closed(CloseFrame),
    /// The reconnect delay elapsed.
    ReconnectTimerFired,
    /// The application asked to disconnect.
    Disconnect,
    /// A frame arrived.
    Message(Vec<u8>),
}

/// Work the driver must do after a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Start a connect attempt.
    OpenTransport,
    /// Write the outbound queue to the open connection.
    FlushQueue,
    /// Put sent-but-unanswered requests back at the head of the queue.
    RequeueUnanswered,
    /// Arm the reconnect timer.
    ScheduleReconnect(Duration),
    /// Disarm the reconnect timer.
    CancelReconnect,
    /// Start a close handshake on the current connection.
    CloseTransport { code: u16, reason: String },
    /// Forget the current connection handle.
    DropTransport,
    /// Decode and route an inbound frame.
    Dispatch(Vec<u8>),
    /// Reject every pending request and discard the queue.
    FailPending,
}

/// Reason sent with the close frame of an explicit disconnect.
pub const DISCONNECT_REASON: &str = "client disconnect";

/// The connection lifecycle state machine.
#[derive(Debug, Clone)]
pub struct SessionMachine {
    state: ConnectionState,
    policy: ReconnectPolicy,
    resend_unanswered: bool,
    /// Consecutive failed attempts since the last successful open.
    attempt: u32,
}

impl SessionMachine {
    /// Creates a machine in [`ConnectionState::Disconnected`].
    pub fn new(policy: ReconnectPolicy, resend_unanswered: bool) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            policy,
            resend_unanswered,
            attempt: 0,
        }
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Applies one event and returns the effects to run, in order.
    pub fn handle(&mut self, event: SessionEvent) -> Vec<Effect> {
        use ConnectionState as S;
        use SessionEvent as E;

        let before = self.state;
        let effects = match (self.state, event) {
            (S::Closed, _) => Vec::new(),

            (S::Disconnected, E::Connect) | (S::Disconnected, E::ReconnectTimerFired) => {
                self.state = S::Connecting;
                vec![Effect::OpenTransport]
            }

            (S::Connecting, E::Opened) => {
                self.state = S::Connected;
                self.attempt = 0;
                vec![Effect::FlushQueue]
            }
            (S::Connecting, E::Error(_)) | (S::Connecting, E::Closed(_)) => {
                self.state = S::Disconnected;
                vec![Effect::DropTransport, self.schedule_reconnect()]
            }

            (S::Connected, E::Message(bytes)) => vec![Effect::Dispatch(bytes)],
            (S::Connected, E::Closed(frame)) if frame.is_normal() => {
                self.state = S::Closed;
                vec![Effect::DropTransport, Effect::FailPending]
            }
            (S::Connected, E::Closed(_)) | (S::Connected, E::Error(_)) => {
                self.state = S::Disconnected;
                let mut effects = vec![Effect::DropTransport];
                if self.resend_unanswered {
                    effects.push(Effect::RequeueUnanswered);
                }
                effects.push(self.schedule_reconnect());
                effects
            }

            (S::Connected, E::Disconnect) => {
                self.state = S::Closing;
                vec![
                    Effect::CancelReconnect,
                    Effect::CloseTransport {
                        code: close_code::NORMAL,
                        reason: DISCONNECT_REASON.to_string(),
                    },
                    Effect::FailPending,
                ]
            }
            (S::Connecting, E::Disconnect) => {
                self.state = S::Closing;
                vec![Effect::CancelReconnect, Effect::FailPending]
            }
            (S::Disconnected, E::Disconnect) => {
                self.state = S::Closed;
                vec![Effect::CancelReconnect, Effect::FailPending]
            }

            // A connect attempt that completes after disconnect() is closed
            // right away.
            (S::Closing, E::Opened) => vec![Effect::CloseTransport {
                code: close_code::NORMAL,
                reason: DISCONNECT_REASON.to_string(),
            }],
            (S::Closing, E::Closed(_)) | (S::Closing, E::Error(_)) => {
                self.state = S::Closed;
                vec![Effect::DropTransport]
            }

            // Everything else is a no-op in the current state: duplicate
            // connect/disconnect calls, stale timers, frames while not
            // connected.
            _ => Vec::new(),
        };

        if self.state != before {
            tracing::info!(from = ?before, to = ?self.state, "session state changed");
        }
        effects
    }

    fn schedule_reconnect(&mut self) -> Effect {
        let delay = self.policy.delay(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        tracing::info!(attempt = self.attempt, delay_ms = delay.as_millis() as u64, "reconnect scheduled");
        Effect::ScheduleReconnect(delay)
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const DELAY: Duration = Duration::from_millis(300);

    // -- Helpers ----------------------------------------------------------

    fn machine() -> SessionMachine {
        SessionMachine::new(ReconnectPolicy::Fixed { delay: DELAY }, true)
    }

    fn connected() -> SessionMachine {
        let mut m = machine();
        m.handle(SessionEvent::Connect);
        m.handle(SessionEvent::Opened);
        assert_eq!(m.state(), ConnectionState::Connected);
        m
    }

    fn abnormal() -> SessionEvent {
        SessionEvent::Closed(CloseFrame::abnormal("reset"))
    }

    fn normal() -> SessionEvent {
        SessionEvent::Closed(CloseFrame::clean(close_code::NORMAL, "bye"))
    }

    // =====================================================================
    // Connecting
    // =====================================================================

    #[test]
    fn test_connect_from_disconnected_opens_transport() {
        let mut m = machine();
        assert_eq!(m.handle(SessionEvent::Connect), vec![Effect::OpenTransport]);
        assert_eq!(m.state(), ConnectionState::Connecting);
    }

    #[test]
    fn test_opened_flushes_queue() {
        let mut m = machine();
        m.handle(SessionEvent::Connect);
        assert_eq!(m.handle(SessionEvent::Opened), vec![Effect::FlushQueue]);
        assert_eq!(m.state(), ConnectionState::Connected);
    }

    #[test]
    fn test_connect_error_schedules_reconnect() {
        let mut m = machine();
        m.handle(SessionEvent::Connect);
        let effects = m.handle(SessionEvent::Error("refused".into()));
        assert_eq!(
            effects,
            vec![Effect::DropTransport, Effect::ScheduleReconnect(DELAY)]
        );
        assert_eq!(m.state(), ConnectionState::Disconnected);

        assert_eq!(
            m.handle(SessionEvent::ReconnectTimerFired),
            vec![Effect::OpenTransport]
        );
        assert_eq!(m.state(), ConnectionState::Connecting);
    }

    #[test]
    fn test_duplicate_connect_is_ignored() {
        let mut m = connected();
        assert!(m.handle(SessionEvent::Connect).is_empty());
        assert_eq!(m.state(), ConnectionState::Connected);
    }

    // =====================================================================
    // Closing from Connected
    // =====================================================================

    #[test]
    fn test_abnormal_close_requeues_and_reconnects() {
        let mut m = connected();
        let effects = m.handle(abnormal());
        assert_eq!(
            effects,
            vec![
                Effect::DropTransport,
                Effect::RequeueUnanswered,
                Effect::ScheduleReconnect(DELAY)
            ]
        );
        assert_eq!(m.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_abnormal_close_without_resend_skips_requeue() {
        let mut m = SessionMachine::new(ReconnectPolicy::Fixed { delay: DELAY }, false);
        m.handle(SessionEvent::Connect);
        m.handle(SessionEvent::Opened);
        assert!(!m.handle(abnormal()).contains(&Effect::RequeueUnanswered));
    }

    #[test]
    fn test_transport_error_while_connected_acts_like_abnormal_close() {
        let mut m = connected();
        let effects = m.handle(SessionEvent::Error("recv failed".into()));
        assert!(effects.contains(&Effect::ScheduleReconnect(DELAY)));
        assert_eq!(m.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_normal_close_is_terminal_without_reconnect() {
        let mut m = connected();
        let effects = m.handle(normal());
        assert_eq!(effects, vec![Effect::DropTransport, Effect::FailPending]);
        assert_eq!(m.state(), ConnectionState::Closed);
        assert!(m.handle(SessionEvent::ReconnectTimerFired).is_empty());
        assert!(m.handle(SessionEvent::Connect).is_empty());
    }

    #[test]
    fn test_no_status_close_reconnects() {
        let mut m = connected();
        let effects = m.handle(SessionEvent::Closed(CloseFrame::clean(close_code::NO_STATUS, "")));
        assert!(effects.contains(&Effect::ScheduleReconnect(DELAY)));
    }

    // =====================================================================
    // Explicit disconnect
    // =====================================================================

    #[test]
    fn test_disconnect_while_connected_closes_then_terminates() {
        let mut m = connected();
        let effects = m.handle(SessionEvent::Disconnect);
        assert_eq!(
            effects,
            vec![
                Effect::CancelReconnect,
                Effect::CloseTransport {
                    code: close_code::NORMAL,
                    reason: DISCONNECT_REASON.into()
                },
                Effect::FailPending,
            ]
        );
        assert_eq!(m.state(), ConnectionState::Closing);

        assert_eq!(m.handle(normal()), vec![Effect::DropTransport]);
        assert_eq!(m.state(), ConnectionState::Closed);
    }

    #[test]
    fn test_disconnect_while_waiting_to_reconnect_cancels_timer() {
        let mut m = connected();
        m.handle(abnormal());
        let effects = m.handle(SessionEvent::Disconnect);
        assert_eq!(effects, vec![Effect::CancelReconnect, Effect::FailPending]);
        assert_eq!(m.state(), ConnectionState::Closed);
    }

    #[test]
    fn test_disconnect_while_connecting_closes_late_open() {
        let mut m = machine();
        m.handle(SessionEvent::Connect);
        m.handle(SessionEvent::Disconnect);
        assert_eq!(m.state(), ConnectionState::Closing);

        let effects = m.handle(SessionEvent::Opened);
        assert!(matches!(effects.as_slice(), [Effect::CloseTransport { .. }]));
        m.handle(normal());
        assert_eq!(m.state(), ConnectionState::Closed);
    }

    // =====================================================================
    // Messages and backoff
    // =====================================================================

    #[test]
    fn test_message_dispatched_only_while_connected() {
        let mut m = machine();
        assert!(m.handle(SessionEvent::Message(vec![1])).is_empty());
        let mut m = connected();
        assert_eq!(
            m.handle(SessionEvent::Message(vec![1])),
            vec![Effect::Dispatch(vec![1])]
        );
    }

    #[test]
    fn test_exponential_backoff_grows_and_resets_on_open() {
        let mut m = SessionMachine::new(
            ReconnectPolicy::Exponential {
                initial: Duration::from_millis(100),
                max: Duration::from_secs(10),
                multiplier: 2.0,
            },
            true,
        );
        let fail = |m: &mut SessionMachine| {
            m.handle(SessionEvent::Connect);
            m.handle(SessionEvent::ReconnectTimerFired);
            m.handle(SessionEvent::Error("refused".into()))
        };
        assert!(fail(&mut m).contains(&Effect::ScheduleReconnect(Duration::from_millis(100))));
        assert!(fail(&mut m).contains(&Effect::ScheduleReconnect(Duration::from_millis(200))));
        assert!(fail(&mut m).contains(&Effect::ScheduleReconnect(Duration::from_millis(400))));

        m.handle(SessionEvent::ReconnectTimerFired);
        m.handle(SessionEvent::Opened);
        let effects = m.handle(abnormal());
        assert!(effects.contains(&Effect::ScheduleReconnect(Duration::from_millis(100))));
    }
}
