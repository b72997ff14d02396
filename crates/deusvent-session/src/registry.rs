//! The request registry: who is waiting for which response.
//!
//! Every correlated request gets a [`RequestId`] from a bounded pool of 255
//! ids and a continuation (a `oneshot` sender) that the response resolves.
//!
//! # Allocation
//!
//! The pool is a 256-bit "in use" bitset plus a cursor. `allocate` walks
//! forward from the cursor, skipping the reserved id 0 and any id still in
//! use, and fails with [`SessionError::RequestIdsExhausted`] once every id
//! is taken. Because the cursor keeps moving, a freed id is not handed out
//! again until the cursor comes all the way around, so a late response to
//! an old request is unlikely to land on a fresh one.
//!
//! ```text
//! allocate() ──→ register() ──→ mark_sent() ──→ resolve() / reject()
//!      │              │                              │
//!      └── release() ─┘        expire() ─────────────┤
//!                              reject_all() ─────────┘  (id freed)
//! ```
//!
//! # Concurrency note
//!
//! `RequestRegistry` is a plain struct. The client keeps it behind the
//! same mutex as the outbound queue so that allocating, registering, and
//! enqueueing a request happen as one step.

use std::collections::HashMap;

use deusvent_protocol::{RequestId, ServerMessage, Timestamp};
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::{RequestError, SessionError};

/// A response together with when its request went out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub message: ServerMessage,
    /// When the answered frame was last written to a connection. A resent
    /// request reports the resend.
    pub sent_at: Option<Timestamp>,
}

/// What a pending request resolves with.
pub type RequestResult = Result<Reply, RequestError>;

/// The single-use continuation of a pending request.
pub type Continuation = oneshot::Sender<RequestResult>;

/// One in-flight request.
struct PendingRequest {
    tag: u16,
    deadline: Option<Instant>,
    continuation: Continuation,
    /// The encoded frame, kept for resending after a reconnect.
    frame: Vec<u8>,
    /// Submission order, for resending in the original order.
    seq: u64,
    /// When the frame was written to the current connection.
    sent_at: Option<Timestamp>,
}

/// Maps in-flight request ids to their continuations.
pub struct RequestRegistry {
    in_use: [u64; 4],
    cursor: u8,
    pending: HashMap<RequestId, PendingRequest>,
    next_seq: u64,
}

impl Default for RequestRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestRegistry {
    /// Creates an empty registry. The first id handed out is 1.
    pub fn new() -> Self {
        Self {
            in_use: [0; 4],
            cursor: 0,
            pending: HashMap::new(),
            next_seq: 0,
        }
    }

    /// Reserves the next free request id.
    ///
    /// # Errors
    /// [`SessionError::RequestIdsExhausted`] when all 255 ids are in use.
    pub fn allocate(&mut self) -> Result<RequestId, SessionError> {
        // 256 steps visit every byte value once, starting after the cursor.
        for _ in 0..=u8::MAX as usize {
            self.cursor = self.cursor.wrapping_add(1);
            if self.cursor == 0 {
                continue;
            }
            let id = RequestId(self.cursor);
            if !self.is_in_use(id) {
                self.set_in_use(id, true);
                return Ok(id);
            }
        }
        Err(SessionError::RequestIdsExhausted)
    }

    /// Attaches a continuation to an allocated id.
    ///
    /// `frame` is the encoded request, kept so it can be resent if the
    /// connection drops before the answer arrives.
    ///
    /// # Errors
    /// - [`SessionError::NotAllocated`] — `id` did not come from `allocate`
    /// - [`SessionError::AlreadyPending`] — `id` already has a continuation
    pub fn register(
        &mut self,
        id: RequestId,
        tag: u16,
        deadline: Option<Instant>,
        continuation: Continuation,
        frame: Vec<u8>,
    ) -> Result<(), SessionError> {
        if id.is_none() || !self.is_in_use(id) {
            return Err(SessionError::NotAllocated(id));
        }
        if self.pending.contains_key(&id) {
            return Err(SessionError::AlreadyPending(id));
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.pending.insert(
            id,
            PendingRequest {
                tag,
                deadline,
                continuation,
                frame,
                seq,
                sent_at: None,
            },
        );
        Ok(())
    }

    /// Frees an id without resolving anything (e.g. encoding failed after
    /// allocation). Drops a registered continuation, if any.
    pub fn release(&mut self, id: RequestId) {
        self.pending.remove(&id);
        self.set_in_use(id, false);
    }

    /// Resolves the pending request `id` with a response.
    ///
    /// Returns `false` if nothing was pending for `id`; the caller should
    /// then report the frame through [`reject_unmatched`](Self::reject_unmatched).
    pub fn resolve(&mut self, id: RequestId, message: ServerMessage) -> bool {
        let Some(pending) = self.take(id) else {
            return false;
        };
        let reply = Reply {
            message,
            sent_at: pending.sent_at,
        };
        // The caller may have given up waiting; that's fine.
        let _ = pending.continuation.send(Ok(reply));
        true
    }

    /// Resolves the pending request `id` with an error.
    pub fn reject(&mut self, id: RequestId, error: RequestError) -> bool {
        let Some(pending) = self.take(id) else {
            return false;
        };
        let _ = pending.continuation.send(Err(error));
        true
    }

    /// Reports a correlated frame that matched no pending request (stale,
    /// duplicate, or unknown id). Not fatal: the frame is dropped.
    pub fn reject_unmatched(&self, id: RequestId, tag: u16) {
        tracing::warn!(request_id = %id, tag, "dropping response with no pending request");
    }

    /// Tag of the request pending under `id`.
    pub fn pending_tag(&self, id: RequestId) -> Option<u16> {
        self.pending.get(&id).map(|p| p.tag)
    }

    /// Records that the frame for `id` was written to a connection at `at`.
    pub fn mark_sent(&mut self, id: RequestId, at: Timestamp) {
        if let Some(pending) = self.pending.get_mut(&id) {
            pending.sent_at = Some(at);
        }
    }

    /// Takes the frames of requests that were sent but never answered, in
    /// submission order, and marks them unsent again.
    ///
    /// Used when a connection drops: these frames are queued again for the
    /// next connection.
    pub fn take_unanswered(&mut self) -> Vec<(RequestId, Vec<u8>)> {
        let mut unanswered: Vec<_> = self
            .pending
            .iter_mut()
            .filter(|(_, p)| p.sent_at.is_some())
            .map(|(id, p)| {
                p.sent_at = None;
                (p.seq, *id, p.frame.clone())
            })
            .collect();
        unanswered.sort_by_key(|(seq, _, _)| *seq);
        unanswered.into_iter().map(|(_, id, frame)| (id, frame)).collect()
    }

    /// Expires requests whose deadline is at or before `now`, resolving
    /// them with [`RequestError::Timeout`]. Also drops requests whose caller
    /// stopped waiting.
    ///
    /// Returns every id that was freed.
    pub fn expire(&mut self, now: Instant) -> Vec<RequestId> {
        let stale: Vec<RequestId> = self
            .pending
            .iter()
            .filter(|(_, p)| p.continuation.is_closed() || p.deadline.is_some_and(|d| d <= now))
            .map(|(id, _)| *id)
            .collect();

        for &id in &stale {
            if let Some(pending) = self.pending.remove(&id) {
                self.set_in_use(id, false);
                if !pending.continuation.is_closed() {
                    tracing::warn!(request_id = %id, tag = pending.tag, "request timed out");
                    let _ = pending.continuation.send(Err(RequestError::Timeout(id)));
                }
            }
        }
        stale
    }

    /// Rejects every pending request with `error` and frees their ids.
    pub fn reject_all(&mut self, error: RequestError) -> usize {
        let drained: Vec<_> = self.pending.drain().collect();
        let count = drained.len();
        for (id, pending) in drained {
            self.set_in_use(id, false);
            let _ = pending.continuation.send(Err(error.clone()));
        }
        count
    }

    /// Number of requests waiting for a response.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Returns `true` if a continuation is registered for `id`.
    pub fn is_pending(&self, id: RequestId) -> bool {
        self.pending.contains_key(&id)
    }

    /// Number of ids currently reserved (pending or allocated).
    pub fn in_use_count(&self) -> usize {
        self.in_use.iter().map(|word| word.count_ones() as usize).sum()
    }

    fn take(&mut self, id: RequestId) -> Option<PendingRequest> {
        let pending = self.pending.remove(&id)?;
        self.set_in_use(id, false);
        Some(pending)
    }

    fn is_in_use(&self, id: RequestId) -> bool {
        let bit = id.0 as usize;
        self.in_use[bit / 64] & (1 << (bit % 64)) != 0
    }

    fn set_in_use(&mut self, id: RequestId, used: bool) {
        let bit = id.0 as usize;
        if used {
            self.in_use[bit / 64] |= 1 << (bit % 64);
        } else {
            self.in_use[bit / 64] &= !(1 << (bit % 64));
        }
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use deusvent_protocol::{ServerStatus, ServerTimestamp, Status};
    use std::collections::HashSet;
    use std::time::Duration;
    use tokio::sync::oneshot::Receiver;

    // -- Helpers ----------------------------------------------------------

    fn status() -> ServerMessage {
        ServerMessage::ServerStatus(ServerStatus {
            timestamp: ServerTimestamp::from_millis(1),
            status: Status::Ok,
        })
    }

    /// Allocates and registers a request with no deadline.
    fn register(reg: &mut RequestRegistry) -> (RequestId, Receiver<RequestResult>) {
        register_with(reg, None)
    }

    fn register_with(
        reg: &mut RequestRegistry,
        deadline: Option<Instant>,
    ) -> (RequestId, Receiver<RequestResult>) {
        let id = reg.allocate().expect("id available");
        let (tx, rx) = oneshot::channel();
        reg.register(id, 0, deadline, tx, vec![0, 0, id.0]).expect("register");
        (id, rx)
    }

    // =====================================================================
    // allocate()
    // =====================================================================

    #[test]
    fn test_allocate_starts_at_one_and_increments() {
        let mut reg = RequestRegistry::new();
        assert_eq!(reg.allocate().unwrap(), RequestId(1));
        assert_eq!(reg.allocate().unwrap(), RequestId(2));
        assert_eq!(reg.allocate().unwrap(), RequestId(3));
    }

    #[test]
    fn test_allocate_255_ids_unique_then_exhausted() {
        let mut reg = RequestRegistry::new();
        let mut seen = HashSet::new();
        for _ in 0..255 {
            let id = reg.allocate().unwrap();
            assert!(!id.is_none(), "id 0 must never be allocated");
            assert!(seen.insert(id), "duplicate id {id}");
        }
        assert_eq!(reg.allocate(), Err(SessionError::RequestIdsExhausted));
        assert_eq!(reg.in_use_count(), 255);
    }

    #[test]
    fn test_allocate_wraparound_skips_zero_and_pending() {
        let mut reg = RequestRegistry::new();
        let (first, _rx) = register(&mut reg); // id 1 stays pending
        for _ in 2..=255 {
            let id = reg.allocate().unwrap();
            reg.release(id);
        }
        // Cursor is at 255; 0 is reserved and 1 is pending.
        assert_eq!(first, RequestId(1));
        assert_eq!(reg.allocate().unwrap(), RequestId(2));
    }

    #[test]
    fn test_allocate_does_not_reuse_freed_id_immediately() {
        let mut reg = RequestRegistry::new();
        let (id, _rx) = register(&mut reg);
        assert!(reg.resolve(id, status()));
        assert_ne!(reg.allocate().unwrap(), id);
    }

    // =====================================================================
    // register()
    // =====================================================================

    #[test]
    fn test_register_unallocated_id_returns_not_allocated() {
        let mut reg = RequestRegistry::new();
        let (tx, _rx) = oneshot::channel();
        let result = reg.register(RequestId(9), 0, None, tx, vec![]);
        assert_eq!(result, Err(SessionError::NotAllocated(RequestId(9))));
    }

    #[test]
    fn test_register_twice_returns_already_pending() {
        let mut reg = RequestRegistry::new();
        let (id, _rx) = register(&mut reg);
        let (tx, _rx2) = oneshot::channel();
        assert_eq!(
            reg.register(id, 0, None, tx, vec![]),
            Err(SessionError::AlreadyPending(id))
        );
    }

    #[test]
    fn test_register_reserved_zero_returns_not_allocated() {
        let mut reg = RequestRegistry::new();
        let (tx, _rx) = oneshot::channel();
        assert_eq!(
            reg.register(RequestId::NONE, 0, None, tx, vec![]),
            Err(SessionError::NotAllocated(RequestId::NONE))
        );
    }

    // =====================================================================
    // resolve() / reject()
    // =====================================================================

    #[test]
    fn test_resolve_delivers_and_frees_id() {
        let mut reg = RequestRegistry::new();
        let (id, mut rx) = register(&mut reg);

        assert!(reg.resolve(id, status()));
        let reply = rx.try_recv().unwrap().unwrap();
        assert_eq!(reply.message, status());
        assert_eq!(reply.sent_at, None, "never written");
        assert!(!reg.is_pending(id));
        assert_eq!(reg.in_use_count(), 0);
    }

    #[test]
    fn test_resolve_twice_second_is_unmatched() {
        let mut reg = RequestRegistry::new();
        let (id, _rx) = register(&mut reg);
        assert!(reg.resolve(id, status()));
        assert!(!reg.resolve(id, status()));
    }

    #[test]
    fn test_resolve_routes_only_to_matching_id() {
        let mut reg = RequestRegistry::new();
        let (a, mut rx_a) = register(&mut reg);
        let (_b, mut rx_b) = register(&mut reg);

        assert!(reg.resolve(a, status()));
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_err(), "b must still be waiting");
    }

    #[test]
    fn test_reject_delivers_error() {
        let mut reg = RequestRegistry::new();
        let (id, mut rx) = register(&mut reg);
        assert!(reg.reject(id, RequestError::UnexpectedResponse { tag: 2 }));
        assert_eq!(
            rx.try_recv().unwrap(),
            Err(RequestError::UnexpectedResponse { tag: 2 })
        );
    }

    // =====================================================================
    // expire()
    // =====================================================================

    #[tokio::test(start_paused = true)]
    async fn test_expire_past_deadline_times_out() {
        let mut reg = RequestRegistry::new();
        let now = Instant::now();
        let (late, mut rx_late) = register_with(&mut reg, Some(now + Duration::from_secs(1)));
        let (_fresh, mut rx_fresh) = register_with(&mut reg, Some(now + Duration::from_secs(60)));
        let (_forever, _rx_forever) = register_with(&mut reg, None);

        let expired = reg.expire(now + Duration::from_secs(2));

        assert_eq!(expired, vec![late]);
        assert_eq!(rx_late.try_recv().unwrap(), Err(RequestError::Timeout(late)));
        assert!(rx_fresh.try_recv().is_err());
        assert_eq!(reg.pending_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expire_drops_abandoned_requests() {
        let mut reg = RequestRegistry::new();
        let (id, rx) = register(&mut reg);
        drop(rx);

        assert_eq!(reg.expire(Instant::now()), vec![id]);
        assert_eq!(reg.in_use_count(), 0);
    }

    // =====================================================================
    // take_unanswered() / reject_all()
    // =====================================================================

    #[test]
    fn test_take_unanswered_returns_sent_frames_in_submission_order() {
        let mut reg = RequestRegistry::new();
        let (a, _ra) = register(&mut reg);
        let (b, _rb) = register(&mut reg);
        let (c, _rc) = register(&mut reg);
        reg.mark_sent(c, Timestamp::from_millis(10));
        reg.mark_sent(a, Timestamp::from_millis(20));

        let frames = reg.take_unanswered();
        let ids: Vec<_> = frames.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![a, c]);
        assert_eq!(frames[0].1, vec![0, 0, a.0]);
        assert!(reg.take_unanswered().is_empty(), "marked unsent again");
        assert!(reg.is_pending(b));
    }

    #[test]
    fn test_resolve_reports_latest_send_time() {
        let mut reg = RequestRegistry::new();
        let (id, mut rx) = register(&mut reg);
        reg.mark_sent(id, Timestamp::from_millis(100));

        // Connection dropped; the frame goes out again later.
        assert_eq!(reg.take_unanswered().len(), 1);
        reg.mark_sent(id, Timestamp::from_millis(900));

        assert!(reg.resolve(id, status()));
        let reply = rx.try_recv().unwrap().unwrap();
        assert_eq!(reply.sent_at, Some(Timestamp::from_millis(900)));
    }

    #[test]
    fn test_reject_all_closes_every_continuation() {
        let mut reg = RequestRegistry::new();
        let (_a, mut ra) = register(&mut reg);
        let (_b, mut rb) = register(&mut reg);

        assert_eq!(reg.reject_all(RequestError::Closed), 2);
        assert_eq!(ra.try_recv().unwrap(), Err(RequestError::Closed));
        assert_eq!(rb.try_recv().unwrap(), Err(RequestError::Closed));
        assert_eq!(reg.in_use_count(), 0);
    }
}
