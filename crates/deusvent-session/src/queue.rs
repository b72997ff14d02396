//! FIFO buffer of encoded frames waiting for a connection.

use std::collections::VecDeque;

use deusvent_protocol::RequestId;
use deusvent_transport::Connection;

use crate::SessionError;

/// One encoded frame waiting to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Request id carried in the frame ([`RequestId::NONE`] for
    /// uncorrelated sends).
    pub request_id: RequestId,
    pub bytes: Vec<u8>,
}

/// Frames in submission order.
///
/// Nothing is dropped because of a disconnect: a frame leaves the queue
/// only after the transport accepted it, or when the session is torn down.
#[derive(Debug)]
pub struct OutboundQueue {
    messages: VecDeque<OutboundMessage>,
    capacity: usize,
}

impl OutboundQueue {
    /// Creates a queue holding at most `capacity` frames.
    pub fn new(capacity: usize) -> Self {
        Self {
            messages: VecDeque::new(),
            capacity,
        }
    }

    /// Appends a frame. Safe to call in any connection state.
    ///
    /// # Errors
    /// [`SessionError::QueueFull`] at the configured bound.
    pub fn enqueue(&mut self, message: OutboundMessage) -> Result<(), SessionError> {
        if self.messages.len() >= self.capacity {
            return Err(SessionError::QueueFull);
        }
        self.messages.push_back(message);
        Ok(())
    }

    /// Writes queued frames to `connection` in order.
    ///
    /// `None` means "not connected" and makes this a no-op. Each frame is
    /// removed only after a successful send and then reported to `on_sent`.
    /// The first failed send stops the flush; that frame stays at the head.
    ///
    /// Returns the number of frames written.
    pub async fn flush<C: Connection>(
        &mut self,
        connection: Option<&C>,
        mut on_sent: impl FnMut(&OutboundMessage),
    ) -> Result<usize, C::Error> {
        let Some(connection) = connection else {
            return Ok(0);
        };
        let mut sent = 0;
        while let Some(head) = self.messages.front() {
            connection.send(&head.bytes).await?;
            if let Some(message) = self.messages.pop_front() {
                on_sent(&message);
            }
            sent += 1;
        }
        Ok(sent)
    }

    /// Puts frames back at the head, ahead of everything already queued,
    /// keeping their relative order. Ignores the capacity bound.
    pub fn requeue_front(&mut self, messages: impl IntoIterator<Item = OutboundMessage>) {
        let mut front: VecDeque<_> = messages.into_iter().collect();
        front.append(&mut self.messages);
        self.messages = front;
    }

    /// Drops any queued frame for `id`. Returns `true` if one was removed.
    pub fn remove(&mut self, id: RequestId) -> bool {
        let before = self.messages.len();
        self.messages.retain(|m| m.request_id != id);
        self.messages.len() != before
    }

    /// Discards everything. Returns how many frames were dropped.
    pub fn clear(&mut self) -> usize {
        let count = self.messages.len();
        self.messages.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deusvent_transport::{Connector, MemoryConnection, MemoryConnector};

    fn msg(id: u8, byte: u8) -> OutboundMessage {
        OutboundMessage {
            request_id: RequestId(id),
            bytes: vec![byte],
        }
    }

    #[test]
    fn test_enqueue_beyond_capacity_returns_queue_full() {
        let mut queue = OutboundQueue::new(2);
        queue.enqueue(msg(1, 1)).unwrap();
        queue.enqueue(msg(2, 2)).unwrap();
        assert_eq!(queue.enqueue(msg(3, 3)), Err(SessionError::QueueFull));
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test]
    async fn test_flush_without_connection_is_noop() {
        let mut queue = OutboundQueue::new(8);
        queue.enqueue(msg(1, 1)).unwrap();
        let sent = queue.flush(None::<&MemoryConnection>, |_| {}).await.unwrap();
        assert_eq!(sent, 0);
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_flush_sends_in_fifo_order() {
        let (connector, mut listener) = MemoryConnector::new();
        let conn = connector.connect().await.unwrap();
        let mut peer = listener.accept().await.unwrap();

        let mut queue = OutboundQueue::new(8);
        for b in [1, 2, 3] {
            queue.enqueue(msg(b, b)).unwrap();
        }
        let mut reported = Vec::new();
        let sent = queue
            .flush(Some(&conn), |m| reported.push(m.request_id))
            .await
            .unwrap();

        assert_eq!(sent, 3);
        assert!(queue.is_empty());
        assert_eq!(reported, vec![RequestId(1), RequestId(2), RequestId(3)]);
        for b in [1, 2, 3] {
            assert_eq!(peer.recv().await.unwrap(), vec![b]);
        }
    }

    #[tokio::test]
    async fn test_flush_failure_keeps_head_queued() {
        let (connector, mut listener) = MemoryConnector::new();
        let conn = connector.connect().await.unwrap();
        listener.accept().await.unwrap().drop_abnormally();

        let mut queue = OutboundQueue::new(8);
        queue.enqueue(msg(1, 1)).unwrap();
        queue.enqueue(msg(2, 2)).unwrap();
        assert!(queue.flush(Some(&conn), |_| {}).await.is_err());
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_requeue_front_preserves_relative_order() {
        let mut queue = OutboundQueue::new(8);
        queue.enqueue(msg(3, 3)).unwrap();
        queue.requeue_front(vec![msg(1, 1), msg(2, 2)]);

        let order: Vec<_> = queue.messages.iter().map(|m| m.request_id.0).collect();
        assert_eq!(order, vec![1, 2, 3]);
    }

    #[test]
    fn test_remove_and_clear() {
        let mut queue = OutboundQueue::new(8);
        queue.enqueue(msg(1, 1)).unwrap();
        queue.enqueue(msg(2, 2)).unwrap();
        assert!(queue.remove(RequestId(1)));
        assert!(!queue.remove(RequestId(1)));
        assert_eq!(queue.clear(), 1);
        assert!(queue.is_empty());
    }
}
