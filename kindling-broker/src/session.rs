//! The Session Table: a persistent half (`Session`) surviving across
//! reconnects for non-clean sessions, and a live half (`ClientHandle`)
//! holding the channel back to a connected client's write task.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use kindling_core::message::Message;
use tokio::sync::{mpsc, oneshot};

use crate::inflight::InflightTracker;

/// Bound on the per-client offline queue; beyond this, the oldest queued
/// message is dropped to make room for the newest (a bounded queue is
/// required so a long-offline non-clean session cannot grow unbounded
/// memory use — the distilled spec leaves this core-defined).
pub const MAX_QUEUED_MESSAGES: usize = 1000;

/// The persistent piece of a client's state: survives a disconnect when
/// `clean_session` is false, and is torn down immediately otherwise.
#[derive(Debug)]
pub struct Session {
    pub client_id: Arc<str>,
    pub clean_session: bool,
    /// Filters this client is subscribed to, tracked here only so a
    /// clean-session disconnect (or persistent-session teardown) can walk
    /// and remove them from the Topic Index without a reverse index.
    pub subscriptions: HashSet<String>,
    /// Messages queued while offline, for delivery on reconnect (I4: only
    /// populated for non-clean, offline clients).
    pub outgoing_msgs: VecDeque<Message>,
    pub inflight: InflightTracker,
    pub has_lwt: bool,
    pub lwt: Option<Message>,
}

impl Session {
    pub fn new(client_id: Arc<str>, clean_session: bool) -> Self {
        Self {
            client_id,
            clean_session,
            subscriptions: HashSet::new(),
            outgoing_msgs: VecDeque::new(),
            inflight: InflightTracker::new(),
            has_lwt: false,
            lwt: None,
        }
    }

    /// Appends `message` to the offline queue, dropping the oldest entry
    /// first if the queue is already at capacity.
    pub fn queue_offline(&mut self, message: Message) {
        if self.outgoing_msgs.len() >= MAX_QUEUED_MESSAGES {
            self.outgoing_msgs.pop_front();
        }
        self.outgoing_msgs.push_back(message);
    }

    /// Drains every queued offline message, in FIFO order, for delivery on
    /// reconnect.
    pub fn drain_offline(&mut self) -> VecDeque<Message> {
        std::mem::take(&mut self.outgoing_msgs)
    }
}

/// The live piece of a connected client: the channel its write task reads
/// encoded frames from, and the signal that tears its connection task down
/// on command. Dropped (and the channel closed) when the connection's
/// write task exits.
#[derive(Debug)]
pub struct ClientHandle {
    pub client_id: Arc<str>,
    writer: mpsc::Sender<bytes::Bytes>,
    close: oneshot::Sender<()>,
}

impl ClientHandle {
    pub fn new(client_id: Arc<str>, writer: mpsc::Sender<bytes::Bytes>, close: oneshot::Sender<()>) -> Self {
        Self { client_id, writer, close }
    }

    /// Implements `request_write`: pushes an already-encoded frame onto
    /// this client's write-task channel. Returns `false` if the client's
    /// write task has already gone away (the channel is closed) — the
    /// caller should treat this the same as any other write failure and
    /// tear the client down.
    pub fn request_write(&self, frame: bytes::Bytes) -> bool {
        self.writer.try_send(frame).is_ok()
    }

    /// Forces this client's connection task to stop reading and close its
    /// socket — used when the protocol worker itself decides a connection
    /// must end (a duplicate `client_id`, a protocol error) rather than the
    /// client ending it with its own DISCONNECT. The connection task's read
    /// loop selects on this signal alongside its next read.
    pub fn force_close(self) {
        let _ = self.close.send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use kindling_core::qos::QoS;

    fn msg(n: u8) -> Message {
        Message::new("a/b", Bytes::from(vec![n]), QoS::AtLeastOnce, false)
    }

    #[test]
    fn offline_queue_drops_oldest_once_full() {
        let mut session = Session::new(Arc::from("c1"), false);
        for n in 0..(MAX_QUEUED_MESSAGES as u8).wrapping_add(2) {
            session.queue_offline(msg(n));
        }

        assert_eq!(session.outgoing_msgs.len(), MAX_QUEUED_MESSAGES);
        assert_eq!(session.outgoing_msgs.front().unwrap().payload, Bytes::from(vec![2]));
    }

    #[test]
    fn drain_offline_empties_in_fifo_order() {
        let mut session = Session::new(Arc::from("c1"), false);
        session.queue_offline(msg(1));
        session.queue_offline(msg(2));

        let drained = session.drain_offline();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].payload, Bytes::from(vec![1]));
        assert!(session.outgoing_msgs.is_empty());
    }

    #[tokio::test]
    async fn request_write_fails_once_receiver_is_dropped() {
        let (tx, rx) = mpsc::channel(4);
        let (close_tx, _close_rx) = oneshot::channel();
        let handle = ClientHandle::new(Arc::from("c1"), tx, close_tx);
        drop(rx);

        assert!(!handle.request_write(Bytes::from_static(b"frame")));
    }

    #[tokio::test]
    async fn force_close_signals_the_connection_task() {
        let (tx, _rx) = mpsc::channel(4);
        let (close_tx, close_rx) = oneshot::channel();
        let handle = ClientHandle::new(Arc::from("c1"), tx, close_tx);

        handle.force_close();

        assert!(close_rx.await.is_ok());
    }
}
