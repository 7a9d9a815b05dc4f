//! Per-client packet-identifier tracking for QoS 1/2 exchanges.
//!
//! Three sparse maps play the role the distilled spec's fixed-size
//! `i_msgs[0..65535]`/`i_acks[0..65535]`/`in_i_acks[0..65535]` arrays play
//! in the original: a `HashMap<u16, _>` is a conforming implementation of
//! the same indexed-by-packet-identifier contract, since packet
//! identifiers in flight at any moment are a small fraction of the full
//! 16-bit space.

use std::collections::HashMap;
use std::time::Instant;

use kindling_core::message::Message;

/// The kind of acknowledgement still owed for an outbound PUBLISH.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingAck {
    /// Waiting for PUBACK (QoS 1).
    PubAck,
    /// Waiting for PUBREC (QoS 2, WAIT_PUBREC).
    PubRec,
    /// PUBREC received; waiting for PUBCOMP (QoS 2, WAIT_PUBCOMP).
    PubRel,
}

/// An outbound PUBLISH awaiting acknowledgement.
#[derive(Debug, Clone)]
pub struct OutboundInflight {
    pub message: Message,
    pub sent_at: Instant,
}

/// Tracks the in-flight QoS 1/2 state for one client.
#[derive(Debug, Default)]
pub struct InflightTracker {
    i_msgs: HashMap<u16, OutboundInflight>,
    i_acks: HashMap<u16, PendingAck>,
    in_i_acks: HashMap<u16, Message>,
    next_mid_cursor: u16,
}

impl InflightTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a free packet identifier in `[1, 65535]` by advancing a
    /// cursor and skipping any value still in use outbound. Returns `None`
    /// if every identifier is occupied (full saturation); callers must
    /// drop the publish to this client and log a warning, per the
    /// tracker's saturation policy.
    pub fn next_free_mid(&mut self) -> Option<u16> {
        if self.i_msgs.len() >= u16::MAX as usize {
            return None;
        }

        for _ in 0..u16::MAX {
            self.next_mid_cursor = self.next_mid_cursor.wrapping_add(1);
            if self.next_mid_cursor == 0 {
                self.next_mid_cursor = 1;
            }
            if !self.i_msgs.contains_key(&self.next_mid_cursor) {
                return Some(self.next_mid_cursor);
            }
        }

        None
    }

    /// Records a freshly sent outbound PUBLISH and the ack it now awaits.
    pub fn record_outbound(&mut self, mid: u16, message: Message, ack: PendingAck) {
        self.i_msgs.insert(
            mid,
            OutboundInflight {
                message,
                sent_at: Instant::now(),
            },
        );
        self.i_acks.insert(mid, ack);
    }

    /// PUBACK received for QoS 1: clears both records.
    pub fn complete_puback(&mut self, mid: u16) -> bool {
        let cleared = self.i_acks.remove(&mid).is_some();
        self.i_msgs.remove(&mid);
        cleared
    }

    /// PUBREC received for QoS 2: promotes the pending ack to PUBREL,
    /// keeping the original PUBLISH record for potential PUBREL retransmit
    /// bookkeeping. Returns `false` if no such outbound entry exists.
    pub fn promote_to_pubrel(&mut self, mid: u16) -> bool {
        match self.i_acks.get_mut(&mid) {
            Some(ack) => {
                *ack = PendingAck::PubRel;
                if let Some(entry) = self.i_msgs.get_mut(&mid) {
                    entry.sent_at = Instant::now();
                }
                true
            }
            None => false,
        }
    }

    /// PUBCOMP received for QoS 2: clears both records.
    pub fn complete_pubcomp(&mut self, mid: u16) -> bool {
        let cleared = self.i_acks.remove(&mid).is_some();
        self.i_msgs.remove(&mid);
        cleared
    }

    /// Records an inbound QoS 2 PUBLISH that has been PUBREC'd and is
    /// awaiting PUBREL. Returns `true` if this is a fresh record (the
    /// caller should deliver to subscribers) or `false` if `mid` was
    /// already RECEIVED (a duplicate PUBLISH that must only re-send
    /// PUBREC, not re-publish).
    pub fn record_inbound(&mut self, mid: u16, message: Message) -> bool {
        if self.in_i_acks.contains_key(&mid) {
            return false;
        }
        self.in_i_acks.insert(mid, message);
        true
    }

    /// PUBREL received for an inbound QoS 2 message: clears the RECEIVED
    /// record. Returns `true` if a record existed.
    pub fn complete_pubrel(&mut self, mid: u16) -> bool {
        self.in_i_acks.remove(&mid).is_some()
    }

    pub fn outbound_count(&self) -> usize {
        self.i_msgs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use kindling_core::qos::QoS;

    fn msg() -> Message {
        Message::new("a/b", Bytes::from_static(b"hi"), QoS::AtLeastOnce, false)
    }

    #[test]
    fn allocates_increasing_identifiers_and_skips_zero() {
        let mut tracker = InflightTracker::new();
        let first = tracker.next_free_mid().unwrap();
        assert_ne!(first, 0);
        tracker.record_outbound(first, msg(), PendingAck::PubAck);

        let second = tracker.next_free_mid().unwrap();
        assert_ne!(second, first);
    }

    #[test]
    fn puback_clears_outbound_state() {
        let mut tracker = InflightTracker::new();
        let mid = tracker.next_free_mid().unwrap();
        tracker.record_outbound(mid, msg(), PendingAck::PubAck);

        assert!(tracker.complete_puback(mid));
        assert_eq!(tracker.outbound_count(), 0);
        assert!(!tracker.complete_puback(mid));
    }

    #[test]
    fn qos2_outbound_promotes_through_pubrec_then_clears_on_pubcomp() {
        let mut tracker = InflightTracker::new();
        let mid = tracker.next_free_mid().unwrap();
        tracker.record_outbound(mid, msg(), PendingAck::PubRec);

        assert!(tracker.promote_to_pubrel(mid));
        assert!(tracker.complete_pubcomp(mid));
        assert_eq!(tracker.outbound_count(), 0);
    }

    #[test]
    fn duplicate_inbound_publish_does_not_reset_received_state() {
        let mut tracker = InflightTracker::new();
        assert!(tracker.record_inbound(7, msg()));
        assert!(!tracker.record_inbound(7, msg()));
        assert!(tracker.complete_pubrel(7));
        assert!(!tracker.complete_pubrel(7));
    }
}
