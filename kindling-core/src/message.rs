//! Internal message representation used for retained storage and the
//! per-client offline queue.

use std::sync::Arc;

use bytes::Bytes;

use crate::qos::QoS;

/// An MQTT message decoupled from any particular subscriber's packet
/// identifier. Cheap to clone: `topic` is `Arc<str>` and `payload` is
/// `Bytes`, both reference-counted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub topic: Arc<str>,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
}

impl Message {
    pub fn new(topic: impl Into<Arc<str>>, payload: Bytes, qos: QoS, retain: bool) -> Self {
        Self {
            topic: topic.into(),
            payload,
            qos,
            retain,
        }
    }
}
