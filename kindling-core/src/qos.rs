//! MQTT quality-of-service levels.

use bytes::Buf;

use crate::{
    codec::{Decoder, Encoder},
    error::WireError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum QoS {
    #[default]
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
    Invalid = 0xff,
}

impl QoS {
    /// The effective QoS a subscriber receives a message at: the lesser of
    /// the publisher's QoS and the subscriber's granted QoS.
    pub fn downgrade(published: QoS, subscribed: QoS) -> QoS {
        if (published as u8) <= (subscribed as u8) {
            published
        } else {
            subscribed
        }
    }
}

impl From<u8> for QoS {
    fn from(n: u8) -> Self {
        match n {
            0 => QoS::AtMostOnce,
            1 => QoS::AtLeastOnce,
            2 => QoS::ExactlyOnce,
            _ => QoS::Invalid,
        }
    }
}

impl Encoder for QoS {
    fn encode(&self, buffer: &mut bytes::BytesMut) {
        (*self as u8).encode(buffer);
    }

    fn encoded_size(&self) -> usize {
        1
    }
}

impl Decoder for QoS {
    fn decode<T: Buf>(buffer: &mut T) -> crate::Result<Self> {
        let qos = QoS::from(u8::decode(buffer)?);
        if qos == QoS::Invalid {
            return Err(WireError::MalformedPacket.into());
        }
        Ok(qos)
    }
}
