use bytes::{Buf, Bytes, BytesMut};

use kindling_core::{
    codec::{Decoder, Encoder, VariableByteInteger},
    error::{Error, WireError},
    qos::QoS,
    topic::validate_publish_topic,
};

const PACKET_TYPE: u8 = 0x03;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishPacket {
    pub dup: bool,
    pub qos: QoS,
    pub retain: bool,
    pub topic_name: String,
    /// Present for QoS 1 and 2, absent for QoS 0.
    pub packet_id: Option<u16>,
    pub payload: Bytes,
}

impl Encoder for PublishPacket {
    fn encode(&self, buffer: &mut BytesMut) {
        let mut first_byte = PACKET_TYPE << 4;
        if self.dup {
            first_byte |= 0b0000_1000;
        }
        first_byte |= (self.qos as u8) << 1;
        if self.retain {
            first_byte |= 0b0000_0001;
        }
        buffer.put_u8(first_byte);

        let mut remaining_len = self.topic_name.encoded_size();
        if self.packet_id.is_some() {
            remaining_len += 2;
        }
        remaining_len += self.payload.len();
        VariableByteInteger(remaining_len as u32).encode(buffer);

        self.topic_name.encode(buffer);
        if let Some(packet_id) = self.packet_id {
            packet_id.encode(buffer);
        }
        buffer.extend_from_slice(&self.payload);
    }
}

impl Decoder for PublishPacket {
    fn decode<T: Buf>(buffer: &mut T) -> kindling_core::Result<Self> {
        let first_byte = u8::decode(buffer)?;
        let dup = first_byte & 0b0000_1000 != 0;
        let qos = QoS::from((first_byte >> 1) & 0b0000_0011);
        let retain = first_byte & 0b0000_0001 != 0;

        if qos == QoS::Invalid {
            return Err(WireError::MalformedPacket.into());
        }

        let remaining_len = VariableByteInteger::decode(buffer)?.0 as usize;
        let start_remaining = buffer.remaining();

        let topic_name = String::decode(buffer)?;
        validate_publish_topic(&topic_name).map_err(|_| WireError::MalformedPacket)?;

        let packet_id = if qos != QoS::AtMostOnce {
            Some(u16::decode(buffer)?)
        } else {
            None
        };

        let consumed = start_remaining - buffer.remaining();
        let payload_len = remaining_len
            .checked_sub(consumed)
            .ok_or(WireError::MalformedPacket)?;

        if buffer.remaining() < payload_len {
            return Err(Error::PacketIncomplete);
        }

        let payload = buffer.copy_to_bytes(payload_len);

        Ok(PublishPacket {
            dup,
            qos,
            retain,
            topic_name,
            packet_id,
            payload,
        })
    }
}
