use bytes::{Buf, BytesMut};

use kindling_core::{
    codec::{Decoder, Encoder, VariableByteInteger},
    error::{Error, WireError},
    qos::QoS,
    topic::validate_subscribe_filter,
};

const PACKET_TYPE: u8 = 0x08;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribePayload {
    pub topic_filter: String,
    pub qos: QoS,
}

impl Encoder for SubscribePayload {
    fn encode(&self, buffer: &mut BytesMut) {
        self.topic_filter.encode(buffer);
        self.qos.encode(buffer);
    }

    fn encoded_size(&self) -> usize {
        self.topic_filter.encoded_size() + 1
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribePacket {
    pub packet_id: u16,
    pub payload: Vec<SubscribePayload>,
}

impl Encoder for SubscribePacket {
    fn encode(&self, buffer: &mut BytesMut) {
        buffer.put_u8((PACKET_TYPE << 4) | 0b0000_0010);

        let remaining_len = self.packet_id.encoded_size() + self.payload.encoded_size();
        VariableByteInteger(remaining_len as u32).encode(buffer);

        self.packet_id.encode(buffer);
        self.payload.encode(buffer);
    }
}

impl Decoder for SubscribePacket {
    fn decode<T: Buf>(buffer: &mut T) -> kindling_core::Result<Self> {
        let first_byte = u8::decode(buffer)?;
        if first_byte & 0b0000_1111 != 0b0000_0010 {
            return Err(WireError::MalformedPacket.into());
        }

        let remaining_len = VariableByteInteger::decode(buffer)?.0 as usize;
        let start_remaining = buffer.remaining();

        let packet_id = u16::decode(buffer)?;
        let mut payload = Vec::new();

        while start_remaining - buffer.remaining() < remaining_len {
            let topic_filter = String::decode(buffer)?;
            validate_subscribe_filter(&topic_filter).map_err(|_| WireError::MalformedPacket)?;
            let qos = QoS::decode(buffer)?;
            payload.push(SubscribePayload { topic_filter, qos });
        }

        if payload.is_empty() {
            return Err(WireError::ProtocolError.into());
        }

        Ok(SubscribePacket { packet_id, payload })
    }
}
