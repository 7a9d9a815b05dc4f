use bytes::{Buf, BytesMut};

use kindling_core::{
    codec::{Decoder, Encoder, VariableByteInteger},
    error::WireError,
    topic::validate_subscribe_filter,
};

const PACKET_TYPE: u8 = 0x0a;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsubscribePacket {
    pub packet_id: u16,
    pub topic_filters: Vec<String>,
}

impl Encoder for UnsubscribePacket {
    fn encode(&self, buffer: &mut BytesMut) {
        buffer.put_u8((PACKET_TYPE << 4) | 0b0000_0010);

        let remaining_len = self.packet_id.encoded_size() + self.topic_filters.encoded_size();
        VariableByteInteger(remaining_len as u32).encode(buffer);

        self.packet_id.encode(buffer);
        self.topic_filters.encode(buffer);
    }
}

impl Decoder for UnsubscribePacket {
    fn decode<T: Buf>(buffer: &mut T) -> kindling_core::Result<Self> {
        let first_byte = u8::decode(buffer)?;
        if first_byte & 0b0000_1111 != 0b0000_0010 {
            return Err(WireError::MalformedPacket.into());
        }

        let remaining_len = VariableByteInteger::decode(buffer)?.0 as usize;
        let start_remaining = buffer.remaining();

        let packet_id = u16::decode(buffer)?;
        let mut topic_filters = Vec::new();

        while start_remaining - buffer.remaining() < remaining_len {
            let filter = String::decode(buffer)?;
            validate_subscribe_filter(&filter).map_err(|_| WireError::MalformedPacket)?;
            topic_filters.push(filter);
        }

        if topic_filters.is_empty() {
            return Err(WireError::ProtocolError.into());
        }

        Ok(UnsubscribePacket {
            packet_id,
            topic_filters,
        })
    }
}
