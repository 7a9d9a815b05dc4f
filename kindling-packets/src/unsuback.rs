use bytes::{Buf, BytesMut};

use kindling_core::codec::{Decoder, Encoder, VariableByteInteger};

const PACKET_TYPE: u8 = 0x0b;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnsubAckPacket {
    pub packet_id: u16,
}

impl Encoder for UnsubAckPacket {
    fn encode(&self, buffer: &mut BytesMut) {
        buffer.put_u8(PACKET_TYPE << 4);
        VariableByteInteger(2).encode(buffer);
        self.packet_id.encode(buffer);
    }
}

impl Decoder for UnsubAckPacket {
    fn decode<T: Buf>(buffer: &mut T) -> kindling_core::Result<Self> {
        buffer.advance(1);
        let _ = VariableByteInteger::decode(buffer)?;
        let packet_id = u16::decode(buffer)?;
        Ok(UnsubAckPacket { packet_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn round_trips() {
        let packet = UnsubAckPacket { packet_id: 4 };
        let mut encoded = BytesMut::new();
        packet.encode(&mut encoded);
        assert_eq!(encoded.to_vec(), vec![0xb0, 0x02, 0x00, 0x04]);

        let mut bytes = Bytes::from(encoded.to_vec());
        assert_eq!(UnsubAckPacket::decode(&mut bytes).unwrap(), packet);
    }
}
