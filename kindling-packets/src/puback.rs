use bytes::{Buf, BytesMut};

use kindling_core::codec::{Decoder, Encoder, VariableByteInteger};

const PACKET_TYPE: u8 = 0x04;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PubAckPacket {
    pub packet_id: u16,
}

impl Encoder for PubAckPacket {
    fn encode(&self, buffer: &mut BytesMut) {
        buffer.put_u8(PACKET_TYPE << 4);
        VariableByteInteger(2).encode(buffer);
        self.packet_id.encode(buffer);
    }
}

impl Decoder for PubAckPacket {
    fn decode<T: Buf>(buffer: &mut T) -> kindling_core::Result<Self> {
        buffer.advance(1);
        let _ = VariableByteInteger::decode(buffer)?;
        let packet_id = u16::decode(buffer)?;
        Ok(PubAckPacket { packet_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn round_trips() {
        let packet = PubAckPacket { packet_id: 7 };
        let mut encoded = BytesMut::new();
        packet.encode(&mut encoded);
        assert_eq!(encoded.to_vec(), vec![0x40, 0x02, 0x00, 0x07]);

        let mut bytes = Bytes::from(encoded.to_vec());
        assert_eq!(PubAckPacket::decode(&mut bytes).unwrap(), packet);
    }
}
