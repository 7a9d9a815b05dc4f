use bytes::{Buf, BytesMut};

use kindling_core::codec::{Decoder, Encoder, VariableByteInteger};

const PACKET_TYPE: u8 = 0x0e;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DisconnectPacket {}

impl Encoder for DisconnectPacket {
    fn encode(&self, buffer: &mut BytesMut) {
        buffer.put_u8(PACKET_TYPE << 4);
        VariableByteInteger(0).encode(buffer);
    }
}

impl Decoder for DisconnectPacket {
    fn decode<T: Buf>(buffer: &mut T) -> kindling_core::Result<Self> {
        buffer.advance(1);
        let _ = VariableByteInteger::decode(buffer)?;
        Ok(DisconnectPacket {})
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn round_trips() {
        let mut encoded = BytesMut::new();
        DisconnectPacket {}.encode(&mut encoded);
        assert_eq!(encoded.to_vec(), vec![0xe0, 0x00]);

        let mut bytes = Bytes::from(encoded.to_vec());
        assert_eq!(DisconnectPacket::decode(&mut bytes).unwrap(), DisconnectPacket {});
    }
}
