use bytes::{Buf, BytesMut};

use kindling_core::codec::{Decoder, Encoder, VariableByteInteger};

const PACKET_TYPE: u8 = 0x0d;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PingRespPacket {}

impl Encoder for PingRespPacket {
    fn encode(&self, buffer: &mut BytesMut) {
        buffer.put_u8(PACKET_TYPE << 4);
        VariableByteInteger(0).encode(buffer);
    }
}

impl Decoder for PingRespPacket {
    fn decode<T: Buf>(buffer: &mut T) -> kindling_core::Result<Self> {
        buffer.advance(1);
        let _ = VariableByteInteger::decode(buffer)?;
        Ok(PingRespPacket {})
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn round_trips() {
        let mut encoded = BytesMut::new();
        PingRespPacket {}.encode(&mut encoded);
        assert_eq!(encoded.to_vec(), vec![0xd0, 0x00]);

        let mut bytes = Bytes::from(encoded.to_vec());
        assert_eq!(PingRespPacket::decode(&mut bytes).unwrap(), PingRespPacket {});
    }
}
