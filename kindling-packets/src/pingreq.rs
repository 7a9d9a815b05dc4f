use bytes::{Buf, BytesMut};

use kindling_core::codec::{Decoder, Encoder, VariableByteInteger};

const PACKET_TYPE: u8 = 0x0c;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PingReqPacket {}

impl Encoder for PingReqPacket {
    fn encode(&self, buffer: &mut BytesMut) {
        buffer.put_u8(PACKET_TYPE << 4);
        VariableByteInteger(0).encode(buffer);
    }
}

impl Decoder for PingReqPacket {
    fn decode<T: Buf>(buffer: &mut T) -> kindling_core::Result<Self> {
        buffer.advance(1);
        let _ = VariableByteInteger::decode(buffer)?;
        Ok(PingReqPacket {})
    }
}
