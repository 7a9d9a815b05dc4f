use bytes::{Buf, BytesMut};

use kindling_core::{
    codec::{Decoder, Encoder, VariableByteInteger},
    error::WireError,
};

const PACKET_TYPE: u8 = 0x06;

/// PUBREL's fixed header reserves flag bits `0010`, unlike every other
/// control packet's all-zero reserved nibble.
const FIXED_FLAGS: u8 = 0b0000_0010;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PubRelPacket {
    pub packet_id: u16,
}

impl Encoder for PubRelPacket {
    fn encode(&self, buffer: &mut BytesMut) {
        buffer.put_u8((PACKET_TYPE << 4) | FIXED_FLAGS);
        VariableByteInteger(2).encode(buffer);
        self.packet_id.encode(buffer);
    }
}

impl Decoder for PubRelPacket {
    fn decode<T: Buf>(buffer: &mut T) -> kindling_core::Result<Self> {
        let first_byte = u8::decode(buffer)?;
        if first_byte & 0b0000_1111 != FIXED_FLAGS {
            return Err(WireError::MalformedPacket.into());
        }

        let _ = VariableByteInteger::decode(buffer)?;
        let packet_id = u16::decode(buffer)?;
        Ok(PubRelPacket { packet_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn round_trips() {
        let packet = PubRelPacket { packet_id: 3 };
        let mut encoded = BytesMut::new();
        packet.encode(&mut encoded);
        assert_eq!(encoded.to_vec(), vec![0x62, 0x02, 0x00, 0x03]);

        let mut bytes = Bytes::from(encoded.to_vec());
        assert_eq!(PubRelPacket::decode(&mut bytes).unwrap(), packet);
    }

    #[test]
    fn rejects_wrong_reserved_flags() {
        let mut bytes = Bytes::from(vec![0x60, 0x02, 0x00, 0x03]);
        assert!(PubRelPacket::decode(&mut bytes).is_err());
    }
}
