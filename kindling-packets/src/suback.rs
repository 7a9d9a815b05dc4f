use bytes::{Buf, BytesMut};

use kindling_core::{
    codec::{Decoder, Encoder, VariableByteInteger},
    qos::QoS,
};

const PACKET_TYPE: u8 = 0x09;

/// A per-filter SUBACK result: either a granted QoS or outright failure.
/// MQTT 3.1.1 encodes failure as the single byte `0x80`; there is no reason
/// text accompanying it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeResult {
    Granted(QoS),
    Failure,
}

impl Encoder for SubscribeResult {
    fn encode(&self, buffer: &mut BytesMut) {
        match self {
            SubscribeResult::Granted(qos) => qos.encode(buffer),
            SubscribeResult::Failure => buffer.put_u8(0x80),
        }
    }

    fn encoded_size(&self) -> usize {
        1
    }
}

impl Decoder for SubscribeResult {
    fn decode<T: Buf>(buffer: &mut T) -> kindling_core::Result<Self> {
        let byte = u8::decode(buffer)?;
        Ok(match byte {
            0x80 => SubscribeResult::Failure,
            _ => SubscribeResult::Granted(QoS::from(byte)),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubAckPacket {
    pub packet_id: u16,
    pub results: Vec<SubscribeResult>,
}

impl Encoder for SubAckPacket {
    fn encode(&self, buffer: &mut BytesMut) {
        buffer.put_u8(PACKET_TYPE << 4);

        let remaining_len = self.packet_id.encoded_size() + self.results.encoded_size();
        VariableByteInteger(remaining_len as u32).encode(buffer);

        self.packet_id.encode(buffer);
        self.results.encode(buffer);
    }
}

impl Decoder for SubAckPacket {
    fn decode<T: Buf>(buffer: &mut T) -> kindling_core::Result<Self> {
        buffer.advance(1);
        let remaining_len = VariableByteInteger::decode(buffer)?.0 as usize;
        let start_remaining = buffer.remaining();

        let packet_id = u16::decode(buffer)?;
        let mut results = Vec::new();

        while start_remaining - buffer.remaining() < remaining_len {
            results.push(SubscribeResult::decode(buffer)?);
        }

        Ok(SubAckPacket { packet_id, results })
    }
}
