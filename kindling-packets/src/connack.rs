use bytes::{Buf, BytesMut};

use kindling_core::{
    codec::{Decoder, Encoder, VariableByteInteger},
    error::Error,
};

/// CONNACK return codes, MQTT 3.1.1 §3.2.2.3. There is no mechanism to
/// extend this list on the wire: unlike MQTT 5's reason codes, these five
/// values are the entire vocabulary a v3.1.1 broker can speak back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectReturnCode {
    Accepted = 0x00,
    UnacceptableProtocolVersion = 0x01,
    IdentifierRejected = 0x02,
    ServerUnavailable = 0x03,
    BadUsernameOrPassword = 0x04,
    NotAuthorized = 0x05,
}

impl Encoder for ConnectReturnCode {
    fn encode(&self, buffer: &mut BytesMut) {
        (*self as u8).encode(buffer);
    }

    fn encoded_size(&self) -> usize {
        1
    }
}

impl Decoder for ConnectReturnCode {
    fn decode<T: Buf>(buffer: &mut T) -> kindling_core::Result<Self> {
        let code = match u8::decode(buffer)? {
            0x00 => ConnectReturnCode::Accepted,
            0x01 => ConnectReturnCode::UnacceptableProtocolVersion,
            0x02 => ConnectReturnCode::IdentifierRejected,
            0x03 => ConnectReturnCode::ServerUnavailable,
            0x04 => ConnectReturnCode::BadUsernameOrPassword,
            0x05 => ConnectReturnCode::NotAuthorized,
            _ => return Err(kindling_core::error::WireError::MalformedPacket.into()),
        };
        Ok(code)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConnAckFlags {
    pub session_present: bool,
}

impl Encoder for ConnAckFlags {
    fn encode(&self, buffer: &mut BytesMut) {
        (self.session_present as u8).encode(buffer);
    }

    fn encoded_size(&self) -> usize {
        1
    }
}

impl Decoder for ConnAckFlags {
    fn decode<T: Buf>(buffer: &mut T) -> kindling_core::Result<Self> {
        let byte = u8::decode(buffer)?;
        if byte & 0b1111_1110 != 0 {
            return Err(kindling_core::error::WireError::MalformedPacket.into());
        }
        Ok(ConnAckFlags {
            session_present: byte & 0b0000_0001 != 0,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnAckPacket {
    pub flags: ConnAckFlags,
    pub return_code: ConnectReturnCode,
}

const PACKET_TYPE: u8 = 0x02;

impl Encoder for ConnAckPacket {
    fn encode(&self, buffer: &mut BytesMut) {
        buffer.put_u8(PACKET_TYPE << 4);
        VariableByteInteger(2).encode(buffer);
        self.flags.encode(buffer);
        self.return_code.encode(buffer);
    }
}

impl Decoder for ConnAckPacket {
    fn decode<T: Buf>(buffer: &mut T) -> kindling_core::Result<Self> {
        buffer.advance(1);
        let _ = VariableByteInteger::decode(buffer)?;

        let flags = ConnAckFlags::decode(buffer)?;
        let return_code = ConnectReturnCode::decode(buffer)?;

        Ok(ConnAckPacket { flags, return_code })
    }
}

impl ConnAckPacket {
    pub fn accepted(session_present: bool) -> Self {
        ConnAckPacket {
            flags: ConnAckFlags { session_present },
            return_code: ConnectReturnCode::Accepted,
        }
    }

    pub fn refused(return_code: ConnectReturnCode) -> Self {
        ConnAckPacket {
            flags: ConnAckFlags::default(),
            return_code,
        }
    }
}
