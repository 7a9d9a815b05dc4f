use std::mem;

use bytes::{Buf, Bytes, BytesMut};

use kindling_core::{
    codec::{Decoder, Encoder, VariableByteInteger},
    error::{Error, WireError},
    protocol::ProtocolVersion,
    qos::QoS,
};

#[derive(Default, Debug, PartialEq, Eq, Clone, Copy)]
pub struct ConnectFlags {
    pub user_name: bool,
    pub password: bool,
    pub will_retain: bool,
    pub will_qos: QoS,
    pub will_flag: bool,
    pub clean_session: bool,
}

impl Encoder for ConnectFlags {
    fn encode(&self, buffer: &mut BytesMut) {
        let mut flags: u8 = 0;

        if self.user_name {
            flags |= 0b1000_0000;
        }
        if self.password {
            flags |= 0b0100_0000;
        }
        if self.will_retain {
            flags |= 0b0010_0000;
        }
        if self.will_flag {
            flags |= 0b0000_0100;
            flags |= (self.will_qos as u8) << 3;
        }
        if self.clean_session {
            flags |= 0b0000_0010;
        }

        buffer.put_u8(flags);
    }

    fn encoded_size(&self) -> usize {
        mem::size_of::<u8>()
    }
}

impl Decoder for ConnectFlags {
    fn decode<T: Buf>(buffer: &mut T) -> kindling_core::Result<Self> {
        if !buffer.has_remaining() {
            return Err(Error::PacketIncomplete);
        }

        let byte = buffer.get_u8();
        if (byte & 0b0000_0001) != 0 {
            return Err(WireError::MalformedPacket.into());
        }

        let mut flags = ConnectFlags {
            user_name: (byte & 0b1000_0000) != 0,
            password: (byte & 0b0100_0000) != 0,
            will_retain: (byte & 0b0010_0000) != 0,
            clean_session: (byte & 0b0000_0010) != 0,
            ..Default::default()
        };

        if (byte & 0b0000_0100) != 0 {
            flags.will_flag = true;
            flags.will_qos = ((byte >> 3) & 0b0000_0011).into();
        }

        if flags.will_qos == QoS::Invalid {
            return Err(WireError::MalformedPacket.into());
        }

        Ok(flags)
    }
}

#[derive(Default, Debug, Eq, PartialEq)]
pub struct ConnectPayload {
    pub client_id: String,
    pub will_topic: Option<String>,
    pub will_payload: Option<Bytes>,
    pub user_name: Option<String>,
    pub password: Option<Bytes>,
}

impl ConnectPayload {
    fn encode(&self, buffer: &mut BytesMut, flags: &ConnectFlags) {
        self.client_id.encode(buffer);

        if flags.will_flag {
            self.will_topic.encode(buffer);
            self.will_payload.encode(buffer);
        }
        if flags.user_name {
            self.user_name.encode(buffer);
        }
        if flags.password {
            self.password.encode(buffer);
        }
    }

    fn encoded_size(&self, flags: &ConnectFlags) -> usize {
        let mut len = self.client_id.encoded_size();

        if flags.will_flag {
            len += self.will_topic.encoded_size();
            len += self.will_payload.encoded_size();
        }
        if flags.user_name {
            len += self.user_name.encoded_size();
        }
        if flags.password {
            len += self.password.encoded_size();
        }

        len
    }
}

#[derive(Eq, PartialEq, Debug)]
pub struct ConnectPacket {
    pub protocol_version: ProtocolVersion,
    pub flags: ConnectFlags,
    pub keep_alive: u16,
    pub payload: ConnectPayload,
}

const PACKET_TYPE: u8 = 0x01;

impl Encoder for ConnectPacket {
    fn encode(&self, buffer: &mut BytesMut) {
        let protocol_name = self.protocol_version.protocol_name().to_string();
        let protocol_level = self.protocol_version.protocol_level();

        let mut remaining_len = 0;

        buffer.put_u8(PACKET_TYPE << 4);
        remaining_len += protocol_name.encoded_size();
        remaining_len += protocol_level.encoded_size();
        remaining_len += self.flags.encoded_size();
        remaining_len += self.keep_alive.encoded_size();
        remaining_len += self.payload.encoded_size(&self.flags);
        VariableByteInteger(remaining_len as u32).encode(buffer);

        protocol_name.encode(buffer);
        protocol_level.encode(buffer);
        self.flags.encode(buffer);
        self.keep_alive.encode(buffer);
        self.payload.encode(buffer, &self.flags);
    }
}

impl Decoder for ConnectPacket {
    fn decode<T: Buf>(buffer: &mut T) -> kindling_core::Result<Self> {
        buffer.advance(1); // packet type
        let _ = VariableByteInteger::decode(buffer)?; // remaining length

        let protocol_name = String::decode(buffer)?;
        let protocol_level = u8::decode(buffer)?;

        let protocol_version = ProtocolVersion::from_name_and_level(&protocol_name, protocol_level)
            .ok_or(WireError::UnsupportedProtocolVersion)?;

        let flags = ConnectFlags::decode(buffer)?;
        let keep_alive = u16::decode(buffer)?;

        let client_id = String::decode(buffer)?;
        let mut payload = ConnectPayload {
            client_id,
            ..Default::default()
        };

        if flags.will_flag {
            payload.will_topic = Some(String::decode(buffer)?);
            payload.will_payload = Some(Bytes::decode(buffer)?);
        }
        if flags.user_name {
            payload.user_name = Some(String::decode(buffer)?);
        }
        if flags.password {
            payload.password = Some(Bytes::decode(buffer)?);
        }

        Ok(ConnectPacket {
            protocol_version,
            flags,
            keep_alive,
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v3_1_1_bare_connect_round_trips() {
        let expected = vec![
            0x10, 0x0c, 0x00, 0x04, 0x4d, 0x51, 0x54, 0x54, 0x04, 0x02, 0x00, 0x3c, 0x00, 0x00,
        ];

        let packet = ConnectPacket {
            protocol_version: ProtocolVersion::V3_1_1,
            flags: ConnectFlags {
                clean_session: true,
                ..Default::default()
            },
            keep_alive: 60,
            payload: ConnectPayload::default(),
        };

        let mut encoded = BytesMut::new();
        packet.encode(&mut encoded);
        assert_eq!(encoded.to_vec(), expected);

        let mut bytes = Bytes::from(expected);
        let decoded = ConnectPacket::decode(&mut bytes).expect("decode failed");
        assert_eq!(packet, decoded);
    }

    #[test]
    fn connect_with_will_and_credentials_round_trips() {
        let flags = ConnectFlags {
            user_name: true,
            password: true,
            will_retain: true,
            will_qos: QoS::AtLeastOnce,
            will_flag: true,
            clean_session: false,
        };

        let payload = ConnectPayload {
            client_id: "device-1".to_string(),
            will_topic: Some("device-1/status".to_string()),
            will_payload: Some(Bytes::from("offline")),
            user_name: Some("alice".to_string()),
            password: Some(Bytes::from("secret")),
        };

        let packet = ConnectPacket {
            protocol_version: ProtocolVersion::V3_1_1,
            flags,
            keep_alive: 30,
            payload,
        };

        let mut encoded = BytesMut::new();
        packet.encode(&mut encoded);

        let mut bytes = encoded.freeze();
        let decoded = ConnectPacket::decode(&mut bytes).expect("decode failed");
        assert_eq!(packet, decoded);
    }

    #[test]
    fn rejects_unsupported_protocol_level() {
        let input = vec![
            0x10, 0x0c, 0x00, 0x04, 0x4d, 0x51, 0x54, 0x54, 0x05, 0x02, 0x00, 0x3c, 0x00, 0x00,
        ];
        let mut bytes = Bytes::from(input);
        match ConnectPacket::decode(&mut bytes) {
            Err(Error::Wire(WireError::UnsupportedProtocolVersion)) => {}
            other => panic!("expected UnsupportedProtocolVersion, got {other:?}"),
        }
    }

    #[test]
    fn rejects_reserved_flag_bit() {
        let input = vec![
            0x10, 0x0c, 0x00, 0x04, 0x4d, 0x51, 0x54, 0x54, 0x04, 0x03, 0x00, 0x3c, 0x00, 0x00,
        ];
        let mut bytes = Bytes::from(input);
        assert!(ConnectPacket::decode(&mut bytes).is_err());
    }
}
