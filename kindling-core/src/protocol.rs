//! MQTT protocol version handling.

use std::fmt;

/// MQTT protocol version accepted by this broker.
///
/// MQTT 5.0 is out of scope: its CONNECT carries a properties section this
/// broker never parses, so a level-5 CONNECT is rejected at the door with
/// `UnsupportedProtocolVersion` rather than represented here.
#[repr(u8)]
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub enum ProtocolVersion {
    /// MQTT 3.1 - protocol name "MQIsdp", level 3.
    V3_1 = 3,
    /// MQTT 3.1.1 - protocol name "MQTT", level 4.
    #[default]
    V3_1_1 = 4,
}

impl ProtocolVersion {
    pub fn protocol_name(&self) -> &'static str {
        match self {
            ProtocolVersion::V3_1 => "MQIsdp",
            ProtocolVersion::V3_1_1 => "MQTT",
        }
    }

    pub fn protocol_level(&self) -> u8 {
        *self as u8
    }

    /// Determines the protocol version from the CONNECT variable header's
    /// name and level fields. `None` means the combination is unsupported
    /// and the caller should respond `UnsupportedProtocolVersion`.
    pub fn from_name_and_level(name: &str, level: u8) -> Option<ProtocolVersion> {
        match (name, level) {
            ("MQIsdp", 3) => Some(ProtocolVersion::V3_1),
            ("MQTT", 4) => Some(ProtocolVersion::V3_1_1),
            _ => None,
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolVersion::V3_1 => write!(f, "MQTT 3.1"),
            ProtocolVersion::V3_1_1 => write!(f, "MQTT 3.1.1"),
        }
    }
}
