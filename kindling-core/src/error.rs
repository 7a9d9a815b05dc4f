//! Error types for the Kindling MQTT implementation.

use std::fmt;

/// Why a packet failed to parse or violated the protocol.
///
/// These never go on the wire verbatim (MQTT 3.1.1 packets other than
/// CONNACK/SUBACK carry no reason byte); they exist to let the caller pick
/// the right close/reply behaviour per the error kinds a handler can hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireError {
    MalformedPacket,
    ProtocolError,
    UnsupportedProtocolVersion,
    IdentifierRejected,
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            WireError::MalformedPacket => "malformed packet",
            WireError::ProtocolError => "protocol error",
            WireError::UnsupportedProtocolVersion => "unsupported protocol version",
            WireError::IdentifierRejected => "client identifier rejected",
        };
        write!(f, "{}", msg)
    }
}

impl std::error::Error for WireError {}

/// Error type for kindling operations.
#[derive(Debug)]
pub enum Error {
    /// The packet is incomplete and needs more data.
    PacketIncomplete,

    /// I/O error.
    Io(std::io::Error),

    /// MQTT protocol error encountered while decoding or validating a packet.
    Wire(WireError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::PacketIncomplete => write!(f, "packet is not complete"),
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Wire(e) => write!(f, "MQTT error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Wire(e) => Some(e),
            Error::PacketIncomplete => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<WireError> for Error {
    fn from(e: WireError) -> Self {
        Error::Wire(e)
    }
}
