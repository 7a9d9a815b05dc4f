//! Core types and traits shared by the Kindling MQTT v3.1.1 broker.

pub mod codec;
pub mod error;
pub mod message;
pub mod protocol;
pub mod qos;
pub mod topic;

/// A specialized `Result` type for kindling operations.
pub type Result<T> = std::result::Result<T, crate::error::Error>;
