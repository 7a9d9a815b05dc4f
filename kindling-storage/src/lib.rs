//! Retained-message storage for the Kindling MQTT broker.
//!
//! Session, will and inflight state live in-process on the broker's
//! protocol-worker task (see `kindling-broker`) rather than behind a
//! pluggable store: only the retained-message set is abstracted here, since
//! it is the one piece of broker state a deployment might reasonably want
//! to back with something other than memory.

pub mod memory;

use async_trait::async_trait;
use kindling_core::message::Message;
use thiserror::Error;

/// Error type for storage operations.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("storage operation failed: {0}")]
    OperationFailed(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Trait for retained message storage.
///
/// Retained messages are stored one-per-topic and delivered verbatim to
/// new subscribers whose filter matches, at the retained message's own
/// QoS (not downgraded to the subscriber's granted QoS).
#[async_trait]
pub trait RetainedMessageStore: Send + Sync {
    /// Store a retained message for a topic. Pass `None` to clear it.
    async fn store_retained(&self, topic: &str, message: Option<Message>) -> Result<()>;

    /// Get retained messages matching a topic filter (supports wildcards).
    async fn get_retained(&self, topic_filter: &str) -> Result<Vec<Message>>;

    /// Clear all retained messages.
    async fn clear_all_retained(&self) -> Result<()>;
}
