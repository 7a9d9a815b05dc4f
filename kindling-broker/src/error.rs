//! Broker-level error types.

use thiserror::Error;

/// Errors surfaced by the server accept loop and connection plumbing.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl From<kindling_core::error::Error> for ServerError {
    fn from(e: kindling_core::error::Error) -> Self {
        ServerError::Config(e.to_string())
    }
}
