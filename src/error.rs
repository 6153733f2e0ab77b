//! Crate-wide error taxonomy

use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum AppError {
    /// Bad caller input, e.g. an empty conversation id. A programming error,
    /// not something to surface to the user.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The remote call failed or returned a non-success status.
    #[error("Network error: {message}")]
    Network {
        message: String,
        /// HTTP status, when the failure happened at the protocol level.
        status: Option<u16>,
        /// Structured error payload from the server, if it sent one.
        details: Option<Value>,
    },

    /// Persistence failure (save, load or clear).
    #[error("Storage error: {0}")]
    Storage(String),

    /// The sync channel is not currently connected. Broadcast callers must
    /// treat this as non-fatal; a reconnect has already been scheduled.
    #[error("Sync channel disconnected")]
    SyncDisconnected,

    /// A send is already in flight for this conversation.
    #[error("A send is already in flight for conversation {0}")]
    SendInFlight(Uuid),

    /// Fallback wrapper for anything unrecognized.
    #[error("{0}")]
    Other(String),
}

impl AppError {
    /// Network error without protocol-level context (timeout, connect failure).
    pub fn network(message: impl Into<String>) -> Self {
        AppError::Network {
            message: message.into(),
            status: None,
            details: None,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        AppError::Validation(message.into())
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Storage(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::Network {
            message: err.to_string(),
            status: err.status().map(|s| s.as_u16()),
            details: None,
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Other(format!("Serialization failed: {}", err))
    }
}
