//! Error types for PubSync

use thiserror::Error;

/// Main error type for PubSync operations
#[derive(Error, Debug)]
pub enum PubSyncError {
    /// Subscription name pattern failed to compile
    #[error("Invalid name pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    /// Error during serialization/deserialization
    #[error("Serialization error: {0}")]
    Serialization(#[from] postcard::Error),

    /// Protocol-level error (unexpected message shape or correlation)
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Subscription bookkeeping error
    #[error("Subscription error: {0}")]
    Subscription(String),

    /// Outbound notification could not be handed to the transport
    #[error("Transport error: {0}")]
    Transport(String),

    /// Operation attempted on a repository that has shut down
    #[error("Repository is shut down")]
    Shutdown,

    /// Invalid operation for current state
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

/// Result type alias using PubSyncError
pub type PubSyncResult<T> = Result<T, PubSyncError>;
