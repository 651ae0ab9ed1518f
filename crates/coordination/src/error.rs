use thiserror::Error;

/// Errors raised by the coordination store.
#[derive(Debug, Error)]
pub enum CoordinationError {
    /// The backing store cannot be reached.
    #[error("Coordination store unavailable")]
    Unavailable,

    /// A Redis command failed.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// A delay queue member could not be decoded.
    #[error("Invalid delay queue entry: {0}")]
    InvalidEntry(String),
}

/// Result type for coordination operations.
pub type Result<T> = std::result::Result<T, CoordinationError>;
