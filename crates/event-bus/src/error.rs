use thiserror::Error;

/// Errors that can occur when publishing or subscribing to events.
#[derive(Debug, Error)]
pub enum EventBusError {
    /// The bus is not accepting events.
    #[error("Event bus unavailable")]
    Unavailable,

    /// The subscription's source has gone away.
    #[error("Event bus closed")]
    Closed,

    /// An event could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Result type for event bus operations.
pub type Result<T> = std::result::Result<T, EventBusError>;
