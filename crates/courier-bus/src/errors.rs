//! Bus error types.

use thiserror::Error;

/// Errors from publishing to or subscribing on the bus.
#[derive(Debug, Error)]
pub enum BusError {
    /// The underlying transport failed.
    #[error("bus transport error: {0}")]
    Transport(String),

    /// Redis returned an error.
    #[cfg(feature = "redis")]
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

/// Convenience type alias for bus results.
pub type Result<T> = std::result::Result<T, BusError>;
