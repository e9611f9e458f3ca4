//! Error types shared across the Courier crates.
//!
//! - [`ProtocolError`]: a client frame that is not valid JSON
//! - [`ValidationError`]: the list of failed field checks
//! - [`AuthenticationError`]: the claimed identity is unknown
//! - [`DeliveryError`]: a write to a local connection failed
//! - [`StoreError`]: a collaborator (directory, membership, persistence,
//!   identity) failed
//!
//! Bus and dispatch errors live with their components in `courier-bus` and
//! `courier-server`.

use thiserror::Error;

use crate::ids::UserId;
use crate::validation::FieldError;

/// A client frame could not be decoded.
#[derive(Debug, Error)]
#[error("malformed client frame: {0}")]
pub struct ProtocolError(#[from] pub serde_json::Error);

/// One or more fields failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{} field(s) failed validation", .0.len())]
pub struct ValidationError(pub Vec<FieldError>);

/// Authentication of a new connection failed.
#[derive(Debug, Error)]
pub enum AuthenticationError {
    /// No `id` query parameter on the upgrade request.
    #[error("missing identity")]
    MissingIdentity,
    /// The identity store does not know this user.
    #[error("unknown user {0}")]
    UnknownUser(UserId),
    /// The identity store could not be queried.
    #[error("identity lookup failed: {0}")]
    Lookup(#[from] StoreError),
}

impl AuthenticationError {
    /// Close reason sent to the client.
    pub const CLOSE_REASON: &'static str = "Authentication failed - invalid username";
}

/// A write to a local connection failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// The connection's writer has gone away.
    #[error("connection closed")]
    Closed,
    /// The write did not complete within the configured timeout.
    #[error("write timed out")]
    Timeout,
}

/// Failure of an external collaborator.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend returned an error.
    #[error("{operation} failed: {message}")]
    Backend {
        /// Operation that failed (e.g. `get_owner`).
        operation: &'static str,
        /// Backend error text.
        message: String,
    },
    /// A uniqueness constraint was violated.
    #[error("{0} already exists")]
    Conflict(String),
    /// A referenced record does not exist.
    #[error("{0} not found")]
    NotFound(String),
    /// The blocking task running the operation panicked or was cancelled.
    #[error("store task failed: {0}")]
    Task(String),
}

impl StoreError {
    /// Shorthand for [`StoreError::Backend`].
    pub fn backend(operation: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Backend {
            operation,
            message: err.to_string(),
        }
    }
}
