//! Error types for the SQLite store.
//!
//! [`DatabaseError`] is returned by the pool, migrations and repositories.
//! At the trait boundary it converts into [`courier_core::StoreError`].

use courier_core::StoreError;
use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// `SQLite` database error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Connection pool error.
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// Filesystem error while preparing the database path.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Schema migration failed.
    #[error("migration error: {message}")]
    Migration {
        /// Describes which migration failed and why.
        message: String,
    },

    /// A unique name is already taken.
    #[error("{0} already exists")]
    AlreadyExists(String),

    /// A referenced record does not exist.
    #[error("{0} not found")]
    NotFound(String),
}

/// Convenience type alias for store results.
pub type Result<T> = std::result::Result<T, DatabaseError>;

impl DatabaseError {
    /// Convert into the collaborator error, tagging backend failures with
    /// the operation that produced them.
    pub fn into_store_error(self, operation: &'static str) -> StoreError {
        match self {
            Self::AlreadyExists(what) => StoreError::Conflict(what),
            Self::NotFound(what) => StoreError::NotFound(what),
            other => StoreError::backend(operation, other),
        }
    }
}

/// Whether `err` is a UNIQUE / PRIMARY KEY constraint violation.
pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
    )
}
