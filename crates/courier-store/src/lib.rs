//! # courier-store
//!
//! SQLite implementations of the Courier collaborator traits:
//! [`Directory`](courier_core::Directory),
//! [`GroupMembership`](courier_core::GroupMembership),
//! [`MessageStore`](courier_core::MessageStore) and
//! [`IdentityStore`](courier_core::IdentityStore).
//!
//! - **[`connection`]**: `r2d2` pool with WAL and foreign keys on every connection
//! - **[`migrations`]**: version-tracked schema, applied transactionally
//! - **[`repositories`]**: stateless SQL helpers taking `&Connection`
//! - **[`store`]**: [`SqliteStore`], the async facade over the pool

#![deny(unsafe_code)]

pub mod connection;
pub mod errors;
pub mod migrations;
pub mod repositories;
pub mod store;

pub use connection::{ConnectionConfig, ConnectionPool};
pub use errors::{DatabaseError, Result};
pub use repositories::{Room, StoredMessage};
pub use store::SqliteStore;
