//! Collaborator traits at the boundary of the routing layer.
//!
//! The server depends only on these; `courier-store` provides SQLite-backed
//! implementations and tests substitute in-memory ones.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::StoreError;
use crate::ids::{InstanceId, MessageId, UserId};

/// A registered user.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Stable id (UUID v7).
    pub id: String,
    /// Unique username; doubles as the connection identity.
    pub username: UserId,
}

/// Durable user → owning instance mapping.
#[async_trait]
pub trait Directory: Send + Sync {
    /// Record that `user` is now attached to `instance`.
    async fn set_owner(&self, user: &UserId, instance: &InstanceId) -> Result<(), StoreError>;

    /// Keep the entry for `user` pointing at `instance` alive, recreating it
    /// if it is gone. Never overwrites an entry held by another instance.
    ///
    /// Returns `false` when another instance owns `user`.
    async fn refresh_owner(&self, user: &UserId, instance: &InstanceId) -> Result<bool, StoreError>;

    /// Instance currently holding `user`, if any (expired entries count as absent).
    async fn get_owner(&self, user: &UserId) -> Result<Option<InstanceId>, StoreError>;

    /// Remove the entry for `user` only if it still points at `instance`.
    ///
    /// Returns whether an entry was removed.
    async fn clear_owner(&self, user: &UserId, instance: &InstanceId) -> Result<bool, StoreError>;
}

/// Group → members lookup.
#[async_trait]
pub trait GroupMembership: Send + Sync {
    /// Members of `group` in join order. Unknown groups have no members.
    async fn members_of(&self, group: &str) -> Result<Vec<UserId>, StoreError>;
}

/// Durable message history.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a direct message.
    async fn save_private_message(
        &self,
        id: &MessageId,
        body: &str,
        sender: &UserId,
        receiver: &UserId,
    ) -> Result<(), StoreError>;

    /// Persist a group message.
    async fn save_group_message(
        &self,
        id: &MessageId,
        body: &str,
        sender: &UserId,
        group: &str,
    ) -> Result<(), StoreError>;
}

/// Lookup of registered users by username.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Find a user by username.
    async fn find_user(&self, username: &str) -> Result<Option<User>, StoreError>;
}
