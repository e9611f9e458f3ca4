//! `SqliteStore`: one pool behind every collaborator trait.
//!
//! Trait methods run their SQL on the blocking pool via
//! [`tokio::task::spawn_blocking`], as do the account operations behind the
//! HTTP API. The synchronous methods serve startup code and tests.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use courier_core::{
    Directory, GroupMembership, IdentityStore, InstanceId, MessageId, MessageStore, StoreError,
    User, UserId,
};
use rusqlite::Connection;
use tracing::{debug, instrument};

use crate::connection::{self, ConnectionConfig, ConnectionPool, PooledConnection};
use crate::errors::Result;
use crate::migrations::run_migrations;
use crate::repositories::{DirectoryRepo, MessageRepo, Room, RoomRepo, StoredMessage, UserRepo};

/// SQLite-backed store.
#[derive(Clone)]
pub struct SqliteStore {
    pool: ConnectionPool,
    directory_ttl: Duration,
}

impl SqliteStore {
    /// Wrap an existing pool and run pending migrations.
    pub fn new(pool: ConnectionPool, directory_ttl: Duration) -> Result<Self> {
        let store = Self {
            pool,
            directory_ttl,
        };
        let applied = run_migrations(&*store.conn()?)?;
        debug!(applied, "store ready");
        Ok(store)
    }

    /// Open an in-memory store.
    pub fn in_memory(directory_ttl: Duration) -> Result<Self> {
        Self::new(
            connection::new_in_memory(&ConnectionConfig::default())?,
            directory_ttl,
        )
    }

    /// Open (or create) a file-backed store.
    pub fn open(path: &Path, config: &ConnectionConfig, directory_ttl: Duration) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Self::new(
            connection::new_file(&path.to_string_lossy(), config)?,
            directory_ttl,
        )
    }

    fn conn(&self) -> Result<PooledConnection> {
        Ok(self.pool.get()?)
    }

    fn now_ms() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    fn cutoff_ms(&self) -> i64 {
        let ttl = i64::try_from(self.directory_ttl.as_millis()).unwrap_or(i64::MAX);
        Self::now_ms().saturating_sub(ttl)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Synchronous API
    // ─────────────────────────────────────────────────────────────────────

    /// Register a new user.
    pub fn create_user(&self, username: &str) -> Result<User> {
        UserRepo::create(&*self.conn()?, username)
    }

    /// Look up a user by username.
    pub fn user_by_name(&self, username: &str) -> Result<Option<User>> {
        UserRepo::find_by_username(&*self.conn()?, username)
    }

    /// Create a room.
    pub fn create_room(&self, name: &str) -> Result<Room> {
        RoomRepo::create(&*self.conn()?, name)
    }

    /// Add a user to a room.
    pub fn join_room(&self, name: &str, username: &str) -> Result<bool> {
        RoomRepo::join(&*self.conn()?, name, username)
    }

    /// Members of a room in join order.
    pub fn room_members(&self, name: &str) -> Result<Vec<UserId>> {
        RoomRepo::members(&*self.conn()?, name)
    }

    /// Write a directory entry with an explicit timestamp.
    pub fn set_owner_at(&self, user: &str, instance: &str, at_ms: i64) -> Result<()> {
        DirectoryRepo::upsert(&*self.conn()?, user, instance, at_ms)
    }

    /// Drop every directory entry owned by `instance`.
    pub fn clear_instance(&self, instance: &InstanceId) -> Result<Vec<UserId>> {
        DirectoryRepo::clear_instance(&*self.conn()?, instance)
    }

    /// Direct messages between two users, oldest first.
    pub fn conversation(&self, a: &str, b: &str, limit: u32) -> Result<Vec<StoredMessage>> {
        MessageRepo::conversation(&*self.conn()?, a, b, limit)
    }

    /// Messages sent to a group, oldest first.
    pub fn group_history(&self, group: &str, limit: u32) -> Result<Vec<StoredMessage>> {
        MessageRepo::group_history(&*self.conn()?, group, limit)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Account API (async)
    // ─────────────────────────────────────────────────────────────────────

    /// Register a new user; [`StoreError::Conflict`] if the name is taken.
    pub async fn register(&self, username: &str) -> std::result::Result<User, StoreError> {
        let username = username.to_owned();
        self.blocking("register", move |conn| UserRepo::create(conn, &username))
            .await
    }

    /// Create a room; [`StoreError::Conflict`] if the name is taken.
    pub async fn open_room(&self, name: &str) -> std::result::Result<Room, StoreError> {
        let name = name.to_owned();
        self.blocking("open_room", move |conn| RoomRepo::create(conn, &name))
            .await
    }

    /// Add a user to a room; [`StoreError::NotFound`] for an unknown room or user.
    pub async fn add_member(&self, room: &str, username: &str) -> std::result::Result<bool, StoreError> {
        let (room, username) = (room.to_owned(), username.to_owned());
        self.blocking("add_member", move |conn| RoomRepo::join(conn, &room, &username))
            .await
    }

    // ─────────────────────────────────────────────────────────────────────
    // Blocking bridge
    // ─────────────────────────────────────────────────────────────────────

    async fn blocking<T, F>(&self, operation: &'static str, f: F) -> std::result::Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<T> {
            let conn = pool.get()?;
            f(&conn)
        })
        .await
        .map_err(|e| StoreError::Task(format!("{operation}: {e}")))?
        .map_err(|e| e.into_store_error(operation))
    }
}

#[async_trait]
impl Directory for SqliteStore {
    #[instrument(skip_all, fields(user = %user, instance = %instance))]
    async fn set_owner(&self, user: &UserId, instance: &InstanceId) -> std::result::Result<(), StoreError> {
        let (user, instance) = (user.clone(), instance.clone());
        let now = Self::now_ms();
        self.blocking("set_owner", move |conn| {
            DirectoryRepo::upsert(conn, &user, &instance, now)
        })
        .await
    }

    async fn refresh_owner(&self, user: &UserId, instance: &InstanceId) -> std::result::Result<bool, StoreError> {
        let (user, instance) = (user.clone(), instance.clone());
        let now = Self::now_ms();
        self.blocking("refresh_owner", move |conn| {
            DirectoryRepo::refresh(conn, &user, &instance, now)
        })
        .await
    }

    async fn get_owner(&self, user: &UserId) -> std::result::Result<Option<InstanceId>, StoreError> {
        let user = user.clone();
        let cutoff = self.cutoff_ms();
        self.blocking("get_owner", move |conn| DirectoryRepo::owner(conn, &user, cutoff))
            .await
    }

    #[instrument(skip_all, fields(user = %user, instance = %instance))]
    async fn clear_owner(&self, user: &UserId, instance: &InstanceId) -> std::result::Result<bool, StoreError> {
        let (user, instance) = (user.clone(), instance.clone());
        self.blocking("clear_owner", move |conn| {
            DirectoryRepo::clear_if_owner(conn, &user, &instance)
        })
        .await
    }
}

#[async_trait]
impl GroupMembership for SqliteStore {
    async fn members_of(&self, group: &str) -> std::result::Result<Vec<UserId>, StoreError> {
        let group = group.to_owned();
        self.blocking("members_of", move |conn| RoomRepo::members(conn, &group))
            .await
    }
}

#[async_trait]
impl MessageStore for SqliteStore {
    async fn save_private_message(
        &self,
        id: &MessageId,
        body: &str,
        sender: &UserId,
        receiver: &UserId,
    ) -> std::result::Result<(), StoreError> {
        let (id, body, sender, receiver) =
            (id.clone(), body.to_owned(), sender.clone(), receiver.clone());
        self.blocking("save_private_message", move |conn| {
            MessageRepo::insert_private(conn, &id, &body, &sender, &receiver)
        })
        .await
    }

    async fn save_group_message(
        &self,
        id: &MessageId,
        body: &str,
        sender: &UserId,
        group: &str,
    ) -> std::result::Result<(), StoreError> {
        let (id, body, sender, group) =
            (id.clone(), body.to_owned(), sender.clone(), group.to_owned());
        self.blocking("save_group_message", move |conn| {
            MessageRepo::insert_group(conn, &id, &body, &sender, &group)
        })
        .await
    }
}

#[async_trait]
impl IdentityStore for SqliteStore {
    async fn find_user(&self, username: &str) -> std::result::Result<Option<User>, StoreError> {
        let username = username.to_owned();
        self.blocking("find_user", move |conn| {
            UserRepo::find_by_username(conn, &username)
        })
        .await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn store() -> SqliteStore {
        SqliteStore::in_memory(Duration::from_secs(300)).unwrap()
    }

    #[tokio::test]
    async fn directory_roundtrip() {
        let store = store();
        let bob = UserId::from("bob");
        store.set_owner(&bob, &InstanceId::from("B")).await.unwrap();
        assert_eq!(store.get_owner(&bob).await.unwrap(), Some(InstanceId::from("B")));
        assert!(!store.clear_owner(&bob, &InstanceId::from("A")).await.unwrap());
        assert!(store.clear_owner(&bob, &InstanceId::from("B")).await.unwrap());
        assert_eq!(store.get_owner(&bob).await.unwrap(), None);
    }

    #[tokio::test]
    async fn refresh_owner_keeps_newer_owner() {
        let store = store();
        let alice = UserId::from("alice");
        store.set_owner(&alice, &InstanceId::from("A")).await.unwrap();
        assert!(store.refresh_owner(&alice, &InstanceId::from("A")).await.unwrap());

        store.set_owner(&alice, &InstanceId::from("B")).await.unwrap();
        assert!(!store.refresh_owner(&alice, &InstanceId::from("A")).await.unwrap());
        assert_eq!(store.get_owner(&alice).await.unwrap(), Some(InstanceId::from("B")));
    }

    #[tokio::test]
    async fn expired_entry_is_absent() {
        let store = store();
        let stale = SqliteStore::now_ms() - 301_000;
        store.set_owner_at("bob", "B", stale).unwrap();
        assert_eq!(store.get_owner(&UserId::from("bob")).await.unwrap(), None);

        store.set_owner_at("bob", "B", SqliteStore::now_ms()).unwrap();
        assert!(store.get_owner(&UserId::from("bob")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn identity_and_membership() {
        let store = store();
        let _ = store.create_user("alice").unwrap();
        let _ = store.create_user("bob").unwrap();
        let _ = store.create_room("team").unwrap();
        assert!(store.join_room("team", "bob").unwrap());
        assert!(store.join_room("team", "alice").unwrap());

        let found = store.find_user("alice").await.unwrap().unwrap();
        assert_eq!(found.username.as_str(), "alice");
        assert!(store.find_user("ghost").await.unwrap().is_none());

        let members = store.members_of("team").await.unwrap();
        assert_eq!(members, vec![UserId::from("bob"), UserId::from("alice")]);
    }

    #[tokio::test]
    async fn conflicts_surface_as_store_conflict() {
        let store = store();
        let _ = store.create_user("alice").unwrap();
        assert_matches!(store.register("alice").await, Err(StoreError::Conflict(_)));
        let _ = store.open_room("team").await.unwrap();
        assert_matches!(store.open_room("team").await, Err(StoreError::Conflict(_)));
        assert_matches!(store.add_member("team", "ghost").await, Err(StoreError::NotFound(_)));
        assert!(store.add_member("team", "alice").await.unwrap());
    }

    #[tokio::test]
    async fn messages_are_persisted() {
        let store = store();
        store
            .save_private_message(
                &MessageId::from("01"),
                "hi",
                &UserId::from("alice"),
                &UserId::from("bob"),
            )
            .await
            .unwrap();
        store
            .save_group_message(&MessageId::from("02"), "yo", &UserId::from("alice"), "team")
            .await
            .unwrap();
        assert_eq!(store.conversation("alice", "bob", 10).unwrap().len(), 1);
        assert_eq!(store.group_history("team", 10).unwrap()[0].body, "yo");
    }

    #[test]
    fn file_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("courier.db");
        let ttl = Duration::from_secs(60);
        {
            let store = SqliteStore::open(&path, &ConnectionConfig::default(), ttl).unwrap();
            let _ = store.create_user("alice").unwrap();
        }
        let store = SqliteStore::open(&path, &ConnectionConfig::default(), ttl).unwrap();
        assert!(store.user_by_name("alice").unwrap().is_some());
    }

    #[test]
    fn clear_instance_drops_owned_entries() {
        let store = store();
        store.set_owner_at("bob", "A", SqliteStore::now_ms()).unwrap();
        store.set_owner_at("carol", "B", SqliteStore::now_ms()).unwrap();
        let cleared = store.clear_instance(&InstanceId::from("A")).unwrap();
        assert_eq!(cleared, vec![UserId::from("bob")]);
    }
}
