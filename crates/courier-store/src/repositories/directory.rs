//! Directory repository: `user_directory`.
//!
//! Timestamps are Unix milliseconds supplied by the caller, so expiry can be
//! tested without sleeping.

use courier_core::{InstanceId, UserId};
use rusqlite::{Connection, OptionalExtension, params};

use crate::errors::Result;

/// Directory repository.
pub struct DirectoryRepo;

impl DirectoryRepo {
    /// Point `user` at `instance`, stamping `now_ms`.
    pub fn upsert(conn: &Connection, user: &str, instance: &str, now_ms: i64) -> Result<()> {
        let _ = conn.execute(
            "INSERT INTO user_directory (username, instance_id, updated_at_ms)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(username) DO UPDATE
             SET instance_id = excluded.instance_id, updated_at_ms = excluded.updated_at_ms",
            params![user, instance, now_ms],
        )?;
        Ok(())
    }

    /// Restamp the entry for `user` if it points at `instance`, or create it
    /// if there is none. An entry held by another instance is left untouched.
    ///
    /// Returns whether `instance` owns the entry afterwards.
    pub fn refresh(conn: &Connection, user: &str, instance: &str, now_ms: i64) -> Result<bool> {
        let changed = conn.execute(
            "INSERT INTO user_directory (username, instance_id, updated_at_ms)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(username) DO UPDATE
             SET updated_at_ms = excluded.updated_at_ms
             WHERE user_directory.instance_id = excluded.instance_id",
            params![user, instance, now_ms],
        )?;
        Ok(changed > 0)
    }

    /// Owner of `user` if its entry was written at or after `cutoff_ms`.
    pub fn owner(conn: &Connection, user: &str, cutoff_ms: i64) -> Result<Option<InstanceId>> {
        let owner = conn
            .query_row(
                "SELECT instance_id FROM user_directory
                 WHERE username = ?1 AND updated_at_ms >= ?2",
                params![user, cutoff_ms],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(owner.map(InstanceId::from_string))
    }

    /// Delete the entry for `user` only if it points at `instance`.
    pub fn clear_if_owner(conn: &Connection, user: &str, instance: &str) -> Result<bool> {
        let changed = conn.execute(
            "DELETE FROM user_directory WHERE username = ?1 AND instance_id = ?2",
            params![user, instance],
        )?;
        Ok(changed > 0)
    }

    /// Delete every entry owned by `instance`. Returns the affected users.
    pub fn clear_instance(conn: &Connection, instance: &str) -> Result<Vec<UserId>> {
        let mut stmt = conn.prepare(
            "DELETE FROM user_directory WHERE instance_id = ?1 RETURNING username",
        )?;
        let users = stmt
            .query_map(params![instance], |row| row.get::<_, String>(0))?
            .map(|r| r.map(UserId::from_string))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(users)
    }
}
