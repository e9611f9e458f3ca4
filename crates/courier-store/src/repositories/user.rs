//! User repository: the `users` table.

use courier_core::{User, UserId};
use rusqlite::{Connection, OptionalExtension, params};
use uuid::Uuid;

use crate::errors::{DatabaseError, Result, is_unique_violation};

/// User repository.
pub struct UserRepo;

impl UserRepo {
    /// Insert a user. Fails with [`DatabaseError::AlreadyExists`] if the
    /// username is taken.
    pub fn create(conn: &Connection, username: &str) -> Result<User> {
        let id = Uuid::now_v7().to_string();
        let now = chrono::Utc::now().to_rfc3339();
        match conn.execute(
            "INSERT INTO users (id, username, created_at) VALUES (?1, ?2, ?3)",
            params![id, username, now],
        ) {
            Ok(_) => Ok(User {
                id,
                username: UserId::from(username),
            }),
            Err(e) if is_unique_violation(&e) => {
                Err(DatabaseError::AlreadyExists(format!("user {username}")))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Find a user by username.
    pub fn find_by_username(conn: &Connection, username: &str) -> Result<Option<User>> {
        let user = conn
            .query_row(
                "SELECT id, username FROM users WHERE username = ?1",
                params![username],
                |row| {
                    Ok(User {
                        id: row.get(0)?,
                        username: UserId::from_string(row.get(1)?),
                    })
                },
            )
            .optional()?;
        Ok(user)
    }

    /// Id of the user with `username`.
    pub(crate) fn id_of(conn: &Connection, username: &str) -> Result<Option<String>> {
        let id = conn
            .query_row(
                "SELECT id FROM users WHERE username = ?1",
                params![username],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }
}
