//! Room repository: `rooms` and `room_members`.

use courier_core::UserId;
use rusqlite::{Connection, OptionalExtension, params};
use uuid::Uuid;

use crate::errors::{DatabaseError, Result, is_unique_violation};
use crate::repositories::user::UserRepo;

/// A chat room (group).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Room {
    /// Stable id (UUID v7).
    pub id: String,
    /// Unique name; the `group_name` clients address.
    pub name: String,
}

/// Room repository.
pub struct RoomRepo;

impl RoomRepo {
    /// Create a room. Fails with [`DatabaseError::AlreadyExists`] if the
    /// name is taken.
    pub fn create(conn: &Connection, name: &str) -> Result<Room> {
        let id = Uuid::now_v7().to_string();
        let now = chrono::Utc::now().to_rfc3339();
        match conn.execute(
            "INSERT INTO rooms (id, name, created_at) VALUES (?1, ?2, ?3)",
            params![id, name, now],
        ) {
            Ok(_) => Ok(Room {
                id,
                name: name.to_owned(),
            }),
            Err(e) if is_unique_violation(&e) => {
                Err(DatabaseError::AlreadyExists(format!("room {name}")))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Find a room by name.
    pub fn find_by_name(conn: &Connection, name: &str) -> Result<Option<Room>> {
        let room = conn
            .query_row(
                "SELECT id, name FROM rooms WHERE name = ?1",
                params![name],
                |row| {
                    Ok(Room {
                        id: row.get(0)?,
                        name: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(room)
    }

    /// Add `username` to room `name`. Joining twice is a no-op.
    ///
    /// Returns whether a new membership was created.
    pub fn join(conn: &Connection, name: &str, username: &str) -> Result<bool> {
        let room = Self::find_by_name(conn, name)?
            .ok_or_else(|| DatabaseError::NotFound(format!("room {name}")))?;
        let user_id = UserRepo::id_of(conn, username)?
            .ok_or_else(|| DatabaseError::NotFound(format!("user {username}")))?;
        let now = chrono::Utc::now().to_rfc3339();
        let changed = conn.execute(
            "INSERT OR IGNORE INTO room_members (room_id, user_id, joined_at) VALUES (?1, ?2, ?3)",
            params![room.id, user_id, now],
        )?;
        Ok(changed > 0)
    }

    /// Members of room `name` in join order. Unknown rooms have none.
    pub fn members(conn: &Connection, name: &str) -> Result<Vec<UserId>> {
        let mut stmt = conn.prepare(
            "SELECT u.username
             FROM room_members m
             JOIN rooms r ON r.id = m.room_id
             JOIN users u ON u.id = m.user_id
             WHERE r.name = ?1
             ORDER BY m.seq",
        )?;
        let members = stmt
            .query_map(params![name], |row| row.get::<_, String>(0))?
            .map(|r| r.map(UserId::from_string))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(members)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::test_conn;
    use assert_matches::assert_matches;

    fn seed(conn: &Connection) {
        for name in ["bob", "carol", "dave"] {
            let _ = UserRepo::create(conn, name).unwrap();
        }
        let _ = RoomRepo::create(conn, "team").unwrap();
    }

    #[test]
    fn members_in_join_order() {
        let conn = test_conn();
        seed(&conn);
        for user in ["dave", "bob", "carol"] {
            assert!(RoomRepo::join(&conn, "team", user).unwrap());
        }
        let members = RoomRepo::members(&conn, "team").unwrap();
        assert_eq!(
            members,
            vec![UserId::from("dave"), UserId::from("bob"), UserId::from("carol")]
        );
    }

    #[test]
    fn join_twice_is_noop() {
        let conn = test_conn();
        seed(&conn);
        assert!(RoomRepo::join(&conn, "team", "bob").unwrap());
        assert!(!RoomRepo::join(&conn, "team", "bob").unwrap());
        assert_eq!(RoomRepo::members(&conn, "team").unwrap().len(), 1);
    }

    #[test]
    fn join_unknown_room_or_user() {
        let conn = test_conn();
        seed(&conn);
        assert_matches!(RoomRepo::join(&conn, "nope", "bob"), Err(DatabaseError::NotFound(_)));
        assert_matches!(RoomRepo::join(&conn, "team", "ghost"), Err(DatabaseError::NotFound(_)));
    }

    #[test]
    fn duplicate_room_conflicts() {
        let conn = test_conn();
        seed(&conn);
        assert_matches!(RoomRepo::create(&conn, "team"), Err(DatabaseError::AlreadyExists(_)));
    }

    #[test]
    fn unknown_room_has_no_members() {
        let conn = test_conn();
        assert!(RoomRepo::members(&conn, "nope").unwrap().is_empty());
    }
}
