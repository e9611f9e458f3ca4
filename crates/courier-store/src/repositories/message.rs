//! Message history: `private_messages` and `group_messages`.

use rusqlite::{Connection, params};
use serde::Serialize;

use crate::errors::Result;

/// A persisted message as read back from history.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StoredMessage {
    /// Message id.
    pub id: String,
    /// Text payload.
    pub body: String,
    /// Sender username.
    pub sender: String,
    /// Receiver username or group name.
    pub target: String,
    /// RFC 3339 insert time.
    pub created_at: String,
}

/// Message history repository.
pub struct MessageRepo;

impl MessageRepo {
    /// Insert a direct message. Re-inserting the same id is a no-op.
    pub fn insert_private(
        conn: &Connection,
        id: &str,
        body: &str,
        sender: &str,
        receiver: &str,
    ) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        let _ = conn.execute(
            "INSERT OR IGNORE INTO private_messages (id, body, sender, receiver, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![id, body, sender, receiver, now],
        )?;
        Ok(())
    }

    /// Insert a group message. Re-inserting the same id is a no-op.
    pub fn insert_group(
        conn: &Connection,
        id: &str,
        body: &str,
        sender: &str,
        group: &str,
    ) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        let _ = conn.execute(
            "INSERT OR IGNORE INTO group_messages (id, body, sender, group_name, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![id, body, sender, group, now],
        )?;
        Ok(())
    }

    /// Direct messages between `a` and `b`, oldest first.
    pub fn conversation(conn: &Connection, a: &str, b: &str, limit: u32) -> Result<Vec<StoredMessage>> {
        let mut stmt = conn.prepare(
            "SELECT id, body, sender, receiver, created_at FROM private_messages
             WHERE (sender = ?1 AND receiver = ?2) OR (sender = ?2 AND receiver = ?1)
             ORDER BY id LIMIT ?3",
        )?;
        let rows = stmt
            .query_map(params![a, b, limit], Self::map_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Messages sent to `group`, oldest first.
    pub fn group_history(conn: &Connection, group: &str, limit: u32) -> Result<Vec<StoredMessage>> {
        let mut stmt = conn.prepare(
            "SELECT id, body, sender, group_name, created_at FROM group_messages
             WHERE group_name = ?1
             ORDER BY id LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![group, limit], Self::map_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredMessage> {
        Ok(StoredMessage {
            id: row.get(0)?,
            body: row.get(1)?,
            sender: row.get(2)?,
            target: row.get(3)?,
            created_at: row.get(4)?,
        })
    }
}
