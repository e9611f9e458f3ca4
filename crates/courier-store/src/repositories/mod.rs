//! Stateless repositories. Every method takes `&Connection` and runs SQL;
//! no repository holds state.

pub mod directory;
pub mod message;
pub mod room;
pub mod user;

pub use directory::DirectoryRepo;
pub use message::{MessageRepo, StoredMessage};
pub use room::{Room, RoomRepo};
pub use user::UserRepo;

#[cfg(test)]
pub(crate) fn test_conn() -> rusqlite::Connection {
    let conn = rusqlite::Connection::open_in_memory().unwrap();
    conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
    let _ = crate::migrations::run_migrations(&conn).unwrap();
    conn
}
