//! `SQLite` connection pool with WAL mode and foreign keys enabled.
//!
//! The [`PragmaCustomizer`] runs on every new connection.

use std::time::Duration;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;

use crate::errors::Result;

/// Alias for the connection pool type.
pub type ConnectionPool = Pool<SqliteConnectionManager>;

/// Alias for a pooled connection.
pub type PooledConnection = r2d2::PooledConnection<SqliteConnectionManager>;

/// Configuration for the connection pool.
#[derive(Clone, Debug)]
pub struct ConnectionConfig {
    /// Maximum pool size for file-backed databases (default: 4).
    pub pool_size: u32,
    /// Busy timeout in milliseconds (default: 5000).
    pub busy_timeout_ms: u32,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            pool_size: 4,
            busy_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug)]
struct PragmaCustomizer {
    busy_timeout_ms: u32,
}

impl r2d2::CustomizeConnection<Connection, rusqlite::Error> for PragmaCustomizer {
    fn on_acquire(&self, conn: &mut Connection) -> std::result::Result<(), rusqlite::Error> {
        conn.execute_batch(&format!(
            "PRAGMA journal_mode = WAL;\
             PRAGMA busy_timeout = {};\
             PRAGMA foreign_keys = ON;\
             PRAGMA synchronous = NORMAL;",
            self.busy_timeout_ms
        ))
    }
}

/// Create an in-memory pool.
///
/// Each in-memory connection is its own database, so the pool holds exactly
/// one connection and never recycles it.
pub fn new_in_memory(config: &ConnectionConfig) -> Result<ConnectionPool> {
    let pool = Pool::builder()
        .max_size(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connection_timeout(Duration::from_secs(5))
        .connection_customizer(Box::new(PragmaCustomizer {
            busy_timeout_ms: config.busy_timeout_ms,
        }))
        .build(SqliteConnectionManager::memory())?;
    Ok(pool)
}

/// Create a file-backed pool.
pub fn new_file(path: &str, config: &ConnectionConfig) -> Result<ConnectionPool> {
    let pool = Pool::builder()
        .max_size(config.pool_size)
        .connection_timeout(Duration::from_secs(5))
        .connection_customizer(Box::new(PragmaCustomizer {
            busy_timeout_ms: config.busy_timeout_ms,
        }))
        .build(SqliteConnectionManager::file(path))?;
    Ok(pool)
}

/// Current `journal_mode` and `foreign_keys` pragma values.
pub fn pragma_state(conn: &Connection) -> Result<(String, bool)> {
    let journal_mode: String = conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?;
    let foreign_keys: i32 = conn.query_row("PRAGMA foreign_keys", [], |row| row.get(0))?;
    Ok((journal_mode, foreign_keys == 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_pool_is_single_connection() {
        let pool = new_in_memory(&ConnectionConfig::default()).unwrap();
        assert_eq!(pool.max_size(), 1);
        let conn = pool.get().unwrap();
        let (journal_mode, fk) = pragma_state(&conn).unwrap();
        assert!(journal_mode == "wal" || journal_mode == "memory");
        assert!(fk);
    }

    #[test]
    fn in_memory_state_survives_checkout() {
        let pool = new_in_memory(&ConnectionConfig::default()).unwrap();
        {
            let conn = pool.get().unwrap();
            conn.execute_batch("CREATE TABLE t (x INTEGER)").unwrap();
        }
        let conn = pool.get().unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM t", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn file_pool_uses_wal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("courier.db");
        let config = ConnectionConfig {
            pool_size: 2,
            ..ConnectionConfig::default()
        };
        let pool = new_file(path.to_str().unwrap(), &config).unwrap();
        assert_eq!(pool.max_size(), 2);
        let conn = pool.get().unwrap();
        let (journal_mode, fk) = pragma_state(&conn).unwrap();
        assert_eq!(journal_mode, "wal");
        assert!(fk);
    }
}
