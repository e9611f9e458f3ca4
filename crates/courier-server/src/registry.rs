//! `ConnectionRegistry`: which users are attached to this instance.
//!
//! One entry per user. A single lock guards the map and no await happens
//! while it is held, so operations on the same key are linearizable.

use std::collections::HashMap;
use std::sync::Arc;

use courier_core::{ConnectionId, UserId};
use metrics::gauge;
use parking_lot::RwLock;

use crate::metrics::WS_CONNECTIONS_ACTIVE;
use crate::websocket::connection::ClientConnection;

/// Local user → connection map.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<UserId, Arc<ClientConnection>>>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `connection` under its user, returning the handle it replaced.
    pub fn put(&self, connection: Arc<ClientConnection>) -> Option<Arc<ClientConnection>> {
        let previous = self
            .connections
            .write()
            .insert(connection.user.clone(), connection);
        if previous.is_none() {
            gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);
        }
        previous
    }

    /// Current handle for `user`.
    pub fn get(&self, user: &str) -> Option<Arc<ClientConnection>> {
        self.connections.read().get(user).cloned()
    }

    /// Remove whatever handle `user` has.
    pub fn remove(&self, user: &str) -> Option<Arc<ClientConnection>> {
        let removed = self.connections.write().remove(user);
        if removed.is_some() {
            gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
        }
        removed
    }

    /// Remove `user`'s entry only if it is still connection `id`.
    pub fn remove_if(&self, user: &str, id: &ConnectionId) -> bool {
        let mut connections = self.connections.write();
        let matches = connections.get(user).is_some_and(|c| &c.id == id);
        if matches {
            let _ = connections.remove(user);
            gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
        }
        matches
    }

    /// Whether `user` has a live entry.
    pub fn contains(&self, user: &str) -> bool {
        self.connections.read().contains_key(user)
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    /// Whether no user is attached.
    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    fn conn(user: &str) -> Arc<ClientConnection> {
        let (tx, _rx) = mpsc::channel(1);
        Arc::new(ClientConnection::new(user.into(), tx, CancellationToken::new()))
    }

    #[test]
    fn put_get_remove() {
        let registry = ConnectionRegistry::new();
        assert!(registry.is_empty());
        let alice = conn("alice");
        assert!(registry.put(alice.clone()).is_none());
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("alice").unwrap().id, alice.id);
        assert!(registry.get("bob").is_none());
        assert_eq!(registry.remove("alice").unwrap().id, alice.id);
        assert!(registry.remove("alice").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn put_replaces_and_returns_previous() {
        let registry = ConnectionRegistry::new();
        let first = conn("alice");
        let second = conn("alice");
        let _ = registry.put(first.clone());
        let previous = registry.put(second.clone()).unwrap();
        assert_eq!(previous.id, first.id);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("alice").unwrap().id, second.id);
    }

    #[test]
    fn remove_if_ignores_stale_handle() {
        let registry = ConnectionRegistry::new();
        let first = conn("alice");
        let second = conn("alice");
        let _ = registry.put(first.clone());
        let _ = registry.put(second.clone());

        assert!(!registry.remove_if("alice", &first.id));
        assert!(registry.contains("alice"));
        assert!(registry.remove_if("alice", &second.id));
        assert!(!registry.contains("alice"));
        assert!(!registry.remove_if("alice", &second.id));
    }

    #[test]
    fn concurrent_puts_keep_one_entry_per_user() {
        let registry = Arc::new(ConnectionRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        let _ = registry.put(conn(&format!("user-{}", i % 4)));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(registry.len(), 4);
    }
}
