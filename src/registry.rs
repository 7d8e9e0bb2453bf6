//! Registry of joined connections
//!
//! The only mutable state shared between handlers. Every operation takes the
//! lock once, does its work and releases it; no operation calls another while
//! holding it, and the lock is never held across an `.await`.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::connection::Connection;
use crate::error::RegistryError;
use crate::types::ConnectionId;

/// Thread-safe set of connections eligible to receive broadcasts
///
/// Keyed by [`ConnectionId`]; since ids grow monotonically, iteration order is
/// join order.
#[derive(Debug, Default)]
pub struct Registry {
    members: Mutex<BTreeMap<ConnectionId, Connection>>,
}

impl Registry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a connection that completed its handshake
    pub fn add(&self, connection: Connection) -> Result<(), RegistryError> {
        let mut members = self.lock();
        if members.contains_key(&connection.id) {
            return Err(RegistryError::DuplicateId(connection.id));
        }
        debug!(
            "Registered {} as '{}' (members: {})",
            connection.id,
            connection.display_name(),
            members.len() + 1
        );
        members.insert(connection.id, connection);
        Ok(())
    }

    /// Remove a connection; removing an absent id is a no-op
    ///
    /// Returns the removed record, if it was present.
    pub fn remove(&self, id: ConnectionId) -> Option<Connection> {
        let mut members = self.lock();
        let removed = members.remove(&id);
        if removed.is_some() {
            debug!("Unregistered {} (members: {})", id, members.len());
        }
        removed
    }

    /// Point-in-time copy of every member except `id`, in join order
    pub fn snapshot_except(&self, id: ConnectionId) -> Vec<Connection> {
        self.lock()
            .values()
            .filter(|c| c.id != id)
            .cloned()
            .collect()
    }

    /// Number of joined connections
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether nobody is joined
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Whether `id` is currently joined
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.lock().contains_key(&id)
    }

    /// Display names of all members, in join order
    pub fn display_names(&self) -> Vec<String> {
        self.lock()
            .values()
            .map(|c| c.display_name().to_string())
            .collect()
    }

    // Every critical section leaves the map consistent, so a poisoned lock
    // is still safe to use.
    fn lock(&self) -> MutexGuard<'_, BTreeMap<ConnectionId, Connection>> {
        self.members.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::sync::mpsc;

    use super::*;

    fn connection(name: &str) -> Connection {
        let (tx, _rx) = mpsc::channel(1);
        Connection::new(
            ConnectionId::next(),
            name,
            "127.0.0.1:5000".parse().unwrap(),
            tx,
        )
    }

    #[test]
    fn test_add_and_snapshot() {
        let registry = Registry::new();
        let alice = connection("alice");
        let bob = connection("bob");
        let alice_id = alice.id;

        registry.add(alice).unwrap();
        registry.add(bob).unwrap();

        assert_eq!(registry.len(), 2);
        let others = registry.snapshot_except(alice_id);
        assert_eq!(others.len(), 1);
        assert_eq!(others[0].display_name(), "bob");
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let registry = Registry::new();
        let alice = connection("alice");
        let id = alice.id;

        registry.add(alice.clone()).unwrap();
        assert_eq!(registry.add(alice), Err(RegistryError::DuplicateId(id)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let registry = Registry::new();
        let alice = connection("alice");
        let id = alice.id;
        registry.add(alice).unwrap();

        assert!(registry.remove(id).is_some());
        assert!(registry.remove(id).is_none());
        assert!(registry.is_empty());
        assert!(!registry.contains(id));
    }

    #[test]
    fn test_snapshot_is_detached() {
        let registry = Registry::new();
        let alice = connection("alice");
        let alice_id = alice.id;
        registry.add(alice).unwrap();
        registry.add(connection("bob")).unwrap();

        let snapshot = registry.snapshot_except(alice_id);
        registry.add(connection("carol")).unwrap();

        assert_eq!(snapshot.len(), 1);
        assert_eq!(registry.snapshot_except(alice_id).len(), 2);
    }

    #[test]
    fn test_join_order_preserved() {
        let registry = Registry::new();
        for name in ["alice", "bob", "carol"] {
            registry.add(connection(name)).unwrap();
        }
        assert_eq!(registry.display_names(), vec!["alice", "bob", "carol"]);
    }

    #[test]
    fn test_concurrent_adds() {
        const N: usize = 64;
        let registry = Arc::new(Registry::new());

        let handles: Vec<_> = (0..N)
            .map(|i| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    registry.add(connection(&format!("user{}", i))).unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(registry.len(), N);
        let mut names = registry.display_names();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), N);
    }

    #[test]
    fn test_concurrent_add_remove() {
        let registry = Arc::new(Registry::new());
        let keep: Vec<_> = (0..16).map(|i| connection(&format!("keep{}", i))).collect();
        let drop_ids: Vec<_> = (0..16)
            .map(|i| {
                let c = connection(&format!("drop{}", i));
                let id = c.id;
                registry.add(c).unwrap();
                id
            })
            .collect();

        let adder = {
            let registry = Arc::clone(&registry);
            std::thread::spawn(move || {
                for c in keep {
                    registry.add(c).unwrap();
                }
            })
        };
        let remover = {
            let registry = Arc::clone(&registry);
            std::thread::spawn(move || {
                for id in drop_ids {
                    registry.remove(id);
                    registry.remove(id);
                }
            })
        };
        adder.join().unwrap();
        remover.join().unwrap();

        assert_eq!(registry.len(), 16);
        assert!(registry
            .display_names()
            .iter()
            .all(|name| name.starts_with("keep")));
    }
}
