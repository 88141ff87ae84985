use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::peer::PeerConnection;

/// Concurrent identity → connection table.
///
/// At most one entry exists per identity; inserts are atomic with respect to
/// concurrent inserts of the same identity (a second connection from a live
/// identity is rejected, never merged). Lookups hand out cloned `Arc`s so no
/// internal lock is held while callers do I/O on a connection.
#[derive(Default)]
pub struct PeerRegistry {
    peers: DashMap<String, Arc<PeerConnection>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a connection under its identity if that identity is absent.
    ///
    /// On conflict the existing entry is left in place and the rejected
    /// connection is handed back to the caller.
    pub fn try_insert(
        &self,
        conn: Arc<PeerConnection>,
    ) -> std::result::Result<(), Arc<PeerConnection>> {
        match self.peers.entry(conn.identity().to_string()) {
            Entry::Occupied(_) => Err(conn),
            Entry::Vacant(slot) => {
                slot.insert(conn);
                Ok(())
            }
        }
    }

    /// Remove and return the connection registered under `identity`.
    pub fn remove(&self, identity: &str) -> Option<Arc<PeerConnection>> {
        self.peers.remove(identity).map(|(_, conn)| conn)
    }

    /// Look up a connection by identity.
    pub fn get(&self, identity: &str) -> Option<Arc<PeerConnection>> {
        self.peers.get(identity).map(|entry| Arc::clone(&entry))
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.peers.contains_key(identity)
    }

    /// Point-in-time snapshot of registered identities.
    pub fn identities(&self) -> Vec<String> {
        self.peers.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Remove and return every registered connection (teardown).
    pub fn drain(&self) -> Vec<Arc<PeerConnection>> {
        self.identities()
            .into_iter()
            .filter_map(|identity| self.remove(&identity))
            .collect()
    }
}
