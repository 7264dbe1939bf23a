//! Process-wide presence registry.
//!
//! Maps each online user to the set of their live connections. A user is
//! online exactly while that set is non-empty; empty entries are removed in
//! the same step that empties them.
//!
//! # Concurrency
//!
//! Backed by a sharded [`DashMap`]. Each operation holds at most one shard
//! lock, and the add/remove check-and-mutate runs under that lock, so two
//! concurrent removals of a user's last two connections report exactly one
//! offline transition.

use std::collections::HashSet;

use dashmap::{DashMap, mapref::entry::Entry};

use crate::identity::{ConnectionId, UserName};

/// Which users are online and through which connections.
#[derive(Debug, Default)]
pub struct PresenceRegistry {
    online: DashMap<UserName, HashSet<ConnectionId>>,
}

impl PresenceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a connection for `user`.
    ///
    /// Returns `true` if the user just became online. Adding the same
    /// connection twice is a no-op after the first call.
    pub fn add_connection(&self, user: &UserName, connection_id: ConnectionId) -> bool {
        match self.online.entry(user.clone()) {
            Entry::Occupied(mut entry) => {
                entry.get_mut().insert(connection_id);
                false
            },
            Entry::Vacant(entry) => {
                entry.insert(HashSet::from([connection_id]));
                true
            },
        }
    }

    /// Drop a connection for `user`.
    ///
    /// Returns `true` if the user just went offline. Unknown users and
    /// connections are no-ops returning `false`.
    pub fn remove_connection(&self, user: &UserName, connection_id: ConnectionId) -> bool {
        match self.online.entry(user.clone()) {
            Entry::Occupied(mut entry) => {
                if !entry.get_mut().remove(&connection_id) {
                    return false;
                }
                if entry.get().is_empty() {
                    entry.remove();
                    return true;
                }
                false
            },
            Entry::Vacant(_) => false,
        }
    }

    /// Snapshot of `user`'s live connections, empty if offline.
    pub fn connections_for(&self, user: &UserName) -> Vec<ConnectionId> {
        self.online.get(user).map(|set| set.iter().copied().collect()).unwrap_or_default()
    }

    /// Whether `user` has at least one live connection.
    pub fn is_online(&self, user: &UserName) -> bool {
        self.online.contains_key(user)
    }

    /// Snapshot of online users, sorted.
    pub fn online_users(&self) -> Vec<UserName> {
        let mut users: Vec<UserName> = self.online.iter().map(|e| e.key().clone()).collect();
        users.sort();
        users
    }

    /// Snapshot of every live connection with its user.
    pub fn all_connections(&self) -> Vec<(UserName, ConnectionId)> {
        self.online
            .iter()
            .flat_map(|e| {
                let user = e.key().clone();
                e.value().iter().map(move |id| (user.clone(), *id)).collect::<Vec<_>>()
            })
            .collect()
    }

    /// Number of online users.
    pub fn len(&self) -> usize {
        self.online.len()
    }

    /// Whether nobody is online.
    pub fn is_empty(&self) -> bool {
        self.online.is_empty()
    }
}
