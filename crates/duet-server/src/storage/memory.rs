#![allow(clippy::disallowed_types, reason = "Synchronous in-memory operations only")]

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex, MutexGuard},
};

use duet_core::{Connection, ConnectionId, ConversationGroup, Message, UserName, UserRecord};

use super::{ConversationStore, DeleteOutcome, StorageError};

/// In-memory store for tests, simulation and single-process deployments
/// without a data directory.
///
/// All state sits behind one `Arc<Mutex<_>>`, so every call is trivially
/// atomic and clones share the same data. A poisoned lock surfaces as
/// `StorageError::Poisoned`.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryStoreInner>>,
}

#[derive(Default)]
struct MemoryStoreInner {
    users: HashMap<UserName, UserRecord>,

    groups: HashMap<String, ConversationGroup>,

    /// Secondary index: connection -> group name
    connection_groups: HashMap<ConnectionId, String>,

    /// Messages by id, so iteration is in id order
    messages: BTreeMap<u64, Message>,

    /// Group name -> message ids in that conversation
    threads: HashMap<String, Vec<u64>>,

    next_message_id: u64,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored messages.
    ///
    /// Useful for debugging and testing.
    pub fn message_count(&self) -> Result<usize, StorageError> {
        Ok(self.lock()?.messages.len())
    }

    /// Number of groups ever created.
    pub fn group_count(&self) -> Result<usize, StorageError> {
        Ok(self.lock()?.groups.len())
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryStoreInner>, StorageError> {
        self.inner.lock().map_err(|_| StorageError::Poisoned)
    }
}

impl ConversationStore for MemoryStore {
    fn user(&self, username: &UserName) -> Result<Option<UserRecord>, StorageError> {
        Ok(self.lock()?.users.get(username).cloned())
    }

    fn upsert_user(&self, user: &UserRecord) -> Result<(), StorageError> {
        self.lock()?.users.insert(user.username.clone(), user.clone());
        Ok(())
    }

    fn group(&self, name: &str) -> Result<Option<ConversationGroup>, StorageError> {
        Ok(self.lock()?.groups.get(name).cloned())
    }

    fn get_or_create_group(&self, name: &str) -> Result<ConversationGroup, StorageError> {
        let mut inner = self.lock()?;
        Ok(inner
            .groups
            .entry(name.to_owned())
            .or_insert_with(|| ConversationGroup::new(name))
            .clone())
    }

    fn join_group(
        &self,
        name: &str,
        connection: &Connection,
    ) -> Result<ConversationGroup, StorageError> {
        let mut inner = self.lock()?;
        let inner = &mut *inner;

        if let Some(existing) = inner.connection_groups.get(&connection.connection_id)
            && existing != name
        {
            return Err(StorageError::ConnectionInOtherGroup {
                connection_id: connection.connection_id,
                group: existing.clone(),
            });
        }

        let group =
            inner.groups.entry(name.to_owned()).or_insert_with(|| ConversationGroup::new(name));
        group.join(connection.clone());
        inner.connection_groups.insert(connection.connection_id, name.to_owned());

        debug_assert!(group.contains_connection(connection.connection_id));
        Ok(group.clone())
    }

    fn group_for_connection(
        &self,
        connection_id: ConnectionId,
    ) -> Result<Option<ConversationGroup>, StorageError> {
        let inner = self.lock()?;
        Ok(inner
            .connection_groups
            .get(&connection_id)
            .and_then(|name| inner.groups.get(name))
            .cloned())
    }

    fn leave_group(
        &self,
        name: &str,
        connection_id: ConnectionId,
    ) -> Result<ConversationGroup, StorageError> {
        let mut inner = self.lock()?;
        let inner = &mut *inner;

        let group =
            inner.groups.get_mut(name).ok_or_else(|| StorageError::GroupNotFound(name.to_owned()))?;

        if group.leave(connection_id).is_some() {
            inner.connection_groups.remove(&connection_id);
        }

        Ok(group.clone())
    }

    fn clear_connections(&self) -> Result<usize, StorageError> {
        let mut inner = self.lock()?;
        let removed = inner.connection_groups.len();

        for group in inner.groups.values_mut() {
            let ids: Vec<ConnectionId> = group.connection_ids().collect();
            for id in ids {
                group.leave(id);
            }
        }
        inner.connection_groups.clear();

        Ok(removed)
    }

    fn message_thread(
        &self,
        viewer: &UserName,
        other: &UserName,
    ) -> Result<Vec<Message>, StorageError> {
        let inner = self.lock()?;
        let name = duet_core::group_name(viewer, other);

        let mut thread: Vec<Message> = inner
            .threads
            .get(&name)
            .into_iter()
            .flatten()
            .filter_map(|id| inner.messages.get(id))
            .filter(|m| m.is_visible_to(viewer))
            .cloned()
            .collect();

        thread.sort_by_key(|m| (m.message_sent, m.id));
        Ok(thread)
    }

    fn add_message(&self, message: &Message) -> Result<Message, StorageError> {
        let mut inner = self.lock()?;

        inner.next_message_id += 1;
        let mut saved = message.clone();
        saved.id = inner.next_message_id;

        inner.threads.entry(saved.group_name()).or_default().push(saved.id);
        inner.messages.insert(saved.id, saved.clone());

        Ok(saved)
    }

    fn message(&self, id: u64) -> Result<Option<Message>, StorageError> {
        Ok(self.lock()?.messages.get(&id).cloned())
    }

    fn delete_message(&self, id: u64, by: &UserName) -> Result<DeleteOutcome, StorageError> {
        let mut inner = self.lock()?;

        let message = inner.messages.get_mut(&id).ok_or(StorageError::MessageNotFound(id))?;
        if !message.delete_for(by) {
            return Err(StorageError::NotParticipant(id));
        }

        if !message.is_purgeable() {
            return Ok(DeleteOutcome::Hidden(message.clone()));
        }

        let message = message.clone();
        inner.messages.remove(&id);
        if let Some(ids) = inner.threads.get_mut(&message.group_name()) {
            ids.retain(|&m| m != id);
        }

        Ok(DeleteOutcome::Purged(message))
    }
}
