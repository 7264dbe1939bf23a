//! Redb-backed durable store.
//!
//! Every trait call runs in its own write (or read) transaction, so each
//! mutation is one ACID commit. All state survives server restarts except
//! group membership, which the server clears at startup.

use std::{path::Path, sync::Arc};

use duet_core::{Connection, ConnectionId, ConversationGroup, Message, UserName, UserRecord};
use redb::{
    Database, MultimapTableDefinition, ReadableMultimapTable, ReadableTable, TableDefinition,
};
use serde::{Serialize, de::DeserializeOwned};

use super::{ConversationStore, DeleteOutcome, StorageError};

/// Table: users
/// Key: normalized identity
/// Value: CBOR-encoded `UserRecord`
const USERS: TableDefinition<&str, &[u8]> = TableDefinition::new("users");

/// Table: groups
/// Key: group name
/// Value: CBOR-encoded `ConversationGroup`
const GROUPS: TableDefinition<&str, &[u8]> = TableDefinition::new("groups");

/// Table: connection_groups (secondary index)
/// Key: connection id
/// Value: group name
const CONNECTION_GROUPS: TableDefinition<u64, &str> = TableDefinition::new("connection_groups");

/// Table: messages
/// Key: message id
/// Value: CBOR-encoded `Message`
const MESSAGES: TableDefinition<u64, &[u8]> = TableDefinition::new("messages");

/// Multimap: threads
/// Key: group name
/// Values: ids of messages in that conversation
const THREADS: MultimapTableDefinition<&str, u64> = MultimapTableDefinition::new("threads");

/// Table: meta
/// Key: counter name
/// Value: counter
const META: TableDefinition<&str, u64> = TableDefinition::new("meta");

const NEXT_MESSAGE_ID: &str = "next_message_id";

/// Durable store backed by Redb.
///
/// Thread-safe through Redb's internal locking. Clone is cheap (Arc).
#[derive(Clone)]
pub struct RedbStore {
    db: Arc<Database>,
}

impl RedbStore {
    /// Open or create a Redb database at the given path.
    ///
    /// Creates all tables if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Io` if the database cannot be opened or created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let db = Database::create(path.as_ref()).map_err(io)?;

        let txn = db.begin_write().map_err(io)?;
        {
            txn.open_table(USERS).map_err(io)?;
            txn.open_table(GROUPS).map_err(io)?;
            txn.open_table(CONNECTION_GROUPS).map_err(io)?;
            txn.open_table(MESSAGES).map_err(io)?;
            txn.open_multimap_table(THREADS).map_err(io)?;
            txn.open_table(META).map_err(io)?;
        }
        txn.commit().map_err(io)?;

        Ok(Self { db: Arc::new(db) })
    }
}

impl ConversationStore for RedbStore {
    fn user(&self, username: &UserName) -> Result<Option<UserRecord>, StorageError> {
        let txn = self.db.begin_read().map_err(io)?;
        let table = txn.open_table(USERS).map_err(io)?;

        table.get(username.as_str()).map_err(io)?.map(|v| decode(v.value())).transpose()
    }

    fn upsert_user(&self, user: &UserRecord) -> Result<(), StorageError> {
        let bytes = encode(user)?;

        let txn = self.db.begin_write().map_err(io)?;
        {
            let mut table = txn.open_table(USERS).map_err(io)?;
            table.insert(user.username.as_str(), bytes.as_slice()).map_err(io)?;
        }
        txn.commit().map_err(io)?;

        Ok(())
    }

    fn group(&self, name: &str) -> Result<Option<ConversationGroup>, StorageError> {
        let txn = self.db.begin_read().map_err(io)?;
        let table = txn.open_table(GROUPS).map_err(io)?;

        table.get(name).map_err(io)?.map(|v| decode(v.value())).transpose()
    }

    fn get_or_create_group(&self, name: &str) -> Result<ConversationGroup, StorageError> {
        let txn = self.db.begin_write().map_err(io)?;
        let group = {
            let mut table = txn.open_table(GROUPS).map_err(io)?;

            let existing: Option<ConversationGroup> =
                table.get(name).map_err(io)?.map(|v| decode(v.value())).transpose()?;

            match existing {
                Some(group) => group,
                None => {
                    let group = ConversationGroup::new(name);
                    table.insert(name, encode(&group)?.as_slice()).map_err(io)?;
                    group
                },
            }
        };
        txn.commit().map_err(io)?;

        Ok(group)
    }

    fn join_group(
        &self,
        name: &str,
        connection: &Connection,
    ) -> Result<ConversationGroup, StorageError> {
        let id = connection.connection_id;

        let txn = self.db.begin_write().map_err(io)?;
        let group = {
            let mut index = txn.open_table(CONNECTION_GROUPS).map_err(io)?;

            let current: Option<String> =
                index.get(id.get()).map_err(io)?.map(|v| v.value().to_owned());
            if let Some(current) = current
                && current != name
            {
                return Err(StorageError::ConnectionInOtherGroup {
                    connection_id: id,
                    group: current,
                });
            }

            let mut groups = txn.open_table(GROUPS).map_err(io)?;
            let mut group: ConversationGroup = groups
                .get(name)
                .map_err(io)?
                .map(|v| decode(v.value()))
                .transpose()?
                .unwrap_or_else(|| ConversationGroup::new(name));

            group.join(connection.clone());

            groups.insert(name, encode(&group)?.as_slice()).map_err(io)?;
            index.insert(id.get(), name).map_err(io)?;
            group
        };
        txn.commit().map_err(io)?;

        Ok(group)
    }

    fn group_for_connection(
        &self,
        connection_id: ConnectionId,
    ) -> Result<Option<ConversationGroup>, StorageError> {
        let txn = self.db.begin_read().map_err(io)?;
        let index = txn.open_table(CONNECTION_GROUPS).map_err(io)?;

        let name = index.get(connection_id.get()).map_err(io)?.map(|v| v.value().to_owned());
        let Some(name) = name else {
            return Ok(None);
        };

        let groups = txn.open_table(GROUPS).map_err(io)?;
        groups.get(name.as_str()).map_err(io)?.map(|v| decode(v.value())).transpose()
    }

    fn leave_group(
        &self,
        name: &str,
        connection_id: ConnectionId,
    ) -> Result<ConversationGroup, StorageError> {
        let txn = self.db.begin_write().map_err(io)?;
        let group = {
            let mut groups = txn.open_table(GROUPS).map_err(io)?;
            let mut group: ConversationGroup = groups
                .get(name)
                .map_err(io)?
                .map(|v| decode(v.value()))
                .transpose()?
                .ok_or_else(|| StorageError::GroupNotFound(name.to_owned()))?;

            if group.leave(connection_id).is_some() {
                groups.insert(name, encode(&group)?.as_slice()).map_err(io)?;

                let mut index = txn.open_table(CONNECTION_GROUPS).map_err(io)?;
                index.remove(connection_id.get()).map_err(io)?;
            }
            group
        };
        txn.commit().map_err(io)?;

        Ok(group)
    }

    fn clear_connections(&self) -> Result<usize, StorageError> {
        let txn = self.db.begin_write().map_err(io)?;
        let removed = {
            let mut index = txn.open_table(CONNECTION_GROUPS).map_err(io)?;
            let mut groups = txn.open_table(GROUPS).map_err(io)?;

            let mut entries = Vec::new();
            for entry in index.iter().map_err(io)? {
                let (id, name) = entry.map_err(io)?;
                entries.push((id.value(), name.value().to_owned()));
            }

            let mut names: Vec<&str> = entries.iter().map(|(_, name)| name.as_str()).collect();
            names.sort_unstable();
            names.dedup();
            for name in names {
                if groups.get(name).map_err(io)?.is_some() {
                    let emptied = encode(&ConversationGroup::new(name))?;
                    groups.insert(name, emptied.as_slice()).map_err(io)?;
                }
            }

            for (id, _) in &entries {
                index.remove(*id).map_err(io)?;
            }
            entries.len()
        };
        txn.commit().map_err(io)?;

        Ok(removed)
    }

    fn message_thread(
        &self,
        viewer: &UserName,
        other: &UserName,
    ) -> Result<Vec<Message>, StorageError> {
        let name = duet_core::group_name(viewer, other);

        let txn = self.db.begin_read().map_err(io)?;
        let threads = txn.open_multimap_table(THREADS).map_err(io)?;
        let messages = txn.open_table(MESSAGES).map_err(io)?;

        let mut thread = Vec::new();
        for id in threads.get(name.as_str()).map_err(io)? {
            let id = id.map_err(io)?.value();
            let Some(stored) = messages.get(id).map_err(io)? else {
                continue;
            };
            let message: Message = decode(stored.value())?;
            if message.is_visible_to(viewer) {
                thread.push(message);
            }
        }

        thread.sort_by_key(|m| (m.message_sent, m.id));
        Ok(thread)
    }

    fn add_message(&self, message: &Message) -> Result<Message, StorageError> {
        let txn = self.db.begin_write().map_err(io)?;
        let saved = {
            let mut meta = txn.open_table(META).map_err(io)?;
            let next = meta.get(NEXT_MESSAGE_ID).map_err(io)?.map_or(0, |v| v.value()) + 1;
            meta.insert(NEXT_MESSAGE_ID, next).map_err(io)?;

            let mut saved = message.clone();
            saved.id = next;

            let mut messages = txn.open_table(MESSAGES).map_err(io)?;
            messages.insert(saved.id, encode(&saved)?.as_slice()).map_err(io)?;

            let mut threads = txn.open_multimap_table(THREADS).map_err(io)?;
            threads.insert(saved.group_name().as_str(), saved.id).map_err(io)?;

            saved
        };
        txn.commit().map_err(io)?;

        Ok(saved)
    }

    fn message(&self, id: u64) -> Result<Option<Message>, StorageError> {
        let txn = self.db.begin_read().map_err(io)?;
        let table = txn.open_table(MESSAGES).map_err(io)?;

        table.get(id).map_err(io)?.map(|v| decode(v.value())).transpose()
    }

    fn delete_message(&self, id: u64, by: &UserName) -> Result<DeleteOutcome, StorageError> {
        let txn = self.db.begin_write().map_err(io)?;
        let outcome = {
            let mut messages = txn.open_table(MESSAGES).map_err(io)?;
            let mut message: Message = messages
                .get(id)
                .map_err(io)?
                .map(|v| decode(v.value()))
                .transpose()?
                .ok_or(StorageError::MessageNotFound(id))?;

            if !message.delete_for(by) {
                return Err(StorageError::NotParticipant(id));
            }

            if message.is_purgeable() {
                messages.remove(id).map_err(io)?;
                let mut threads = txn.open_multimap_table(THREADS).map_err(io)?;
                threads.remove(message.group_name().as_str(), id).map_err(io)?;
                DeleteOutcome::Purged(message)
            } else {
                messages.insert(id, encode(&message)?.as_slice()).map_err(io)?;
                DeleteOutcome::Hidden(message)
            }
        };
        txn.commit().map_err(io)?;

        Ok(outcome)
    }
}

fn io(err: impl std::fmt::Display) -> StorageError {
    StorageError::Io(err.to_string())
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StorageError> {
    let mut bytes = Vec::new();
    ciborium::into_writer(value, &mut bytes)
        .map_err(|e| StorageError::Serialization(e.to_string()))?;
    Ok(bytes)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StorageError> {
    ciborium::from_reader(bytes).map_err(|e| StorageError::Serialization(e.to_string()))
}
