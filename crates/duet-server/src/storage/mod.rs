//! Persistence for users, conversation groups and messages.
//!
//! The trait is synchronous: every call is one atomic commit and the hub
//! treats a returned `Ok` as durable. Callers serialize membership changes per
//! group themselves (see `hub::GroupLocks`); the store only guarantees that
//! each call is all-or-nothing.

mod chaotic;
mod error;
mod memory;
mod redb;

pub use chaotic::ChaoticStore;
use duet_core::{Connection, ConnectionId, ConversationGroup, Message, UserName, UserRecord};
pub use error::StorageError;
pub use memory::MemoryStore;

pub use self::redb::RedbStore;

/// Result of deleting a message on one side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// Hidden from the caller; the other side still sees it.
    Hidden(Message),
    /// Both sides deleted it and it was removed.
    Purged(Message),
}

impl DeleteOutcome {
    /// The message as it was after the caller's side was marked deleted.
    pub fn message(&self) -> &Message {
        match self {
            Self::Hidden(m) | Self::Purged(m) => m,
        }
    }
}

/// Storage for conversation state.
///
/// Must be Clone (shared by every session task), Send + Sync, and
/// synchronous. Implementations share state through `Arc`, so clones observe
/// the same data.
///
/// # Invariants
///
/// - A connection id appears in at most one group's membership set.
/// - The connection -> group index always agrees with group membership; both
///   change in the same commit.
/// - Groups are never deleted.
pub trait ConversationStore: Clone + Send + Sync + 'static {
    /// Look up a user. `None` if the identity is unknown.
    fn user(&self, username: &UserName) -> Result<Option<UserRecord>, StorageError>;

    /// Insert or update a user record.
    fn upsert_user(&self, user: &UserRecord) -> Result<(), StorageError>;

    /// Load a group by name. `None` if it was never created.
    fn group(&self, name: &str) -> Result<Option<ConversationGroup>, StorageError>;

    /// Return the named group, creating and persisting an empty one if absent.
    fn get_or_create_group(&self, name: &str) -> Result<ConversationGroup, StorageError>;

    /// Add a connection to a group, creating the group if absent.
    ///
    /// Idempotent per connection id. Returns the membership after the commit.
    ///
    /// # Errors
    ///
    /// - `StorageError::ConnectionInOtherGroup` if the connection is already
    ///   indexed to a different group
    fn join_group(&self, name: &str, connection: &Connection)
    -> Result<ConversationGroup, StorageError>;

    /// Reverse lookup: the group a connection currently belongs to.
    fn group_for_connection(
        &self,
        connection_id: ConnectionId,
    ) -> Result<Option<ConversationGroup>, StorageError>;

    /// Remove a connection from a group. The group persists even when empty.
    ///
    /// Removing a non-member is a no-op. Returns the membership after the
    /// commit.
    ///
    /// # Errors
    ///
    /// - `StorageError::GroupNotFound` if the group does not exist
    fn leave_group(
        &self,
        name: &str,
        connection_id: ConnectionId,
    ) -> Result<ConversationGroup, StorageError>;

    /// Drop every connection from every group.
    ///
    /// Run at startup: connections never outlive the process that accepted
    /// them. Returns how many memberships were removed.
    fn clear_connections(&self) -> Result<usize, StorageError>;

    /// Messages between `viewer` and `other` that `viewer` has not deleted,
    /// oldest first.
    fn message_thread(
        &self,
        viewer: &UserName,
        other: &UserName,
    ) -> Result<Vec<Message>, StorageError>;

    /// Persist a new message. The store assigns `id`; the saved message is
    /// returned.
    fn add_message(&self, message: &Message) -> Result<Message, StorageError>;

    /// Load a message by id.
    fn message(&self, id: u64) -> Result<Option<Message>, StorageError>;

    /// Delete a message on `by`'s side; purge it once both sides deleted.
    ///
    /// # Errors
    ///
    /// - `StorageError::MessageNotFound` if no such message exists
    /// - `StorageError::NotParticipant` if `by` is neither sender nor
    ///   recipient
    fn delete_message(&self, id: u64, by: &UserName) -> Result<DeleteOutcome, StorageError>;
}
