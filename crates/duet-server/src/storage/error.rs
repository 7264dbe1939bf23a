//! Storage error type.

use duet_core::ConnectionId;
use thiserror::Error;

/// Errors from a [`super::ConversationStore`] backend.
///
/// A failed call commits nothing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Backend I/O or transaction failure. May succeed on retry.
    #[error("storage I/O error: {0}")]
    Io(String),

    /// Stored value could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A thread panicked while holding the store lock.
    #[error("store lock poisoned")]
    Poisoned,

    /// The connection is already a member of a different group.
    #[error("connection {connection_id} already belongs to group {group}")]
    ConnectionInOtherGroup {
        /// Connection that tried to join
        connection_id: ConnectionId,
        /// Group it currently belongs to
        group: String,
    },

    /// No group with this name.
    #[error("group not found: {0}")]
    GroupNotFound(String),

    /// No message with this id.
    #[error("message not found: {0}")]
    MessageNotFound(u64),

    /// The user is neither sender nor recipient of the message.
    #[error("user is not a participant of message {0}")]
    NotParticipant(u64),
}

impl StorageError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}
