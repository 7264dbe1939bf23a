//! Hub error types.
//!
//! Every error the message hub returns falls into exactly one class:
//!
//! - client protocol errors: reported to the caller only, nothing mutated
//! - invariant violations: membership bookkeeping drifted from live
//!   connections; logged loudly
//! - persistence failures: the commit did not happen, so no broadcast either

use std::fmt;

use duet_core::{ConnectionId, SessionError};
use duet_proto::ErrorPayload;

use crate::storage::StorageError;

/// Errors from [`crate::MessageHub`] operations.
#[derive(Debug)]
pub enum HubError {
    /// Sender and recipient are the same identity.
    CannotMessageSelf,

    /// Recipient identity is invalid or unknown to the store.
    RecipientNotFound(String),

    /// Caller identity is unknown to the store.
    ///
    /// The runtime records every caller at `Hello`, so this only happens when
    /// that write failed.
    UserNotFound(String),

    /// Recipient is not the other participant of the caller's conversation.
    OutsideConversation(String),

    /// Message content is empty or too long.
    InvalidContent(String),

    /// Message id does not exist.
    MessageNotFound(u64),

    /// Caller is neither sender nor recipient of the message.
    NotParticipant(u64),

    /// The operation is not valid in the session's current state.
    Session(SessionError),

    /// Joining the conversation group could not be committed.
    JoinFailed(StorageError),

    /// Leaving the conversation group could not be committed.
    LeaveFailed(StorageError),

    /// The message could not be committed.
    CommitFailed(StorageError),

    /// A read needed by the operation failed.
    Storage(StorageError),

    /// The thread could not be framed for delivery.
    ThreadDelivery(String),

    /// Disconnect for a connection with no recorded group membership.
    MembershipDrift {
        /// Connection whose membership is missing
        connection_id: ConnectionId,
    },
}

impl HubError {
    /// Caller asked for something invalid; nothing was mutated.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::CannotMessageSelf
                | Self::RecipientNotFound(_)
                | Self::OutsideConversation(_)
                | Self::InvalidContent(_)
                | Self::MessageNotFound(_)
                | Self::NotParticipant(_)
                | Self::Session(_)
        )
    }

    /// Membership bookkeeping desynchronized from live connections.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            Self::MembershipDrift { .. } | Self::UserNotFound(_) | Self::ThreadDelivery(_)
        )
    }

    /// A commit or read against the store failed.
    pub fn is_persistence_failure(&self) -> bool {
        matches!(
            self,
            Self::JoinFailed(_) | Self::LeaveFailed(_) | Self::CommitFailed(_) | Self::Storage(_)
        )
    }

    /// Wire error reported to the caller.
    pub fn to_payload(&self) -> ErrorPayload {
        match self {
            Self::CannotMessageSelf => ErrorPayload::cannot_message_self(),
            Self::RecipientNotFound(name) => ErrorPayload::recipient_not_found(name),
            Self::JoinFailed(_) => ErrorPayload::join_failed(),
            Self::InvalidContent(msg) => ErrorPayload::invalid_payload(msg.clone()),
            Self::OutsideConversation(_) | Self::MessageNotFound(_) | Self::NotParticipant(_) => {
                ErrorPayload::invalid_payload(self.to_string())
            },
            Self::Session(err) => ErrorPayload::protocol_violation(err.to_string()),
            Self::LeaveFailed(_) | Self::CommitFailed(_) | Self::Storage(_) => {
                ErrorPayload::new(ErrorPayload::PERSISTENCE_FAILED, self.to_string())
            },
            Self::UserNotFound(_) | Self::ThreadDelivery(_) | Self::MembershipDrift { .. } => {
                ErrorPayload::new(ErrorPayload::INTERNAL, "internal server error")
            },
        }
    }
}

impl fmt::Display for HubError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CannotMessageSelf => write!(f, "you cannot send messages to yourself"),
            Self::RecipientNotFound(name) => write!(f, "recipient not found: {name}"),
            Self::UserNotFound(name) => write!(f, "user not found: {name}"),
            Self::OutsideConversation(name) => {
                write!(f, "{name} is not the other participant of this conversation")
            },
            Self::InvalidContent(msg) => write!(f, "invalid content: {msg}"),
            Self::MessageNotFound(id) => write!(f, "message not found: {id}"),
            Self::NotParticipant(id) => write!(f, "not a participant of message {id}"),
            Self::Session(err) => write!(f, "session error: {err}"),
            Self::JoinFailed(err) => write!(f, "failed to join group: {err}"),
            Self::LeaveFailed(err) => write!(f, "failed to leave group: {err}"),
            Self::CommitFailed(err) => write!(f, "failed to commit message: {err}"),
            Self::Storage(err) => write!(f, "storage error: {err}"),
            Self::ThreadDelivery(msg) => write!(f, "thread delivery failed: {msg}"),
            Self::MembershipDrift { connection_id } => {
                write!(f, "connection {connection_id} has no recorded group membership")
            },
        }
    }
}

impl std::error::Error for HubError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Session(err) => Some(err),
            Self::JoinFailed(err)
            | Self::LeaveFailed(err)
            | Self::CommitFailed(err)
            | Self::Storage(err) => Some(err),
            _ => None,
        }
    }
}

impl From<SessionError> for HubError {
    fn from(err: SessionError) -> Self {
        Self::Session(err)
    }
}

impl From<StorageError> for HubError {
    fn from(err: StorageError) -> Self {
        Self::Storage(err)
    }
}
