//! Durable messages and user records.

use duet_proto::payloads::hub::MessageDto;
use serde::{Deserialize, Serialize};

use crate::{group::group_name, identity::UserName};

/// A registered user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    /// Identity
    pub username: UserName,
    /// Display name
    pub known_as: String,
}

impl UserRecord {
    /// Create a user record. An empty display name falls back to the identity.
    pub fn new(username: UserName, known_as: impl Into<String>) -> Self {
        let known_as = known_as.into();
        let known_as = if known_as.trim().is_empty() { username.to_string() } else { known_as };
        Self { username, known_as }
    }
}

/// A message between two users.
///
/// `id` is zero until the store assigns one. Timestamps are Unix
/// milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Store-assigned id
    pub id: u64,
    /// Sender identity
    pub sender_username: UserName,
    /// Sender display name at send time
    pub sender_known_as: String,
    /// Recipient identity
    pub recipient_username: UserName,
    /// Recipient display name at send time
    pub recipient_known_as: String,
    /// Body
    pub content: String,
    /// Send time
    pub message_sent: u64,
    /// Read time, set once the recipient has seen the message
    pub date_read: Option<u64>,
    /// Hidden from the sender's view of the thread
    pub sender_deleted: bool,
    /// Hidden from the recipient's view of the thread
    pub recipient_deleted: bool,
}

impl Message {
    /// Compose an unsaved message from `sender` to `recipient`.
    pub fn compose(
        sender: &UserRecord,
        recipient: &UserRecord,
        content: impl Into<String>,
        message_sent: u64,
    ) -> Self {
        Self {
            id: 0,
            sender_username: sender.username.clone(),
            sender_known_as: sender.known_as.clone(),
            recipient_username: recipient.username.clone(),
            recipient_known_as: recipient.known_as.clone(),
            content: content.into(),
            message_sent,
            date_read: None,
            sender_deleted: false,
            recipient_deleted: false,
        }
    }

    /// Name of the conversation group this message belongs to.
    pub fn group_name(&self) -> String {
        group_name(&self.sender_username, &self.recipient_username)
    }

    /// Whether `user` is the sender or the recipient.
    pub fn is_participant(&self, user: &UserName) -> bool {
        &self.sender_username == user || &self.recipient_username == user
    }

    /// Whether the message still shows in `viewer`'s thread.
    pub fn is_visible_to(&self, viewer: &UserName) -> bool {
        (&self.sender_username == viewer && !self.sender_deleted)
            || (&self.recipient_username == viewer && !self.recipient_deleted)
    }

    /// Hide the message from `user`'s side. Returns `false` if `user` is not a
    /// participant.
    pub fn delete_for(&mut self, user: &UserName) -> bool {
        let mut touched = false;
        if &self.sender_username == user {
            self.sender_deleted = true;
            touched = true;
        }
        if &self.recipient_username == user {
            self.recipient_deleted = true;
            touched = true;
        }
        touched
    }

    /// Both sides deleted; the message can be purged.
    pub fn is_purgeable(&self) -> bool {
        self.sender_deleted && self.recipient_deleted
    }

    /// Mark the message read if `reader` is the recipient and it is unread.
    ///
    /// Returns whether the message changed.
    pub fn mark_read_by(&mut self, reader: &UserName, at: u64) -> bool {
        if &self.recipient_username == reader && self.date_read.is_none() {
            self.date_read = Some(at);
            return true;
        }
        false
    }
}

impl From<&Message> for MessageDto {
    fn from(message: &Message) -> Self {
        Self {
            id: message.id,
            sender_username: message.sender_username.to_string(),
            sender_known_as: message.sender_known_as.clone(),
            recipient_username: message.recipient_username.to_string(),
            recipient_known_as: message.recipient_known_as.clone(),
            content: message.content.clone(),
            message_sent: message.message_sent,
            date_read: message.date_read,
        }
    }
}
