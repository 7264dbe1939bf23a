//! Conversation surface payloads.
//!
//! Timestamps are Unix milliseconds.

use serde::{Deserialize, Serialize};

/// Client request to send a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendMessage {
    /// Identity of the recipient
    pub recipient_username: String,
    /// Message body
    pub content: String,
}

/// Client request to delete a message on its own side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteMessage {
    /// Store-assigned message id
    pub message_id: u64,
}

/// One live connection inside a conversation group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionDto {
    /// Connection id
    pub connection_id: u64,
    /// Identity of the user behind the connection
    pub username: String,
}

/// Membership snapshot of a conversation group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupDto {
    /// Deterministic group name
    pub name: String,
    /// Connections currently viewing the conversation
    pub connections: Vec<ConnectionDto>,
}

/// A message as seen by clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageDto {
    /// Store-assigned id
    pub id: u64,
    /// Sender identity
    pub sender_username: String,
    /// Sender display name
    pub sender_known_as: String,
    /// Recipient identity
    pub recipient_username: String,
    /// Recipient display name
    pub recipient_known_as: String,
    /// Message body
    pub content: String,
    /// When the message was sent
    pub message_sent: u64,
    /// When the recipient read the message, if they have
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_read: Option<u64>,
}
