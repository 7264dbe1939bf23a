//! Session management payloads.

use serde::{Deserialize, Serialize};

/// Which surface a connection attaches to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Surface {
    /// Presence surface: online/offline tracking and new-message alerts
    Presence,
    /// Conversation surface: the two-party thread with `with`
    Conversation {
        /// Identity of the other participant
        with: String,
    },
}

/// First frame on every connection.
///
/// The identity is trusted: authentication happens before the hub sees the
/// connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hello {
    /// Protocol version the client speaks
    pub version: u8,
    /// Caller identity
    pub username: String,
    /// Display name shown to the other participant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub known_as: Option<String>,
    /// Surface this connection attaches to
    pub surface: Surface,
}

/// Server response to `Hello`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelloReply {
    /// Connection id assigned by the hub
    pub connection_id: u64,
}
