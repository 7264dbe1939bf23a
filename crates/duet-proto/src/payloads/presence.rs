//! Presence surface payloads.

use serde::{Deserialize, Serialize};

/// Out-of-band alert: `username` sent a message in a conversation the
/// recipient is not currently viewing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessageReceived {
    /// Sender identity
    pub username: String,
    /// Sender display name
    pub known_as: String,
}
