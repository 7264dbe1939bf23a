//! Operation codes.
//!
//! Ranges group opcodes by surface: `0x00xx` session, `0x01xx` conversation,
//! `0x02xx` presence, `0xFFFF` error.

/// Operation code carried in every [`crate::FrameHeader`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Opcode {
    /// Client opens a session and names its surface
    Hello = 0x0001,
    /// Server acknowledges `Hello` with the assigned connection id
    HelloReply = 0x0002,
    /// Client closes the session
    Goodbye = 0x0003,
    /// Keepalive request
    Ping = 0x0004,
    /// Keepalive response
    Pong = 0x0005,

    /// Client sends a message to the other participant
    SendMessage = 0x0100,
    /// Client deletes a message on its side
    DeleteMessage = 0x0101,
    /// Server pushes the current membership of a conversation group
    UpdatedGroup = 0x0110,
    /// Server pushes the full thread to a newly joined connection
    ReceiveMessageThread = 0x0111,
    /// Server broadcasts a freshly persisted message
    NewMessage = 0x0112,
    /// Continuation of a thread too large for one frame
    AppendMessageThread = 0x0113,

    /// A user came online
    UserIsOnline = 0x0200,
    /// A user went offline
    UserIsOffline = 0x0201,
    /// Snapshot of online users, sent to a new presence connection
    GetOnlineUsers = 0x0202,
    /// Alert for a message in a conversation the user is not viewing
    NewMessageReceived = 0x0203,

    /// Error response
    Error = 0xFFFF,
}

impl Opcode {
    /// Raw wire value.
    #[must_use]
    pub const fn to_u16(self) -> u16 {
        self as u16
    }

    /// Parse a raw wire value. `None` if unrecognized.
    #[must_use]
    pub const fn from_u16(value: u16) -> Option<Self> {
        Some(match value {
            0x0001 => Self::Hello,
            0x0002 => Self::HelloReply,
            0x0003 => Self::Goodbye,
            0x0004 => Self::Ping,
            0x0005 => Self::Pong,
            0x0100 => Self::SendMessage,
            0x0101 => Self::DeleteMessage,
            0x0110 => Self::UpdatedGroup,
            0x0111 => Self::ReceiveMessageThread,
            0x0112 => Self::NewMessage,
            0x0113 => Self::AppendMessageThread,
            0x0200 => Self::UserIsOnline,
            0x0201 => Self::UserIsOffline,
            0x0202 => Self::GetOnlineUsers,
            0x0203 => Self::NewMessageReceived,
            0xFFFF => Self::Error,
            _ => return None,
        })
    }

    /// Whether frames with this opcode travel on the presence surface.
    #[must_use]
    pub const fn is_presence(self) -> bool {
        matches!(
            self,
            Self::UserIsOnline | Self::UserIsOffline | Self::GetOnlineUsers | Self::NewMessageReceived
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [Opcode; 16] = [
        Opcode::Hello,
        Opcode::HelloReply,
        Opcode::Goodbye,
        Opcode::Ping,
        Opcode::Pong,
        Opcode::SendMessage,
        Opcode::DeleteMessage,
        Opcode::UpdatedGroup,
        Opcode::ReceiveMessageThread,
        Opcode::NewMessage,
        Opcode::AppendMessageThread,
        Opcode::UserIsOnline,
        Opcode::UserIsOffline,
        Opcode::GetOnlineUsers,
        Opcode::NewMessageReceived,
        Opcode::Error,
    ];

    #[test]
    fn every_opcode_parses_back() {
        for opcode in ALL {
            assert_eq!(Opcode::from_u16(opcode.to_u16()), Some(opcode));
        }
    }

    #[test]
    fn unknown_values_are_rejected() {
        assert_eq!(Opcode::from_u16(0x0000), None);
        assert_eq!(Opcode::from_u16(0x0006), None);
        assert_eq!(Opcode::from_u16(0x0300), None);
    }

    #[test]
    fn presence_surface_opcodes() {
        assert!(Opcode::NewMessageReceived.is_presence());
        assert!(Opcode::GetOnlineUsers.is_presence());
        assert!(!Opcode::NewMessage.is_presence());
        assert!(!Opcode::UpdatedGroup.is_presence());
    }
}
