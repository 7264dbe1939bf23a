//! CBOR-encoded protocol messages.
//!
//! The payload type is determined by the `Opcode` in the frame header, so only
//! the inner value is serialized (no variant tag in CBOR). Each variant maps to
//! exactly one opcode, enforced by exhaustive matches.

pub mod hub;
pub mod presence;
pub mod session;

use bytes::BufMut;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{
    Frame, FrameHeader, Opcode,
    errors::{ProtocolError, Result},
};

/// All possible frame payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    // Session
    /// Opening handshake
    Hello(session::Hello),
    /// Handshake acknowledgement
    HelloReply(session::HelloReply),
    /// Graceful disconnect
    Goodbye,
    /// Keepalive
    Ping,
    /// Keepalive response
    Pong,

    // Conversation surface
    /// Send a message to the other participant
    SendMessage(hub::SendMessage),
    /// Delete a message on the caller's side
    DeleteMessage(hub::DeleteMessage),
    /// Membership of the caller's conversation group changed
    UpdatedGroup(hub::GroupDto),
    /// Thread for the caller, replacing whatever it showed before
    ReceiveMessageThread(Vec<hub::MessageDto>),
    /// A message was persisted in the conversation
    NewMessage(hub::MessageDto),
    /// Later messages of a thread that did not fit in one frame
    AppendMessageThread(Vec<hub::MessageDto>),

    // Presence surface
    /// A user came online
    UserIsOnline(String),
    /// A user went offline
    UserIsOffline(String),
    /// Users currently online
    GetOnlineUsers(Vec<String>),
    /// New message in a conversation the user is not viewing
    NewMessageReceived(presence::NewMessageReceived),

    /// Error response
    Error(ErrorPayload),
}

/// Error payload for error frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Error code identifying the type of error.
    pub code: u16,
    /// Human-readable error message.
    pub message: String,
}

impl ErrorPayload {
    /// Sender and recipient are the same identity.
    pub const CANNOT_MESSAGE_SELF: u16 = 0x0001;
    /// Recipient identity does not resolve.
    pub const RECIPIENT_NOT_FOUND: u16 = 0x0002;
    /// Joining the conversation group could not be committed.
    pub const JOIN_FAILED: u16 = 0x0003;
    /// A message or membership change could not be committed.
    pub const PERSISTENCE_FAILED: u16 = 0x0004;
    /// Frame is not valid in the session's current state.
    pub const PROTOCOL_VIOLATION: u16 = 0x0005;
    /// Payload could not be decoded or failed validation.
    pub const INVALID_PAYLOAD: u16 = 0x0006;
    /// Server-side fault.
    pub const INTERNAL: u16 = 0x0007;

    /// Create an error payload with an explicit code.
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }

    /// Self-messaging rejected.
    pub fn cannot_message_self() -> Self {
        Self::new(Self::CANNOT_MESSAGE_SELF, "you cannot send messages to yourself")
    }

    /// Recipient not found.
    pub fn recipient_not_found(username: &str) -> Self {
        Self::new(Self::RECIPIENT_NOT_FOUND, format!("recipient not found: {username}"))
    }

    /// Group join failed.
    pub fn join_failed() -> Self {
        Self::new(Self::JOIN_FAILED, "failed to join group")
    }

    /// Invalid payload.
    pub fn invalid_payload(msg: impl Into<String>) -> Self {
        Self::new(Self::INVALID_PAYLOAD, msg)
    }

    /// Protocol violation.
    pub fn protocol_violation(msg: impl Into<String>) -> Self {
        Self::new(Self::PROTOCOL_VIOLATION, msg)
    }
}

/// Split a thread into frames that each fit the payload limit.
///
/// The first frame is `ReceiveMessageThread`, any further ones are
/// `AppendMessageThread`, in thread order. An empty thread is one empty
/// `ReceiveMessageThread`.
///
/// # Errors
///
/// - `ProtocolError::PayloadTooLarge` if a single message cannot fit a frame
/// - `ProtocolError::CborEncode` if serialization fails
pub fn thread_frames(messages: Vec<hub::MessageDto>) -> Result<Vec<Frame>> {
    // Upper bound on the CBOR array header.
    const ARRAY_HEADER: usize = 9;
    let budget = FrameHeader::MAX_PAYLOAD_SIZE as usize - ARRAY_HEADER;

    let mut chunks: Vec<Vec<hub::MessageDto>> = Vec::new();
    let mut current = Vec::new();
    let mut used = 0;
    let mut scratch = Vec::new();

    for message in messages {
        scratch.clear();
        to_cbor(&message, &mut scratch)?;
        let size = scratch.len();
        if size > budget {
            return Err(ProtocolError::PayloadTooLarge { size, max: budget });
        }
        if used + size > budget {
            chunks.push(std::mem::take(&mut current));
            used = 0;
        }
        used += size;
        current.push(message);
    }
    chunks.push(current);

    chunks
        .into_iter()
        .enumerate()
        .map(|(i, chunk)| {
            let payload = if i == 0 {
                Payload::ReceiveMessageThread(chunk)
            } else {
                Payload::AppendMessageThread(chunk)
            };
            payload.to_frame()
        })
        .collect()
}

fn check_size(size: usize) -> Result<()> {
    let max = FrameHeader::MAX_PAYLOAD_SIZE as usize;
    if size > max {
        return Err(ProtocolError::PayloadTooLarge { size, max });
    }
    Ok(())
}

fn to_cbor<T: Serialize>(value: &T, dst: &mut impl BufMut) -> Result<()> {
    ciborium::ser::into_writer(value, dst.writer())
        .map_err(|e| ProtocolError::CborEncode(e.to_string()))
}

fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    ciborium::de::from_reader(bytes).map_err(|e| ProtocolError::CborDecode(e.to_string()))
}

impl Payload {
    /// Opcode corresponding to this payload type.
    #[must_use]
    pub const fn opcode(&self) -> Opcode {
        match self {
            Self::Hello(_) => Opcode::Hello,
            Self::HelloReply(_) => Opcode::HelloReply,
            Self::Goodbye => Opcode::Goodbye,
            Self::Ping => Opcode::Ping,
            Self::Pong => Opcode::Pong,
            Self::SendMessage(_) => Opcode::SendMessage,
            Self::DeleteMessage(_) => Opcode::DeleteMessage,
            Self::UpdatedGroup(_) => Opcode::UpdatedGroup,
            Self::ReceiveMessageThread(_) => Opcode::ReceiveMessageThread,
            Self::NewMessage(_) => Opcode::NewMessage,
            Self::AppendMessageThread(_) => Opcode::AppendMessageThread,
            Self::UserIsOnline(_) => Opcode::UserIsOnline,
            Self::UserIsOffline(_) => Opcode::UserIsOffline,
            Self::GetOnlineUsers(_) => Opcode::GetOnlineUsers,
            Self::NewMessageReceived(_) => Opcode::NewMessageReceived,
            Self::Error(_) => Opcode::Error,
        }
    }

    /// Encode the inner value to CBOR. Zero-byte payloads write nothing.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::CborEncode` if serialization fails
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        match self {
            Self::Goodbye | Self::Ping | Self::Pong => Ok(()),
            Self::Hello(inner) => to_cbor(inner, dst),
            Self::HelloReply(inner) => to_cbor(inner, dst),
            Self::SendMessage(inner) => to_cbor(inner, dst),
            Self::DeleteMessage(inner) => to_cbor(inner, dst),
            Self::UpdatedGroup(inner) => to_cbor(inner, dst),
            Self::ReceiveMessageThread(inner) | Self::AppendMessageThread(inner) => {
                to_cbor(inner, dst)
            },
            Self::NewMessage(inner) => to_cbor(inner, dst),
            Self::UserIsOnline(inner) | Self::UserIsOffline(inner) => to_cbor(inner, dst),
            Self::GetOnlineUsers(inner) => to_cbor(inner, dst),
            Self::NewMessageReceived(inner) => to_cbor(inner, dst),
            Self::Error(inner) => to_cbor(inner, dst),
        }
    }

    /// Decode payload bytes for the given opcode.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::PayloadTooLarge` if bytes exceed the protocol maximum
    /// - `ProtocolError::CborDecode` if CBOR deserialization fails
    pub fn decode(opcode: Opcode, bytes: &[u8]) -> Result<Self> {
        check_size(bytes.len())?;

        Ok(match opcode {
            Opcode::Hello => Self::Hello(from_cbor(bytes)?),
            Opcode::HelloReply => Self::HelloReply(from_cbor(bytes)?),
            Opcode::Goodbye => Self::Goodbye,
            Opcode::Ping => Self::Ping,
            Opcode::Pong => Self::Pong,
            Opcode::SendMessage => Self::SendMessage(from_cbor(bytes)?),
            Opcode::DeleteMessage => Self::DeleteMessage(from_cbor(bytes)?),
            Opcode::UpdatedGroup => Self::UpdatedGroup(from_cbor(bytes)?),
            Opcode::ReceiveMessageThread => Self::ReceiveMessageThread(from_cbor(bytes)?),
            Opcode::NewMessage => Self::NewMessage(from_cbor(bytes)?),
            Opcode::AppendMessageThread => Self::AppendMessageThread(from_cbor(bytes)?),
            Opcode::UserIsOnline => Self::UserIsOnline(from_cbor(bytes)?),
            Opcode::UserIsOffline => Self::UserIsOffline(from_cbor(bytes)?),
            Opcode::GetOnlineUsers => Self::GetOnlineUsers(from_cbor(bytes)?),
            Opcode::NewMessageReceived => Self::NewMessageReceived(from_cbor(bytes)?),
            Opcode::Error => Self::Error(from_cbor(bytes)?),
        })
    }

    /// Convert payload into a transport frame.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::CborEncode` if serialization fails
    /// - `ProtocolError::PayloadTooLarge` if the body exceeds
    ///   [`FrameHeader::MAX_PAYLOAD_SIZE`]
    pub fn into_frame(self, mut header: FrameHeader) -> Result<Frame> {
        let mut buf = Vec::new();
        self.encode(&mut buf)?;
        check_size(buf.len())?;
        header.opcode = self.opcode().to_u16().to_be_bytes();
        Ok(Frame::new(header, buf))
    }

    /// Convert payload into a frame with a fresh header.
    ///
    /// # Errors
    ///
    /// Same as [`Payload::into_frame`].
    pub fn to_frame(&self) -> Result<Frame> {
        self.clone().into_frame(FrameHeader::new(self.opcode()))
    }

    /// Parse payload from a raw transport frame.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::UnknownOpcode` if the header opcode is not recognized
    /// - Any error from [`Payload::decode`]
    pub fn from_frame(frame: &Frame) -> Result<Self> {
        let opcode = frame
            .header
            .opcode_enum()
            .ok_or(ProtocolError::UnknownOpcode(frame.header.opcode()))?;
        Self::decode(opcode, &frame.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn through_frame(payload: &Payload) -> Payload {
        let frame = payload.to_frame().expect("should create frame");
        let wire = frame.to_vec().expect("should encode");
        let decoded = Frame::decode(&wire).expect("should decode frame");
        Payload::from_frame(&decoded).expect("should parse payload")
    }

    #[test]
    fn hello_with_conversation_surface() {
        let payload = Payload::Hello(session::Hello {
            version: 1,
            username: "alice".to_string(),
            known_as: Some("Alice".to_string()),
            surface: session::Surface::Conversation { with: "bob".to_string() },
        });

        assert_eq!(through_frame(&payload), payload);
    }

    #[test]
    fn thread_with_unread_message() {
        let payload = Payload::ReceiveMessageThread(vec![hub::MessageDto {
            id: 7,
            sender_username: "bob".to_string(),
            sender_known_as: "Bob".to_string(),
            recipient_username: "alice".to_string(),
            recipient_known_as: "Alice".to_string(),
            content: "you there?".to_string(),
            message_sent: 1_700_000_000_000,
            date_read: None,
        }]);

        assert_eq!(through_frame(&payload), payload);
    }

    fn long_message(id: u64) -> hub::MessageDto {
        hub::MessageDto {
            id,
            sender_username: "alice".to_string(),
            sender_known_as: "Alice".to_string(),
            recipient_username: "bob".to_string(),
            recipient_known_as: "Bob".to_string(),
            content: "x".repeat(4000),
            message_sent: 1_700_000_000_000 + id,
            date_read: None,
        }
    }

    #[test]
    fn oversized_payload_is_rejected_when_framed() {
        let thread = (0..300).map(long_message).collect();
        let result = Payload::ReceiveMessageThread(thread).to_frame();
        assert!(matches!(result, Err(ProtocolError::PayloadTooLarge { .. })));
    }

    #[test]
    fn large_thread_splits_into_frames_that_fit() {
        let thread: Vec<_> = (0..300).map(long_message).collect();
        let frames = thread_frames(thread.clone()).expect("should split");
        assert!(frames.len() > 1);

        let mut received = Vec::new();
        for (i, frame) in frames.iter().enumerate() {
            let wire = frame.to_vec().expect("every chunk fits the limit");
            let decoded = Frame::decode(&wire).expect("should decode frame");
            match Payload::from_frame(&decoded).expect("should parse payload") {
                Payload::ReceiveMessageThread(chunk) if i == 0 => received.extend(chunk),
                Payload::AppendMessageThread(chunk) if i > 0 => received.extend(chunk),
                other => panic!("unexpected chunk {i}: {:?}", other.opcode()),
            }
        }
        assert_eq!(received, thread);
    }

    #[test]
    fn small_thread_is_one_frame() {
        let frames = thread_frames(vec![long_message(1)]).expect("should split");
        assert_eq!(frames.len(), 1);

        let empty = thread_frames(Vec::new()).expect("should split");
        assert_eq!(
            Payload::from_frame(&empty[0]).expect("should parse"),
            Payload::ReceiveMessageThread(Vec::new())
        );
        assert_eq!(empty.len(), 1);
    }

    #[test]
    fn zero_byte_payloads_have_empty_body() {
        for payload in [Payload::Ping, Payload::Pong, Payload::Goodbye] {
            let frame = payload.to_frame().expect("should create frame");
            assert!(frame.payload.is_empty());
            assert_eq!(Payload::from_frame(&frame).expect("should parse"), payload);
        }
    }

    #[test]
    fn error_payload_keeps_code() {
        let payload = Payload::Error(ErrorPayload::recipient_not_found("nobody"));
        match through_frame(&payload) {
            Payload::Error(err) => {
                assert_eq!(err.code, ErrorPayload::RECIPIENT_NOT_FOUND);
                assert!(err.message.contains("nobody"));
            },
            other => panic!("expected error payload, got {other:?}"),
        }
    }

    #[test]
    fn unknown_opcode_is_rejected() {
        let mut wire = Payload::Ping.to_frame().expect("frame").to_vec().expect("encode");
        wire[6..8].copy_from_slice(&0x0999u16.to_be_bytes());

        let frame = Frame::decode(&wire).expect("header is still valid");
        assert_eq!(Payload::from_frame(&frame), Err(ProtocolError::UnknownOpcode(0x0999)));
    }

    #[test]
    fn garbage_body_fails_to_decode() {
        let result = Payload::decode(Opcode::SendMessage, &[0xFF, 0x00, 0x13]);
        assert!(matches!(result, Err(ProtocolError::CborDecode(_))));
    }
}
