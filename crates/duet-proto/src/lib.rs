//! Duet wire protocol.
//!
//! Every message exchanged between a client and the hub is a [`Frame`]: a
//! fixed 16-byte binary [`FrameHeader`] followed by a CBOR-encoded payload.
//! The header carries the [`Opcode`] so the runtime can dispatch without
//! decoding the payload; [`Payload`] is the typed view of the body.
//!
//! Two logical surfaces share the same framing:
//!
//! - Conversation surface: `SendMessage`, `DeleteMessage` from the client;
//!   `UpdatedGroup`, `ReceiveMessageThread` (continued by
//!   `AppendMessageThread` when large), `NewMessage` from the hub.
//! - Presence surface: `UserIsOnline`, `UserIsOffline`, `GetOnlineUsers` and
//!   the out-of-band `NewMessageReceived` alert.
//!
//! Which surface a connection belongs to is decided by its opening `Hello`.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod errors;
mod frame;
mod header;
mod opcode;
pub mod payloads;

pub use errors::{ProtocolError, Result};
pub use frame::Frame;
pub use header::FrameHeader;
pub use opcode::Opcode;
pub use payloads::{ErrorPayload, Payload};

/// ALPN protocol identifier negotiated during the QUIC handshake.
pub const ALPN_PROTOCOL: &[u8] = b"duet/1";
