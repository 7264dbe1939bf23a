//! Fuzz target for `Payload::from_frame`.
//!
//! Feeds the same bytes as the body of every opcode, so malformed CBOR and
//! bodies meant for another opcode are both covered. Decoding must never
//! panic, and whatever decodes must re-encode.

#![no_main]

use bytes::Bytes;
use duet_proto::{Frame, FrameHeader, Opcode, Payload};
use libfuzzer_sys::fuzz_target;

const OPCODES: [Opcode; 16] = [
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

fuzz_target!(|data: &[u8]| {
    for opcode in OPCODES {
        let frame = Frame::new(FrameHeader::new(opcode), Bytes::copy_from_slice(data));

        if let Ok(payload) = Payload::from_frame(&frame) {
            assert_eq!(payload.opcode(), opcode);
            let _ = payload.to_frame();
        }
    }
});
