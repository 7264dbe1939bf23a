//! Fuzz target for `Frame::decode`.
//!
//! Arbitrary bytes must decode or fail with a `ProtocolError`, never panic.

#![no_main]

use duet_proto::Frame;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(frame) = Frame::decode(data) {
        assert_eq!(frame.payload.len(), frame.header.payload_size() as usize);
    }
});
