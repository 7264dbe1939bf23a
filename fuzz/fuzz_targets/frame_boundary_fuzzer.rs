//! Fuzz target for frame header boundary conditions.
//!
//! # Strategy
//!
//! - Magic: valid, off-by-one, all-zeros, all-ones, random
//! - Version: valid, zero, max, random
//! - Payload size: zero, small, at the limit, just over, way over, `u32::MAX`
//!
//! # Invariants
//!
//! - A frame only decodes with the `DUET` magic, version 1 and a payload
//!   size within `FrameHeader::MAX_PAYLOAD_SIZE`
//! - Encoded size is always `FrameHeader::SIZE + payload.len()`
//! - The request id survives encode and decode

#![no_main]

use arbitrary::Arbitrary;
use duet_proto::{Frame, FrameHeader, Opcode};
use libfuzzer_sys::fuzz_target;

const MAGIC: [u8; 4] = FrameHeader::MAGIC.to_be_bytes();
const MAX_PAYLOAD_SIZE: u32 = FrameHeader::MAX_PAYLOAD_SIZE;

#[derive(Debug, Clone, Arbitrary)]
struct BoundaryFrame {
    magic: MagicBytes,
    version: VersionByte,
    opcode: u16,
    request_id: u32,
    payload_size: PayloadSize,
}

#[derive(Debug, Clone, Arbitrary)]
enum MagicBytes {
    Valid,
    OffByOne(u8),
    AllZeros,
    AllOnes,
    Random([u8; 4]),
}

#[derive(Debug, Clone, Arbitrary)]
enum VersionByte {
    Valid,
    Zero,
    Max,
    Random(u8),
}

#[derive(Debug, Clone, Arbitrary)]
enum PayloadSize {
    Zero,
    Small(u8),
    AtMax,
    JustOverMax,
    WayOverMax,
    MaxU32,
    Random(u32),
}

fuzz_target!(|boundary: BoundaryFrame| {
    let claimed = match boundary.payload_size {
        PayloadSize::Zero => 0,
        PayloadSize::Small(s) => u32::from(s),
        PayloadSize::AtMax => MAX_PAYLOAD_SIZE,
        PayloadSize::JustOverMax => MAX_PAYLOAD_SIZE.saturating_add(1),
        PayloadSize::WayOverMax => MAX_PAYLOAD_SIZE.saturating_add(1_000_000),
        PayloadSize::MaxU32 => u32::MAX,
        PayloadSize::Random(r) => r,
    };

    let body_len = claimed.min(100_000) as usize;
    let mut buffer = vec![0u8; FrameHeader::SIZE + body_len];

    match boundary.magic {
        MagicBytes::Valid => buffer[0..4].copy_from_slice(&MAGIC),
        MagicBytes::OffByOne(offset) => {
            buffer[0..4].copy_from_slice(&MAGIC);
            let idx = usize::from(offset % 4);
            buffer[idx] = buffer[idx].wrapping_add(1);
        },
        MagicBytes::AllZeros => buffer[0..4].fill(0),
        MagicBytes::AllOnes => buffer[0..4].fill(0xFF),
        MagicBytes::Random(bytes) => buffer[0..4].copy_from_slice(&bytes),
    }

    buffer[4] = match boundary.version {
        VersionByte::Valid => FrameHeader::VERSION,
        VersionByte::Zero => 0,
        VersionByte::Max => u8::MAX,
        VersionByte::Random(v) => v,
    };
    buffer[6..8].copy_from_slice(&boundary.opcode.to_be_bytes());
    buffer[8..12].copy_from_slice(&boundary.request_id.to_be_bytes());
    buffer[12..16].copy_from_slice(&claimed.to_be_bytes());

    if let Ok(frame) = Frame::decode(&buffer) {
        assert_eq!(buffer[0..4], MAGIC);
        assert_eq!(buffer[4], FrameHeader::VERSION);
        assert!(claimed <= MAX_PAYLOAD_SIZE);
        assert_eq!(frame.header.request_id(), boundary.request_id);
        assert_eq!(frame.header.opcode(), boundary.opcode);
    }

    let Some(opcode) = Opcode::from_u16(boundary.opcode) else {
        return;
    };

    let mut header = FrameHeader::new(opcode);
    header.set_request_id(boundary.request_id);
    let frame = Frame::new(header, vec![0xAA; body_len.min(1000)]);

    let mut encoded = Vec::new();
    if frame.encode(&mut encoded).is_err() {
        return;
    }
    assert_eq!(encoded.len(), FrameHeader::SIZE + frame.payload.len());

    let decoded = Frame::decode(&encoded).expect("encoded frame must decode");
    assert_eq!(decoded.header.request_id(), boundary.request_id);
    assert_eq!(decoded.payload, frame.payload);
});
