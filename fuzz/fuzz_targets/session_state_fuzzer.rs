//! Fuzz target for the session state machine.
//!
//! Drives a `Session` through arbitrary hellos, hub transitions and clock
//! advances.
//!
//! # Invariants
//!
//! - `Closed` is terminal
//! - Only a `Handshake` session accepts `Hello`
//! - An attached session always carries an identity, and conversation
//!   sessions always carry a group
//! - A conversation peer is never the caller
//! - Only attached sessions send heartbeats

#![no_main]

use std::time::{Duration, Instant};

use arbitrary::Arbitrary;
use duet_core::{
    Attachment, ConnectionId, Session, SessionAction, SessionConfig, SessionState,
    session::PROTOCOL_VERSION,
};
use duet_proto::{
    Opcode,
    payloads::session::{Hello, Surface},
};
use libfuzzer_sys::fuzz_target;

const NAMES: [&str; 5] = ["alice", "Alice ", "bob", "", "carol"];

#[derive(Debug, Clone, Arbitrary)]
enum Op {
    Hello { version_ok: bool, user: u8, with: Option<u8> },
    Joined,
    JoinFailed,
    BeginSend,
    FinishSend,
    BeginLeave,
    Left,
    Touch,
    Advance { secs: u8 },
    Tick,
}

fuzz_target!(|ops: Vec<Op>| {
    let start = Instant::now();
    let mut now = start;
    let mut session = Session::new(ConnectionId::new(1), now, SessionConfig::default());

    for op in ops {
        let before = session.state();

        match op {
            Op::Hello { version_ok, user, with } => {
                let hello = Hello {
                    version: if version_ok { PROTOCOL_VERSION } else { PROTOCOL_VERSION + 1 },
                    username: NAMES[usize::from(user) % NAMES.len()].into(),
                    known_as: None,
                    surface: match with {
                        Some(i) => Surface::Conversation { with: NAMES[usize::from(i) % NAMES.len()].into() },
                        None => Surface::Presence,
                    },
                };
                match session.accept_hello(&hello, now) {
                    Ok(attachment) => {
                        assert_eq!(before, SessionState::Handshake);
                        assert!(session.user().is_some());
                        if let Attachment::Conversation { peer, .. } = &attachment {
                            assert_ne!(Some(peer), session.user().map(|u| &u.username));
                            assert!(session.group().is_some());
                        }
                    },
                    Err(_) => assert_eq!(session.state(), before),
                }
            },
            Op::Joined => {
                if session.joined().is_ok() {
                    assert_eq!(before, SessionState::Joining);
                }
            },
            Op::JoinFailed => {
                if before == SessionState::Joining {
                    session.join_failed();
                    assert_eq!(session.state(), SessionState::Closed);
                }
            },
            Op::BeginSend => {
                if session.begin_send().is_ok() {
                    assert_eq!(before, SessionState::Joined);
                }
            },
            Op::FinishSend => session.finish_send(),
            Op::BeginLeave => {
                if session.begin_leave().is_ok() {
                    assert!(!matches!(before, SessionState::Leaving | SessionState::Closed));
                    assert_eq!(session.state(), SessionState::Leaving);
                }
            },
            Op::Left => {
                if before == SessionState::Leaving {
                    session.left();
                }
            },
            Op::Touch => session.touch(now),
            Op::Advance { secs } => now += Duration::from_secs(u64::from(secs)),
            Op::Tick => {
                for action in session.tick(now) {
                    if let SessionAction::SendFrame(frame) = action {
                        assert!(matches!(before, SessionState::Presence | SessionState::Joined));
                        assert_eq!(frame.header.opcode_enum(), Some(Opcode::Ping));
                    }
                }
            },
        }

        if before == SessionState::Closed {
            assert_eq!(session.state(), SessionState::Closed);
        }
        if matches!(
            session.state(),
            SessionState::Presence | SessionState::Joining | SessionState::Joined | SessionState::Sending
        ) {
            assert!(session.user().is_some());
        }
    }
});
