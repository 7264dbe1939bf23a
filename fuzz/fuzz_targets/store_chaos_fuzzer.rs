//! Fuzz target for message storage under injected failures.
//!
//! Runs arbitrary sends and deletes against a `ChaoticStore` over a
//! `MemoryStore`. Every call either commits fully or not at all.
//!
//! # Invariants
//!
//! - Store calls never panic, whatever the failure rate
//! - Assigned message ids strictly increase
//! - A message a user deleted never shows in that user's thread
//! - A message both sides deleted is gone from the store

#![no_main]

use arbitrary::Arbitrary;
use duet_core::{Message, UserName, UserRecord};
use duet_server::{ChaoticStore, ConversationStore, DeleteOutcome, MemoryStore};
use libfuzzer_sys::fuzz_target;

const USERS: [&str; 3] = ["alice", "bob", "carol"];

#[derive(Debug, Clone, Arbitrary)]
struct Scenario {
    chaos_seed: u64,
    /// 0-9 maps to 0%-90%
    failure_rate_tenth: u8,
    ops: Vec<Op>,
}

#[derive(Debug, Clone, Arbitrary)]
enum Op {
    Send { from: u8, to: u8 },
    Delete { nth: u8, by: u8 },
    Thread { viewer: u8, other: u8 },
}

fn record(i: u8) -> Option<UserRecord> {
    let name = USERS[usize::from(i) % USERS.len()];
    UserName::new(name).ok().map(|username| UserRecord::new(username, name))
}

fuzz_target!(|scenario: Scenario| {
    let failure_rate = f64::from(scenario.failure_rate_tenth % 10) / 10.0;
    let store = ChaoticStore::with_seed(MemoryStore::new(), failure_rate, scenario.chaos_seed);

    let mut saved: Vec<u64> = Vec::new();
    let mut clock = 0u64;

    for op in scenario.ops {
        clock += 1;
        match op {
            Op::Send { from, to } => {
                let (Some(sender), Some(recipient)) = (record(from), record(to)) else { continue };
                if sender.username == recipient.username {
                    continue;
                }
                let message = Message::compose(&sender, &recipient, "fuzz", clock);
                if let Ok(stored) = store.add_message(&message) {
                    if let Some(&last) = saved.last() {
                        assert!(stored.id > last);
                    }
                    saved.push(stored.id);
                }
            },
            Op::Delete { nth, by } => {
                let (Some(&id), Some(by)) = (saved.get(usize::from(nth)), record(by)) else {
                    continue;
                };
                match store.delete_message(id, &by.username) {
                    Ok(DeleteOutcome::Purged(_)) => {
                        assert!(store.inner().message(id).ok().flatten().is_none());
                    },
                    Ok(DeleteOutcome::Hidden(message)) => {
                        assert!(!message.is_visible_to(&by.username));
                    },
                    Err(_) => {},
                }
            },
            Op::Thread { viewer, other } => {
                let (Some(viewer), Some(other)) = (record(viewer), record(other)) else { continue };
                if let Ok(thread) = store.message_thread(&viewer.username, &other.username) {
                    assert!(thread.iter().all(|m| m.is_visible_to(&viewer.username)));
                    assert!(thread.windows(2).all(|w| w[0].id < w[1].id));
                }
            },
        }
    }
});
