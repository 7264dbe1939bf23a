//! Store invariants under injected failures.
//!
//! Every store call either commits fully or not at all, so whatever subset of
//! calls fails, the inner store must stay consistent:
//! - group membership and the connection -> group index agree
//! - message ids are unique and increasing, and every successful add is
//!   visible in the thread

use duet_core::{Connection, ConnectionId, Message, UserName, UserRecord, group_name};
use duet_server::storage::{ChaoticStore, ConversationStore, MemoryStore, RedbStore};
use proptest::prelude::*;
use tempfile::tempdir;

const GROUPS: [&str; 3] = ["g0", "g1", "g2"];
const CONNECTIONS: u64 = 8;

#[derive(Debug, Clone)]
enum Op {
    Join { connection: u64, group: usize },
    Leave { connection: u64 },
    ClearAll,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        6 => (0..CONNECTIONS, 0..GROUPS.len()).prop_map(|(connection, group)| Op::Join { connection, group }),
        4 => (0..CONNECTIONS).prop_map(|connection| Op::Leave { connection }),
        1 => Just(Op::ClearAll),
    ]
}

fn user(name: &str) -> UserName {
    UserName::new(name).unwrap()
}

fn apply(store: &impl ConversationStore, op: &Op) {
    match *op {
        Op::Join { connection, group } => {
            let member = Connection::new(ConnectionId::new(connection), user(&format!("u{connection}")));
            let _ = store.join_group(GROUPS[group], &member);
        },
        Op::Leave { connection } => {
            let id = ConnectionId::new(connection);
            if let Ok(Some(group)) = store.group_for_connection(id) {
                let _ = store.leave_group(&group.name, id);
            }
        },
        Op::ClearAll => {
            let _ = store.clear_connections();
        },
    }
}

fn assert_membership_consistent(store: &impl ConversationStore) -> Result<(), TestCaseError> {
    for name in GROUPS {
        let Some(group) = store.group(name).unwrap() else { continue };
        for id in group.connection_ids() {
            let indexed = store.group_for_connection(id).unwrap();
            prop_assert_eq!(indexed.map(|g| g.name), Some(name.to_string()));
        }
    }

    for connection in 0..CONNECTIONS {
        let id = ConnectionId::new(connection);
        if let Some(group) = store.group_for_connection(id).unwrap() {
            prop_assert!(group.contains_connection(id));
        }
    }

    Ok(())
}

#[test]
fn prop_memory_membership_survives_chaos() {
    proptest!(|(
        failure_rate in 0.0..0.7,
        seed in any::<u64>(),
        ops in prop::collection::vec(op(), 1..60),
    )| {
        let store = ChaoticStore::with_seed(MemoryStore::new(), failure_rate, seed);
        for op in &ops {
            apply(&store, op);
        }
        assert_membership_consistent(store.inner())?;
    });
}

#[test]
fn prop_redb_membership_survives_chaos() {
    proptest!(ProptestConfig::with_cases(16), |(
        failure_rate in 0.0..0.7,
        seed in any::<u64>(),
        ops in prop::collection::vec(op(), 1..30),
    )| {
        let dir = tempdir().unwrap();
        let store = ChaoticStore::with_seed(RedbStore::open(dir.path().join("chaos.redb")).unwrap(), failure_rate, seed);
        for op in &ops {
            apply(&store, op);
        }
        assert_membership_consistent(store.inner())?;
    });
}

#[test]
fn prop_message_ids_unique_under_chaos() {
    proptest!(|(
        failure_rate in 0.0..0.8,
        seed in any::<u64>(),
        count in 1usize..50,
    )| {
        let store = ChaoticStore::with_seed(MemoryStore::new(), failure_rate, seed);
        let alice = UserRecord::new(user("alice"), "Alice");
        let bob = UserRecord::new(user("bob"), "Bob");

        let mut saved = Vec::new();
        for i in 0..count {
            let message = Message::compose(&alice, &bob, format!("m{i}"), i as u64);
            if let Ok(message) = store.add_message(&message) {
                saved.push(message.id);
            }
        }

        prop_assert!(saved.windows(2).all(|w| w[0] < w[1]));

        let thread: Vec<u64> = store
            .inner()
            .message_thread(&alice.username, &bob.username)
            .unwrap()
            .iter()
            .map(|m| m.id)
            .collect();
        prop_assert_eq!(thread, saved);
        prop_assert_eq!(store.inner().message_count().unwrap(), store.operation_count() - store.injected_failures());
    });
}

#[test]
fn group_names_from_the_store_are_symmetric() {
    let store = MemoryStore::new();
    let a = user("alice");
    let b = user("bob");

    let forward = store.get_or_create_group(&group_name(&a, &b)).unwrap();
    let backward = store.get_or_create_group(&group_name(&b, &a)).unwrap();

    assert_eq!(forward, backward);
    assert_eq!(store.group_count().unwrap(), 1);
}
