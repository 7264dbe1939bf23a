//! Hub behavior over a fault-injecting store.
//!
//! Whatever fails, a broadcast must only ever describe committed state.

use duet_core::{SessionState, UserName};
use duet_harness::HubFixture;
use duet_proto::{ErrorPayload, Payload};
use duet_server::{ChaoticStore, ConversationStore, MemoryStore};
use proptest::prelude::*;

fn name(raw: &str) -> UserName {
    UserName::new(raw).unwrap()
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap()
}

#[test]
fn prop_no_broadcast_without_commit() {
    proptest!(ProptestConfig::with_cases(64), |(
        failure_rate in 0.0..0.6,
        seed in any::<u64>(),
        sends in 1usize..30,
    )| {
        runtime().block_on(async {
            let store = ChaoticStore::with_seed(MemoryStore::new(), failure_rate, seed);
            let mut fx = HubFixture::with_store(store);

            let _bob = fx.presence("bob").await.unwrap();
            let mut alice = fx.conversation("alice", "bob").await.unwrap();
            if alice.state() != SessionState::Joined {
                return Ok(());
            }
            fx.notifier().clear();

            for i in 0..sends {
                fx.send(&mut alice, "bob", &format!("m{i}")).await.unwrap();
            }

            let committed: Vec<u64> = fx
                .store()
                .inner()
                .message_thread(&name("alice"), &name("bob"))
                .unwrap()
                .iter()
                .map(|m| m.id)
                .collect();

            let broadcast: Vec<u64> = fx
                .notifier()
                .payloads_for(alice.connection_id())
                .into_iter()
                .filter_map(|p| match p {
                    Payload::NewMessage(m) => Some(m.id),
                    _ => None,
                })
                .collect();

            prop_assert_eq!(&broadcast, &committed);

            let failed_sends = fx
                .notifier()
                .payloads_for(alice.connection_id())
                .into_iter()
                .filter(|p| matches!(p, Payload::Error(_)))
                .count();
            prop_assert_eq!(committed.len() + failed_sends, sends);

            Ok(())
        })?;
    });
}

#[test]
fn prop_join_failure_leaves_no_membership() {
    proptest!(|(seed in any::<u64>())| {
        runtime().block_on(async {
            let store = ChaoticStore::with_seed(MemoryStore::new(), 0.5, seed);
            let mut fx = HubFixture::with_store(store);

            let alice = fx.conversation("alice", "bob").await.unwrap();
            let member = fx
                .store()
                .inner()
                .group_for_connection(alice.connection_id())
                .unwrap()
                .is_some();

            let join_error = fx
                .notifier()
                .payloads_for(alice.connection_id())
                .contains(&Payload::Error(ErrorPayload::join_failed()));

            if join_error {
                prop_assert!(!member);
                prop_assert_eq!(alice.state(), SessionState::Closed);
            }
            if alice.state() == SessionState::Joined {
                prop_assert!(member);
            }

            Ok(())
        })?;
    });
}
