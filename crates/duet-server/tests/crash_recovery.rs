//! redb durability across process restarts.
//!
//! Each test writes through one `RedbStore`, drops it, and reopens the same
//! file as a restarted server would.

use duet_core::{Connection, ConnectionId, Message, UserName, UserRecord, group_name};
use duet_server::storage::{ConversationStore, DeleteOutcome, RedbStore};
use tempfile::tempdir;

fn user(name: &str) -> UserName {
    UserName::new(name).unwrap()
}

fn record(name: &str) -> UserRecord {
    UserRecord::new(user(name), name.to_uppercase())
}

#[test]
fn users_groups_and_messages_survive_restart() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("duet.redb");
    let group = group_name(&user("alice"), &user("bob"));

    {
        let store = RedbStore::open(&path).unwrap();
        store.upsert_user(&record("alice")).unwrap();
        store.upsert_user(&record("bob")).unwrap();
        store.get_or_create_group(&group).unwrap();
        store
            .add_message(&Message::compose(&record("alice"), &record("bob"), "before crash", 10))
            .unwrap();
    }

    let store = RedbStore::open(&path).unwrap();
    assert_eq!(store.user(&user("bob")).unwrap(), Some(record("bob")));
    assert!(store.group(&group).unwrap().is_some());

    let thread = store.message_thread(&user("bob"), &user("alice")).unwrap();
    assert_eq!(thread.len(), 1);
    assert_eq!(thread[0].content, "before crash");
    assert_eq!(thread[0].sender_known_as, "ALICE");
}

#[test]
fn message_ids_are_not_reused_after_restart() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("duet.redb");
    let compose = |content: &str| Message::compose(&record("alice"), &record("bob"), content, 1);

    let first = {
        let store = RedbStore::open(&path).unwrap();
        store.add_message(&compose("one")).unwrap().id
    };

    let store = RedbStore::open(&path).unwrap();
    let second = store.add_message(&compose("two")).unwrap().id;

    assert!(second > first);
}

#[test]
fn stale_memberships_are_cleared_on_restart() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("duet.redb");
    let group = group_name(&user("alice"), &user("bob"));
    let id = ConnectionId::new(77);

    {
        let store = RedbStore::open(&path).unwrap();
        store.join_group(&group, &Connection::new(id, user("alice"))).unwrap();
    }

    let store = RedbStore::open(&path).unwrap();
    assert!(store.group_for_connection(id).unwrap().is_some());

    assert_eq!(store.clear_connections().unwrap(), 1);

    assert_eq!(store.group_for_connection(id).unwrap(), None);
    let survivor = store.group(&group).unwrap().unwrap();
    assert!(survivor.is_empty());

    // A fresh connection with the same id can join elsewhere.
    let other = group_name(&user("alice"), &user("carol"));
    store.join_group(&other, &Connection::new(id, user("alice"))).unwrap();
}

#[test]
fn per_side_deletes_survive_restart() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("duet.redb");

    let id = {
        let store = RedbStore::open(&path).unwrap();
        let saved = store
            .add_message(&Message::compose(&record("alice"), &record("bob"), "oops", 1))
            .unwrap();
        let outcome = store.delete_message(saved.id, &user("alice")).unwrap();
        assert!(matches!(outcome, DeleteOutcome::Hidden(_)));
        saved.id
    };

    let store = RedbStore::open(&path).unwrap();
    assert!(store.message_thread(&user("alice"), &user("bob")).unwrap().is_empty());
    assert_eq!(store.message_thread(&user("bob"), &user("alice")).unwrap().len(), 1);

    let outcome = store.delete_message(id, &user("bob")).unwrap();
    assert!(matches!(outcome, DeleteOutcome::Purged(_)));
    drop(store);

    let store = RedbStore::open(&path).unwrap();
    assert_eq!(store.message(id).unwrap(), None);
}
