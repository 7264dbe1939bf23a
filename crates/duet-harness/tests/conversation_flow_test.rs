//! Conversation surface behavior, driven through the frame router.

use duet_core::{ConnectionId, Message, SessionState, UserName, UserRecord};
use duet_harness::{HubFixture, fixture::SimSession, sim_env::SIM_EPOCH_MILLIS};
use duet_proto::{
    ErrorPayload, Opcode, Payload,
    payloads::{
        hub::{GroupDto, MessageDto},
        presence::NewMessageReceived,
        session::{HelloReply, Surface},
    },
};
use duet_server::{ConversationStore, Flow, HubConfig, HubError, MemoryStore};

fn name(raw: &str) -> UserName {
    UserName::new(raw).unwrap()
}

fn thread(fx: &HubFixture, a: &str, b: &str) -> Vec<duet_core::Message> {
    fx.store().message_thread(&name(a), &name(b)).unwrap()
}

fn errors(fx: &HubFixture, session: &SimSession) -> Vec<ErrorPayload> {
    fx.notifier()
        .payloads_for(session.connection_id())
        .into_iter()
        .filter_map(|p| match p {
            Payload::Error(e) => Some(e),
            _ => None,
        })
        .collect()
}

fn new_messages(payloads: Vec<Payload>) -> Vec<MessageDto> {
    payloads
        .into_iter()
        .filter_map(|p| match p {
            Payload::NewMessage(m) => Some(m),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn read_state_follows_recipient_membership() {
    let mut fx = HubFixture::new();
    let bob_presence = fx.presence("bob").await.unwrap();
    let mut alice = fx.conversation("alice", "bob").await.unwrap();
    let mut bob = fx.conversation("bob", "alice").await.unwrap();
    assert_eq!(alice.state(), SessionState::Joined);
    assert_eq!(bob.state(), SessionState::Joined);
    fx.notifier().clear();

    // Bob is viewing: read immediately, no alert.
    assert_eq!(fx.send(&mut alice, "bob", "hi").await.unwrap(), Flow::Continue);

    let messages = thread(&fx, "alice", "bob");
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].content, "hi");
    assert!(messages[0].date_read.is_some());
    assert_eq!(fx.notifier().count(Opcode::NewMessageReceived), 0);
    assert_eq!(new_messages(fx.notifier().payloads_for(bob.connection_id())).len(), 1);

    // Bob leaves: unread, and his presence connection is alerted.
    fx.close(&mut bob).await;
    fx.notifier().clear();

    fx.send(&mut alice, "bob", "you there?").await.unwrap();

    let messages = thread(&fx, "alice", "bob");
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].content, "you there?");
    assert_eq!(messages[1].date_read, None);

    assert_eq!(
        fx.notifier().payloads_for(bob_presence.connection_id()),
        vec![Payload::NewMessageReceived(NewMessageReceived {
            username: "alice".into(),
            known_as: "Alice".into(),
        })]
    );

    let echoed = new_messages(fx.notifier().payloads_for(alice.connection_id()));
    assert_eq!(echoed.len(), 1);
    assert_eq!(echoed[0].date_read, None);
}

#[tokio::test]
async fn absent_recipient_without_presence_gets_nothing() {
    let mut fx = HubFixture::new();
    let mut bob = fx.conversation("bob", "alice").await.unwrap();
    fx.close(&mut bob).await;

    let mut alice = fx.conversation("alice", "bob").await.unwrap();
    fx.notifier().clear();

    fx.send(&mut alice, "bob", "hello?").await.unwrap();

    assert_eq!(fx.notifier().count(Opcode::NewMessageReceived), 0);
    assert_eq!(thread(&fx, "alice", "bob")[0].date_read, None);
}

#[tokio::test]
async fn join_broadcasts_membership_and_sends_thread_to_joiner_only() {
    let mut fx = HubFixture::new();
    let alice = fx.conversation("alice", "bob").await.unwrap();

    assert_eq!(
        fx.notifier().take(alice.connection_id()),
        vec![
            Payload::HelloReply(HelloReply { connection_id: alice.connection_id().get() }),
            Payload::UpdatedGroup(GroupDto {
                name: duet_core::group_name(&name("alice"), &name("bob")),
                connections: vec![duet_proto::payloads::hub::ConnectionDto {
                    connection_id: alice.connection_id().get(),
                    username: "alice".into(),
                }],
            }),
            Payload::ReceiveMessageThread(Vec::new()),
        ]
    );

    let bob = fx.conversation("bob", "alice").await.unwrap();

    let to_alice = fx.notifier().take(alice.connection_id());
    assert_eq!(to_alice.len(), 1);
    assert!(matches!(&to_alice[0], Payload::UpdatedGroup(g) if g.connections.len() == 2));

    let to_bob = fx.notifier().take(bob.connection_id());
    assert_eq!(
        to_bob.iter().map(Payload::opcode).collect::<Vec<_>>(),
        vec![Opcode::HelloReply, Opcode::UpdatedGroup, Opcode::ReceiveMessageThread]
    );
}

#[tokio::test]
async fn thread_is_not_marked_read_on_join() {
    let mut fx = HubFixture::new();
    let _bob_presence = fx.presence("bob").await.unwrap();
    let mut alice = fx.conversation("alice", "bob").await.unwrap();
    fx.send(&mut alice, "bob", "while you were out").await.unwrap();

    let bob = fx.conversation("bob", "alice").await.unwrap();

    let delivered = fx.notifier().payloads_for(bob.connection_id());
    assert!(matches!(
        delivered.last(),
        Some(Payload::ReceiveMessageThread(messages))
            if messages.len() == 1 && messages[0].date_read.is_none()
    ));
    assert_eq!(thread(&fx, "alice", "bob")[0].date_read, None);
}

#[tokio::test]
async fn long_history_reaches_joiner_in_frames_that_fit() {
    let mut fx = HubFixture::new();
    let alice = UserRecord::new(name("alice"), "Alice");
    let bob = UserRecord::new(name("bob"), "Bob");
    let body = "x".repeat(4000);
    for i in 0..300 {
        fx.store().add_message(&Message::compose(&alice, &bob, body.as_str(), i)).unwrap();
    }

    let session = fx.conversation("bob", "alice").await.unwrap();
    assert_eq!(session.state(), SessionState::Joined);

    let delivered = fx.notifier().take(session.connection_id());
    let chunks: Vec<&Payload> = delivered
        .iter()
        .filter(|p| matches!(p.opcode(), Opcode::ReceiveMessageThread | Opcode::AppendMessageThread))
        .collect();
    assert!(chunks.len() > 1);
    assert_eq!(chunks[0].opcode(), Opcode::ReceiveMessageThread);

    let mut received = Vec::new();
    for chunk in chunks {
        assert!(chunk.to_frame().unwrap().to_vec().is_ok());
        match chunk {
            Payload::ReceiveMessageThread(messages) | Payload::AppendMessageThread(messages) => {
                received.extend(messages.iter().map(|m| m.id));
            },
            _ => unreachable!(),
        }
    }
    let stored: Vec<u64> = thread(&fx, "bob", "alice").iter().map(|m| m.id).collect();
    assert_eq!(received.len(), 300);
    assert_eq!(received, stored);
}

#[tokio::test]
async fn sends_outside_the_conversation_are_rejected() {
    let mut fx = HubFixture::new();
    let _carol = fx.presence("carol").await.unwrap();
    let mut alice = fx.conversation("alice", "bob").await.unwrap();
    fx.notifier().clear();

    let flow = fx.send(&mut alice, "carol", "wrong window").await.unwrap();

    assert_eq!(flow, Flow::Continue);
    let codes: Vec<u16> = errors(&fx, &alice).iter().map(|e| e.code).collect();
    assert_eq!(codes, vec![ErrorPayload::INVALID_PAYLOAD]);
    assert_eq!(fx.store().message_count().unwrap(), 0);
    assert_eq!(fx.notifier().count(Opcode::NewMessageReceived), 0);
    assert_eq!(alice.state(), SessionState::Joined);
}

#[tokio::test]
async fn self_send_is_rejected_without_side_effects() {
    let mut fx = HubFixture::new();
    let mut alice = fx.conversation("alice", "bob").await.unwrap();
    fx.notifier().clear();

    let flow = fx.send(&mut alice, "ALICE", "note to self").await.unwrap();

    assert_eq!(flow, Flow::Continue);
    assert_eq!(errors(&fx, &alice), vec![ErrorPayload::cannot_message_self()]);
    assert_eq!(fx.store().message_count().unwrap(), 0);
    assert_eq!(fx.notifier().count(Opcode::NewMessage), 0);
    assert_eq!(alice.state(), SessionState::Joined);
}

#[tokio::test]
async fn self_conversation_is_rejected_at_hello() {
    let mut fx = HubFixture::new();
    let mut session = fx.open();

    let flow = fx
        .hello(&mut session, "alice", Surface::Conversation { with: "Alice".into() })
        .await
        .unwrap();

    assert!(matches!(flow, Flow::Close { .. }));
    assert_eq!(errors(&fx, &session), vec![ErrorPayload::cannot_message_self()]);
    assert_eq!(fx.store().group_count().unwrap(), 0);
}

#[tokio::test]
async fn unknown_recipient_is_not_found() {
    let mut fx = HubFixture::new();
    let mut alice = fx.conversation("alice", "nobody").await.unwrap();
    fx.notifier().clear();

    fx.send(&mut alice, "nobody", "anyone?").await.unwrap();

    assert_eq!(errors(&fx, &alice), vec![ErrorPayload::recipient_not_found("nobody")]);
    assert_eq!(fx.store().message_count().unwrap(), 0);
    assert_eq!(fx.notifier().count(Opcode::NewMessage), 0);
}

#[tokio::test]
async fn content_limits_are_client_errors() {
    let config = HubConfig { max_message_length: 5, ..HubConfig::default() };
    let mut fx = HubFixture::with_config(MemoryStore::new(), config);
    let _bob = fx.presence("bob").await.unwrap();
    let mut alice = fx.conversation("alice", "bob").await.unwrap();
    fx.notifier().clear();

    fx.send(&mut alice, "bob", "   ").await.unwrap();
    fx.send(&mut alice, "bob", "too long").await.unwrap();
    fx.send(&mut alice, "bob", "héllo").await.unwrap();

    let codes: Vec<u16> = errors(&fx, &alice).iter().map(|e| e.code).collect();
    assert_eq!(codes, vec![ErrorPayload::INVALID_PAYLOAD, ErrorPayload::INVALID_PAYLOAD]);
    assert_eq!(fx.store().message_count().unwrap(), 1);
}

#[tokio::test]
async fn messages_are_stamped_with_wall_clock() {
    let mut fx = HubFixture::new();
    let _bob = fx.presence("bob").await.unwrap();
    let mut alice = fx.conversation("alice", "bob").await.unwrap();

    fx.env().advance(std::time::Duration::from_millis(1_500));
    fx.send(&mut alice, "bob", "tick").await.unwrap();

    assert_eq!(thread(&fx, "alice", "bob")[0].message_sent, SIM_EPOCH_MILLIS + 1_500);
}

#[tokio::test]
async fn delete_hides_per_side_then_purges() {
    let mut fx = HubFixture::new();
    let mut alice = fx.conversation("alice", "bob").await.unwrap();
    let mut bob = fx.conversation("bob", "alice").await.unwrap();
    fx.send(&mut alice, "bob", "regret").await.unwrap();
    let id = thread(&fx, "alice", "bob")[0].id;
    fx.notifier().clear();

    fx.delete(&mut alice, id).await.unwrap();

    assert!(thread(&fx, "alice", "bob").is_empty());
    assert_eq!(thread(&fx, "bob", "alice").len(), 1);
    assert_eq!(
        fx.notifier().take(alice.connection_id()),
        vec![Payload::ReceiveMessageThread(Vec::new())]
    );
    assert!(fx.notifier().payloads_for(bob.connection_id()).is_empty());

    fx.delete(&mut bob, id).await.unwrap();

    assert_eq!(fx.store().message(id).unwrap(), None);
    assert_eq!(fx.store().message_count().unwrap(), 0);
}

#[tokio::test]
async fn outsiders_cannot_delete() {
    let mut fx = HubFixture::new();
    let mut alice = fx.conversation("alice", "bob").await.unwrap();
    let _bob = fx.presence("bob").await.unwrap();
    fx.send(&mut alice, "bob", "private").await.unwrap();
    let id = thread(&fx, "alice", "bob")[0].id;

    let mut carol = fx.conversation("carol", "dave").await.unwrap();
    fx.delete(&mut carol, id).await.unwrap();
    fx.delete(&mut carol, id + 100).await.unwrap();

    let codes: Vec<u16> = errors(&fx, &carol).iter().map(|e| e.code).collect();
    assert_eq!(codes, vec![ErrorPayload::INVALID_PAYLOAD, ErrorPayload::INVALID_PAYLOAD]);
    assert_eq!(thread(&fx, "alice", "bob").len(), 1);
}

#[tokio::test]
async fn leaving_broadcasts_to_remaining_members() {
    let mut fx = HubFixture::new();
    let alice = fx.conversation("alice", "bob").await.unwrap();
    let mut bob = fx.conversation("bob", "alice").await.unwrap();
    fx.notifier().clear();

    fx.close(&mut bob).await;

    assert_eq!(bob.state(), SessionState::Closed);
    let to_alice = fx.notifier().take(alice.connection_id());
    assert!(matches!(&to_alice[..], [Payload::UpdatedGroup(g)] if g.connections.len() == 1));

    let group = fx.store().group_for_connection(bob.connection_id()).unwrap();
    assert_eq!(group, None);
}

#[tokio::test]
async fn disconnect_without_membership_is_drift() {
    let mut fx = HubFixture::new();
    let mut watcher = fx.presence("alice").await.unwrap();

    let err = fx.hub().disconnect(&mut watcher).await.unwrap_err();

    assert!(matches!(err, HubError::MembershipDrift { connection_id } if connection_id == watcher.connection_id()));
    assert!(err.is_invariant_violation());
    assert!(!err.is_client_error());
    assert_eq!(watcher.state(), SessionState::Closed);
}

#[tokio::test]
async fn close_runs_once() {
    let mut fx = HubFixture::new();
    let alice = fx.conversation("alice", "bob").await.unwrap();
    let mut bob = fx.conversation("bob", "alice").await.unwrap();

    fx.close(&mut bob).await;
    fx.notifier().clear();
    fx.close(&mut bob).await;

    assert!(fx.notifier().payloads_for(alice.connection_id()).is_empty());
}

#[tokio::test]
async fn requests_before_hello_are_protocol_violations() {
    let mut fx = HubFixture::new();
    let mut session = fx.open();

    let flow = fx.send(&mut session, "bob", "early").await.unwrap();

    assert_eq!(flow, Flow::Continue);
    let codes: Vec<u16> = errors(&fx, &session).iter().map(|e| e.code).collect();
    assert_eq!(codes, vec![ErrorPayload::PROTOCOL_VIOLATION]);
    assert_eq!(session.state(), SessionState::Handshake);
}

#[tokio::test]
async fn second_hello_is_rejected() {
    let mut fx = HubFixture::new();
    let mut alice = fx.conversation("alice", "bob").await.unwrap();

    let flow = fx.hello(&mut alice, "alice", Surface::Presence).await.unwrap();

    assert!(matches!(flow, Flow::Close { .. }));
    assert_eq!(alice.state(), SessionState::Joined);
}

#[tokio::test]
async fn server_only_frames_from_client_are_rejected() {
    let mut fx = HubFixture::new();
    let mut alice = fx.conversation("alice", "bob").await.unwrap();
    fx.notifier().clear();

    let flow = fx.deliver(&mut alice, &Payload::UserIsOnline("mallory".into())).await.unwrap();

    assert_eq!(flow, Flow::Continue);
    assert_eq!(errors(&fx, &alice)[0].code, ErrorPayload::PROTOCOL_VIOLATION);
}

#[tokio::test]
async fn ping_pong_and_goodbye() {
    let mut fx = HubFixture::new();
    let mut alice = fx.conversation("alice", "bob").await.unwrap();
    fx.notifier().clear();

    assert_eq!(fx.deliver(&mut alice, &Payload::Ping).await.unwrap(), Flow::Continue);
    assert_eq!(fx.notifier().take(alice.connection_id()), vec![Payload::Pong]);

    let flow = fx.deliver(&mut alice, &Payload::Goodbye).await.unwrap();
    assert!(matches!(flow, Flow::Close { .. }));
}

#[tokio::test]
async fn idle_sessions_get_heartbeats_then_time_out() {
    let mut fx = HubFixture::new();
    let mut alice = fx.conversation("alice", "bob").await.unwrap();
    fx.notifier().clear();

    assert_eq!(fx.router().tick(&mut alice), Flow::Continue);
    assert_eq!(fx.notifier().take(alice.connection_id()), vec![Payload::Ping]);

    fx.env().advance(std::time::Duration::from_secs(61));
    assert!(matches!(fx.router().tick(&mut alice), Flow::Close { .. }));
}

#[tokio::test]
async fn silent_handshake_times_out() {
    let mut fx = HubFixture::new();
    let mut session = fx.open();

    assert_eq!(fx.router().tick(&mut session), Flow::Continue);
    fx.env().advance(std::time::Duration::from_secs(31));
    assert!(matches!(fx.router().tick(&mut session), Flow::Close { .. }));
}

#[tokio::test]
async fn concurrent_sends_reach_members_in_commit_order() {
    let mut fx = HubFixture::new();
    let mut tab1 = fx.conversation("alice", "bob").await.unwrap();
    let mut tab2 = fx.conversation("alice", "bob").await.unwrap();
    let bob = fx.conversation("bob", "alice").await.unwrap();
    fx.notifier().clear();

    tokio::join!(
        async {
            for i in 0..10 {
                fx.send(&mut tab1, "bob", &format!("one-{i}")).await.unwrap();
            }
        },
        async {
            for i in 0..10 {
                fx.send(&mut tab2, "bob", &format!("two-{i}")).await.unwrap();
            }
        },
    );

    let committed: Vec<u64> = thread(&fx, "alice", "bob").iter().map(|m| m.id).collect();
    assert_eq!(committed.len(), 20);

    for member in [&tab1, &tab2, &bob] {
        let seen: Vec<u64> =
            new_messages(fx.notifier().payloads_for(member.connection_id())).iter().map(|m| m.id).collect();
        assert_eq!(seen, committed, "member {}", member.connection_id());
    }
}

#[tokio::test]
async fn connection_ids_are_distinct() {
    let mut fx = HubFixture::new();
    let a = fx.open();
    let b = fx.open();
    assert_ne!(a.connection_id(), b.connection_id());
    assert_eq!(a.connection_id(), ConnectionId::new(1));
}
