//! Conversation hub: join, send, delete and disconnect.
//!
//! The hub owns no per-connection state. Each session task owns its
//! [`Session`] and passes it in, so one connection's events are processed in
//! order while different connections run concurrently.
//!
//! # Ordering
//!
//! Membership changes, the send-time "is the recipient viewing?" read, and the
//! broadcasts they trigger all run under the group's lock in [`GroupLocks`].
//! Broadcasts therefore reach members in commit order, and a send never reads
//! a membership set that a concurrent join or leave is about to change.
//! Nothing is broadcast unless the triggering commit returned `Ok`.

use std::sync::Arc;

use dashmap::DashMap;
use duet_core::{
    Attachment, Connection, ConnectionId, ConversationGroup, Message, PresenceRegistry, Session,
    SessionError, SessionState, UserName, UserRecord, env::Environment,
};
use duet_proto::{
    Payload,
    payloads::{
        hub::{DeleteMessage, MessageDto, SendMessage},
        presence::NewMessageReceived,
        thread_frames,
    },
};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::{
    notifier::Notifier,
    server_error::HubError,
    storage::{ConversationStore, DeleteOutcome, StorageError},
};

/// Default cap on concurrent connections.
pub const DEFAULT_MAX_CONNECTIONS: usize = 10_000;

/// Default cap on message length, in characters.
pub const DEFAULT_MAX_MESSAGE_LENGTH: usize = 4096;

/// Hub limits.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Concurrent connections accepted by the runtime
    pub max_connections: usize,
    /// Longest accepted message body, in characters
    pub max_message_length: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            max_message_length: DEFAULT_MAX_MESSAGE_LENGTH,
        }
    }
}

/// One async mutex per group name.
///
/// Waiting on a group lock suspends only the waiting session. An entry lives
/// only while someone holds or waits for it.
#[derive(Default)]
pub struct GroupLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl GroupLocks {
    /// Acquire the lock for `group`.
    pub async fn lock(&self, group: &str) -> GroupGuard<'_> {
        let lock = Arc::clone(self.locks.entry(group.to_owned()).or_default().value());
        let guard = lock.lock_owned().await;
        GroupGuard { locks: self, group: group.to_owned(), guard: Some(guard) }
    }

    /// Groups with a live holder or waiter.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Whether no group lock is held or awaited.
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Held group lock. Dropping it releases the lock and forgets the group once
/// nobody else holds or waits for it.
pub struct GroupGuard<'a> {
    locks: &'a GroupLocks,
    group: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for GroupGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Cloning an entry's Arc happens under the shard lock `remove_if`
        // holds, so a count of one means no holder or waiter remains.
        self.locks.locks.remove_if(&self.group, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// Conversation-surface coordinator.
pub struct MessageHub<S, N, E> {
    store: S,
    notifier: N,
    presence: Arc<PresenceRegistry>,
    env: E,
    locks: GroupLocks,
    config: HubConfig,
}

impl<S, N, E> MessageHub<S, N, E>
where
    S: ConversationStore,
    N: Notifier,
    E: Environment,
{
    /// Create a hub.
    ///
    /// `presence` is the registry the presence surface maintains; the hub
    /// only reads it to find a recipient's live connections.
    pub fn new(
        store: S,
        notifier: N,
        presence: Arc<PresenceRegistry>,
        env: E,
        config: HubConfig,
    ) -> Self {
        Self { store, notifier, presence, env, locks: GroupLocks::default(), config }
    }

    /// Backing store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Hub limits.
    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Record the caller's identity and display name.
    pub fn register_user(&self, user: &UserRecord) -> Result<(), HubError> {
        self.store.upsert_user(user)?;
        Ok(())
    }

    /// Join the session's conversation group.
    ///
    /// Commits the join, broadcasts `UpdatedGroup` to every member, then
    /// pushes the thread to the caller only. Unread messages stay unread.
    ///
    /// # Errors
    ///
    /// - `HubError::Session` unless the session is `Joining`
    /// - `HubError::JoinFailed` if the join commit fails; the session closes
    /// - `HubError::Storage` if the thread cannot be loaded after joining
    /// - `HubError::ThreadDelivery` if the thread cannot be framed
    pub async fn connect(
        &self,
        session: &mut Session<E::Instant>,
    ) -> Result<ConversationGroup, HubError> {
        let (user, peer, group_name) = match (session.state(), session.user(), session.attachment())
        {
            (
                SessionState::Joining,
                Some(user),
                Some(Attachment::Conversation { peer, group }),
            ) => (user.username.clone(), peer.clone(), group.clone()),
            (state, ..) => {
                return Err(SessionError::InvalidState { state, operation: "connect" }.into());
            },
        };
        let connection_id = session.connection_id();

        let _guard = self.locks.lock(&group_name).await;

        let group = match self.store.join_group(&group_name, &Connection::new(connection_id, user.clone()))
        {
            Ok(group) => group,
            Err(e) => {
                session.join_failed();
                tracing::error!(connection = %connection_id, group = %group_name, "join commit failed: {e}");
                return Err(HubError::JoinFailed(e));
            },
        };
        session.joined()?;

        tracing::info!(
            connection = %connection_id,
            group = %group.name,
            members = group.len(),
            "joined conversation"
        );

        self.broadcast(&group, &Payload::UpdatedGroup(group.to_dto()));

        let thread = self.store.message_thread(&user, &peer)?;
        self.deliver_thread(connection_id, &thread)?;

        Ok(group)
    }

    /// Persist a message and deliver it live.
    ///
    /// The message is read immediately if the recipient has a connection in
    /// the conversation group. Otherwise the recipient's presence connections
    /// get a `NewMessageReceived` alert. After the commit, `NewMessage` is
    /// broadcast to the group.
    ///
    /// # Errors
    ///
    /// - `HubError::Session` unless the session is `Joined`
    /// - `HubError::CannotMessageSelf` if the recipient is the caller
    /// - `HubError::OutsideConversation` if the recipient is not the
    ///   session's conversation peer
    /// - `HubError::InvalidContent` for empty or oversized content
    /// - `HubError::RecipientNotFound` if the recipient does not resolve
    /// - `HubError::CommitFailed` if the message commit fails
    pub async fn send_message(
        &self,
        session: &mut Session<E::Instant>,
        request: &SendMessage,
    ) -> Result<Message, HubError> {
        session.begin_send()?;
        let result = self.dispatch(session, request).await;
        session.finish_send();
        result
    }

    async fn dispatch(
        &self,
        session: &Session<E::Instant>,
        request: &SendMessage,
    ) -> Result<Message, HubError> {
        let sender = caller(session)?;

        let recipient = UserName::new(&request.recipient_username)
            .map_err(|_| HubError::RecipientNotFound(request.recipient_username.clone()))?;
        if recipient == sender {
            return Err(HubError::CannotMessageSelf);
        }
        if let Some(Attachment::Conversation { peer, .. }) = session.attachment()
            && peer != &recipient
        {
            return Err(HubError::OutsideConversation(recipient.to_string()));
        }

        self.validate_content(&request.content)?;

        let sender_record =
            self.store.user(&sender)?.ok_or_else(|| HubError::UserNotFound(sender.to_string()))?;
        let recipient_record = self
            .store
            .user(&recipient)?
            .ok_or_else(|| HubError::RecipientNotFound(recipient.to_string()))?;

        let now = self.env.wall_clock_millis();
        let mut message =
            Message::compose(&sender_record, &recipient_record, request.content.as_str(), now);
        let group_name = message.group_name();

        let _guard = self.locks.lock(&group_name).await;

        let group = self.store.group(&group_name)?;
        let recipient_viewing = group.as_ref().is_some_and(|g| g.contains_user(&recipient));
        if recipient_viewing {
            message.mark_read_by(&recipient, now);
        }

        let saved = self.store.add_message(&message).map_err(|e| {
            tracing::error!(group = %group_name, "message commit failed: {e}");
            HubError::CommitFailed(e)
        })?;

        if !recipient_viewing {
            self.alert_recipient(&saved);
        }

        if let Some(group) = &group {
            self.broadcast(group, &Payload::NewMessage(MessageDto::from(&saved)));
        }

        tracing::debug!(
            message = saved.id,
            group = %group_name,
            read = recipient_viewing,
            "message sent"
        );

        Ok(saved)
    }

    /// Delete a message on the caller's side and push the refreshed thread to
    /// the caller.
    ///
    /// # Errors
    ///
    /// - `HubError::Session` unless the session is `Joined`
    /// - `HubError::MessageNotFound` / `HubError::NotParticipant`
    /// - `HubError::CommitFailed` if the delete commit fails
    pub fn delete_message(
        &self,
        session: &mut Session<E::Instant>,
        request: DeleteMessage,
    ) -> Result<DeleteOutcome, HubError> {
        session.begin_send()?;
        let result = self.delete(session, request.message_id);
        session.finish_send();
        result
    }

    fn delete(&self, session: &Session<E::Instant>, id: u64) -> Result<DeleteOutcome, HubError> {
        let user = caller(session)?;

        let outcome = self.store.delete_message(id, &user).map_err(|e| match e {
            StorageError::MessageNotFound(id) => HubError::MessageNotFound(id),
            StorageError::NotParticipant(id) => HubError::NotParticipant(id),
            other => HubError::CommitFailed(other),
        })?;

        let message = outcome.message();
        let other = if message.sender_username == user {
            &message.recipient_username
        } else {
            &message.sender_username
        };

        let thread = self.store.message_thread(&user, other)?;
        self.deliver_thread(session.connection_id(), &thread)?;

        Ok(outcome)
    }

    /// Leave the conversation group and broadcast the smaller membership.
    ///
    /// # Errors
    ///
    /// - `HubError::Session` if the session is already leaving or closed
    /// - `HubError::MembershipDrift` if the connection is in no group
    /// - `HubError::LeaveFailed` if the lookup or leave commit fails
    pub async fn disconnect(
        &self,
        session: &mut Session<E::Instant>,
    ) -> Result<ConversationGroup, HubError> {
        session.begin_leave()?;
        let connection_id = session.connection_id();
        let result = self.leave(connection_id).await;
        session.left();

        match &result {
            Ok(group) => tracing::info!(
                connection = %connection_id,
                group = %group.name,
                members = group.len(),
                "left conversation"
            ),
            Err(e) if e.is_invariant_violation() => {
                tracing::error!(connection = %connection_id, "membership drift: {e}");
            },
            Err(e) => tracing::warn!(connection = %connection_id, "leave failed: {e}"),
        }

        result
    }

    async fn leave(&self, connection_id: ConnectionId) -> Result<ConversationGroup, HubError> {
        let group = self
            .store
            .group_for_connection(connection_id)
            .map_err(HubError::LeaveFailed)?
            .ok_or(HubError::MembershipDrift { connection_id })?;

        let _guard = self.locks.lock(&group.name).await;

        let group =
            self.store.leave_group(&group.name, connection_id).map_err(HubError::LeaveFailed)?;
        self.broadcast(&group, &Payload::UpdatedGroup(group.to_dto()));

        Ok(group)
    }

    fn validate_content(&self, content: &str) -> Result<(), HubError> {
        if content.trim().is_empty() {
            return Err(HubError::InvalidContent("message is empty".into()));
        }

        let len = content.chars().count();
        if len > self.config.max_message_length {
            return Err(HubError::InvalidContent(format!(
                "message is {len} characters long (max {})",
                self.config.max_message_length
            )));
        }

        Ok(())
    }

    fn broadcast(&self, group: &ConversationGroup, payload: &Payload) {
        let delivered = self.notifier.push_all(group.connection_ids(), payload);
        tracing::debug!(group = %group.name, delivered, opcode = ?payload.opcode(), "broadcast");
    }

    fn alert_recipient(&self, message: &Message) {
        let targets = self.presence.connections_for(&message.recipient_username);
        if targets.is_empty() {
            return;
        }

        let alert = Payload::NewMessageReceived(NewMessageReceived {
            username: message.sender_username.to_string(),
            known_as: message.sender_known_as.clone(),
        });
        let delivered = self.notifier.push_all(targets, &alert);
        tracing::debug!(recipient = %message.recipient_username, delivered, "new message alert");
    }

    /// Push the thread to one connection, split across as many frames as the
    /// payload limit requires.
    fn deliver_thread(
        &self,
        connection_id: ConnectionId,
        thread: &[Message],
    ) -> Result<(), HubError> {
        let frames = thread_frames(thread.iter().map(MessageDto::from).collect())
            .map_err(|e| HubError::ThreadDelivery(e.to_string()))?;

        let chunks = frames.len();
        for frame in frames {
            if let Err(e) = self.notifier.push_frame(connection_id, frame) {
                tracing::debug!(connection = %connection_id, "thread delivery dropped: {e}");
                return Ok(());
            }
        }

        tracing::debug!(
            connection = %connection_id,
            messages = thread.len(),
            chunks,
            "thread delivered"
        );
        Ok(())
    }
}

fn caller<I>(session: &Session<I>) -> Result<UserName, HubError>
where
    I: Copy + Ord + Send + Sync + std::ops::Sub<Output = std::time::Duration>,
{
    session.user().map(|u| u.username.clone()).ok_or_else(|| {
        HubError::Session(SessionError::InvalidState {
            state: session.state(),
            operation: "act before hello",
        })
    })
}
