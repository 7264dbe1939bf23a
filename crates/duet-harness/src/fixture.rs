//! Router wired to simulated edges.

use std::sync::Arc;

use duet_core::{ConnectionId, PresenceRegistry, Session, SessionConfig, session::PROTOCOL_VERSION};
use duet_proto::{
    Payload, ProtocolError,
    payloads::{
        hub::{DeleteMessage, SendMessage},
        session::{Hello, Surface},
    },
};
use duet_server::{
    ConversationStore, Flow, FrameRouter, HubConfig, MemoryStore, MessageHub, PresenceHub,
};

use crate::{RecordingNotifier, SimEnv, SimInstant};

/// Session type driven by a [`HubFixture`].
pub type SimSession = Session<SimInstant>;

/// A real [`FrameRouter`] over a [`RecordingNotifier`] and [`SimEnv`].
///
/// Connection ids are handed out sequentially from 1 so assertions can name
/// them.
pub struct HubFixture<S: ConversationStore = MemoryStore> {
    router: FrameRouter<S, RecordingNotifier, SimEnv>,
    notifier: RecordingNotifier,
    env: SimEnv,
    next_connection: u64,
}

impl HubFixture<MemoryStore> {
    /// Fixture over a fresh in-memory store.
    pub fn new() -> Self {
        Self::with_store(MemoryStore::new())
    }
}

impl Default for HubFixture<MemoryStore> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: ConversationStore> HubFixture<S> {
    /// Fixture over `store` with default limits.
    pub fn with_store(store: S) -> Self {
        Self::with_config(store, HubConfig::default())
    }

    /// Fixture over `store` with explicit limits.
    pub fn with_config(store: S, config: HubConfig) -> Self {
        let env = SimEnv::new();
        let notifier = RecordingNotifier::new();
        let registry = Arc::new(PresenceRegistry::new());

        let hub =
            MessageHub::new(store, notifier.clone(), Arc::clone(&registry), env.clone(), config);
        let presence = PresenceHub::new(registry, notifier.clone());
        let router =
            FrameRouter::new(hub, presence, notifier.clone(), env.clone(), SessionConfig::default());

        Self { router, notifier, env, next_connection: 1 }
    }

    /// The router under test.
    pub fn router(&self) -> &FrameRouter<S, RecordingNotifier, SimEnv> {
        &self.router
    }

    /// The conversation hub.
    pub fn hub(&self) -> &MessageHub<S, RecordingNotifier, SimEnv> {
        self.router.hub()
    }

    /// The store behind the hub.
    pub fn store(&self) -> &S {
        self.router.hub().store()
    }

    /// The shared presence registry.
    pub fn registry(&self) -> &PresenceRegistry {
        self.router.presence().registry()
    }

    /// Recorded pushes.
    pub fn notifier(&self) -> &RecordingNotifier {
        &self.notifier
    }

    /// Simulated clock and RNG.
    pub fn env(&self) -> &SimEnv {
        &self.env
    }

    /// A fresh session in `Handshake`.
    pub fn open(&mut self) -> SimSession {
        let id = ConnectionId::new(self.next_connection);
        self.next_connection += 1;
        self.router.open_session(id)
    }

    /// Open a connection and attach it to the presence surface.
    ///
    /// # Errors
    ///
    /// - `ProtocolError` if the `Hello` cannot be framed
    pub async fn presence(&mut self, username: &str) -> Result<SimSession, ProtocolError> {
        let mut session = self.open();
        self.hello(&mut session, username, Surface::Presence).await?;
        Ok(session)
    }

    /// Open a connection and join the conversation between `username` and
    /// `with`.
    ///
    /// # Errors
    ///
    /// - `ProtocolError` if the `Hello` cannot be framed
    pub async fn conversation(
        &mut self,
        username: &str,
        with: &str,
    ) -> Result<SimSession, ProtocolError> {
        let mut session = self.open();
        self.hello(&mut session, username, Surface::Conversation { with: with.into() }).await?;
        Ok(session)
    }

    /// Send `Hello` on an open session.
    ///
    /// # Errors
    ///
    /// - `ProtocolError` if the `Hello` cannot be framed
    pub async fn hello(
        &self,
        session: &mut SimSession,
        username: &str,
        surface: Surface,
    ) -> Result<Flow, ProtocolError> {
        let hello = Hello {
            version: PROTOCOL_VERSION,
            username: username.into(),
            known_as: Some(display_name(username)),
            surface,
        };
        self.deliver(session, &Payload::Hello(hello)).await
    }

    /// Send a message from a joined session.
    ///
    /// # Errors
    ///
    /// - `ProtocolError` if the request cannot be framed
    pub async fn send(
        &self,
        session: &mut SimSession,
        recipient: &str,
        content: &str,
    ) -> Result<Flow, ProtocolError> {
        let request =
            SendMessage { recipient_username: recipient.into(), content: content.into() };
        self.deliver(session, &Payload::SendMessage(request)).await
    }

    /// Delete a message from a joined session.
    ///
    /// # Errors
    ///
    /// - `ProtocolError` if the request cannot be framed
    pub async fn delete(
        &self,
        session: &mut SimSession,
        message_id: u64,
    ) -> Result<Flow, ProtocolError> {
        self.deliver(session, &Payload::DeleteMessage(DeleteMessage { message_id })).await
    }

    /// Frame `payload` and hand it to the router as if it arrived on the
    /// session's connection.
    ///
    /// # Errors
    ///
    /// - `ProtocolError` if the payload cannot be framed
    pub async fn deliver(
        &self,
        session: &mut SimSession,
        payload: &Payload,
    ) -> Result<Flow, ProtocolError> {
        let frame = payload.to_frame()?;
        Ok(self.router.handle_frame(session, &frame).await)
    }

    /// Run the disconnect path, as the runtime does when a connection ends.
    pub async fn close(&self, session: &mut SimSession) {
        self.router.close_session(session).await;
        self.notifier.close(session.connection_id());
    }
}

/// Display name the fixture sends for `username`.
pub fn display_name(username: &str) -> String {
    let mut chars = username.chars();
    chars.next().map_or_else(String::new, |first| first.to_uppercase().chain(chars).collect())
}
