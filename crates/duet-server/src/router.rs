//! Routes inbound frames for one session to the presence or conversation hub.
//!
//! The router is transport-agnostic: the runtime feeds it decoded frames and
//! ticks, and acts on the returned [`Flow`]. Every reply, including errors,
//! goes out through the [`Notifier`], so ordering with broadcasts is kept by
//! the single outbox per connection.

use duet_core::{
    Attachment, ConnectionId, Session, SessionAction, SessionConfig, SessionError, SessionState,
    env::Environment,
};
use duet_proto::{
    ErrorPayload, Frame, Payload,
    payloads::session::{Hello, HelloReply},
};

use crate::{
    hub::MessageHub, notifier::Notifier, presence::PresenceHub, server_error::HubError,
    storage::ConversationStore,
};

/// What the runtime should do with the connection after a frame or tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flow {
    /// Keep reading
    Continue,
    /// Close the connection, then call [`FrameRouter::close_session`]
    Close {
        /// Reason for closing
        reason: String,
    },
}

/// Per-process frame router shared by all session tasks.
pub struct FrameRouter<S, N, E> {
    hub: MessageHub<S, N, E>,
    presence: PresenceHub<N>,
    notifier: N,
    env: E,
    session_config: SessionConfig,
}

impl<S, N, E> FrameRouter<S, N, E>
where
    S: ConversationStore,
    N: Notifier,
    E: Environment,
{
    /// Create a router over both surfaces.
    pub fn new(
        hub: MessageHub<S, N, E>,
        presence: PresenceHub<N>,
        notifier: N,
        env: E,
        session_config: SessionConfig,
    ) -> Self {
        Self { hub, presence, notifier, env, session_config }
    }

    /// Conversation hub.
    pub fn hub(&self) -> &MessageHub<S, N, E> {
        &self.hub
    }

    /// Presence hub.
    pub fn presence(&self) -> &PresenceHub<N> {
        &self.presence
    }

    /// Start a session for a freshly accepted connection.
    pub fn open_session(&self, connection_id: ConnectionId) -> Session<E::Instant> {
        Session::new(connection_id, self.env.now(), self.session_config.clone())
    }

    /// Process one inbound frame.
    pub async fn handle_frame(&self, session: &mut Session<E::Instant>, frame: &Frame) -> Flow {
        session.touch(self.env.now());

        let payload = match Payload::from_frame(frame) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(connection = %session.connection_id(), "undecodable frame: {e}");
                self.reply(session, &Payload::Error(ErrorPayload::invalid_payload(e.to_string())));
                return Flow::Continue;
            },
        };

        tracing::debug!(connection = %session.connection_id(), opcode = ?payload.opcode(), "frame");

        match payload {
            Payload::Hello(hello) => self.hello(session, &hello).await,
            Payload::SendMessage(request) => {
                let result = self.hub.send_message(session, &request).await;
                self.report(session, result.map(drop))
            },
            Payload::DeleteMessage(request) => {
                let result = self.hub.delete_message(session, request);
                self.report(session, result.map(drop))
            },
            Payload::Ping => {
                self.reply(session, &Payload::Pong);
                Flow::Continue
            },
            Payload::Pong => Flow::Continue,
            Payload::Goodbye => Flow::Close { reason: "goodbye".into() },
            other => {
                let message = format!("unexpected {:?} from client", other.opcode());
                tracing::warn!(connection = %session.connection_id(), "{message}");
                self.reply(session, &Payload::Error(ErrorPayload::protocol_violation(message)));
                Flow::Continue
            },
        }
    }

    /// Heartbeats and timeouts.
    pub fn tick(&self, session: &mut Session<E::Instant>) -> Flow {
        for action in session.tick(self.env.now()) {
            match action {
                SessionAction::SendFrame(frame) => {
                    if let Err(e) = self.notifier.push_frame(session.connection_id(), frame) {
                        tracing::debug!(connection = %session.connection_id(), "heartbeat dropped: {e}");
                    }
                },
                SessionAction::Close { reason } => return Flow::Close { reason },
            }
        }
        Flow::Continue
    }

    /// Run the disconnect path for whichever surface the session attached to.
    ///
    /// Safe to call more than once; only the first call does anything.
    pub async fn close_session(&self, session: &mut Session<E::Instant>) {
        let connection_id = session.connection_id();

        match session.state() {
            SessionState::Leaving | SessionState::Closed => {},
            SessionState::Presence => {
                if let Some(user) = session.user().map(|u| u.username.clone()) {
                    self.presence.disconnect(&user, connection_id);
                }
                if session.begin_leave().is_ok() {
                    session.left();
                }
            },
            SessionState::Joined | SessionState::Sending => {
                // Logged by the hub; the session is closed either way.
                let _ = self.hub.disconnect(session).await;
            },
            // Joining here means the join was never committed.
            SessionState::Handshake | SessionState::Joining => {
                if session.begin_leave().is_ok() {
                    session.left();
                }
            },
        }

        tracing::debug!(connection = %connection_id, "session closed");
    }

    async fn hello(&self, session: &mut Session<E::Instant>, hello: &Hello) -> Flow {
        let connection_id = session.connection_id();

        let attachment = match session.accept_hello(hello, self.env.now()) {
            Ok(attachment) => attachment,
            Err(e) => {
                tracing::warn!(connection = %connection_id, "hello rejected: {e}");
                let error = match e {
                    SessionError::SelfConversation => ErrorPayload::cannot_message_self(),
                    SessionError::InvalidIdentity(_) => ErrorPayload::invalid_payload(e.to_string()),
                    _ => ErrorPayload::protocol_violation(e.to_string()),
                };
                self.reply(session, &Payload::Error(error));
                return Flow::Close { reason: e.to_string() };
            },
        };

        let Some(user) = session.user().cloned() else {
            return Flow::Close { reason: "hello accepted without identity".into() };
        };

        if let Err(e) = self.hub.register_user(&user) {
            tracing::error!(connection = %connection_id, user = %user.username, "{e}");
            self.reply(session, &Payload::Error(e.to_payload()));
            return Flow::Close { reason: e.to_string() };
        }

        self.reply(session, &Payload::HelloReply(HelloReply { connection_id: connection_id.get() }));

        match attachment {
            Attachment::Presence => {
                self.presence.connect(&user.username, connection_id);
                Flow::Continue
            },
            Attachment::Conversation { .. } => match self.hub.connect(session).await {
                Ok(_) => Flow::Continue,
                Err(e) => {
                    self.reply(session, &Payload::Error(e.to_payload()));
                    Flow::Close { reason: e.to_string() }
                },
            },
        }
    }

    fn report(&self, session: &Session<E::Instant>, result: Result<(), HubError>) -> Flow {
        let Err(e) = result else {
            return Flow::Continue;
        };

        let connection_id = session.connection_id();
        if e.is_client_error() {
            tracing::warn!(connection = %connection_id, "{e}");
        } else {
            tracing::error!(connection = %connection_id, "{e}");
        }

        self.reply(session, &Payload::Error(e.to_payload()));
        Flow::Continue
    }

    fn reply(&self, session: &Session<E::Instant>, payload: &Payload) {
        if let Err(e) = self.notifier.push(session.connection_id(), payload) {
            tracing::debug!(connection = %session.connection_id(), "reply dropped: {e}");
        }
    }
}
