//! Per-connection session state machine.
//!
//! Tracks which surface a connection is attached to, the conversation it is
//! viewing, and liveness (handshake timeout, idle timeout, heartbeats). Pure:
//! time is passed in and the runtime executes the returned actions.
//!
//! # State Machine
//!
//! ```text
//!             Hello(Presence)
//! ┌───────────┐────────────────>┌──────────┐
//! │ Handshake │                 │ Presence │──────────────┐
//! └───────────┘────────┐        └──────────┘              │
//!       │   Hello(Conversation)                           │ begin_leave
//!       │              ↓                                  ↓
//!       │        ┌─────────┐ joined ┌────────┐       ┌─────────┐ left ┌────────┐
//!       │        │ Joining │───────>│ Joined │──────>│ Leaving │─────>│ Closed │
//!       │        └─────────┘        └────────┘       └─────────┘      └────────┘
//!       │             │ join_failed  ↑     │ begin_send                   ↑
//!       │             └──────────────│─────│──────────────────────────────┤
//!       │                finish_send │     ↓                              │
//!       │                          ┌─────────┐                            │
//!       │                          │ Sending │                            │
//!       │                          └─────────┘                            │
//!       └──────────────────────────── timeout ────────────────────────────┘
//! ```

use std::{
    ops::Sub,
    time::{Duration, Instant},
};

use duet_proto::{
    Frame, FrameHeader, Opcode,
    payloads::session::{Hello, Surface},
};

use crate::{
    error::SessionError,
    group::group_name,
    identity::{ConnectionId, UserName},
    message::UserRecord,
};

/// Protocol version this hub speaks.
pub const PROTOCOL_VERSION: u8 = 1;

/// Time allowed between accepting the transport and receiving `Hello`.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum time without any inbound frame before the session is closed.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Interval between server-initiated pings.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(20);

/// Actions returned by [`Session::tick`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
    /// Send this frame to the peer
    SendFrame(Frame),

    /// Tear the connection down
    Close {
        /// Reason for closing
        reason: String,
    },
}

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Transport accepted, waiting for `Hello`
    Handshake,
    /// Attached to the presence surface
    Presence,
    /// Conversation requested, group join in flight
    Joining,
    /// Member of a conversation group
    Joined,
    /// A send or delete is in flight
    Sending,
    /// Disconnect cleanup in flight
    Leaving,
    /// Terminal
    Closed,
}

/// Surface a connection attached to after a successful `Hello`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attachment {
    /// Presence surface
    Presence,
    /// Conversation surface with `peer`, in group `group`
    Conversation {
        /// Other participant
        peer: UserName,
        /// Conversation group name
        group: String,
    },
}

/// Liveness configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Timeout for receiving `Hello`
    pub handshake_timeout: Duration,
    /// Idle timeout once attached
    pub idle_timeout: Duration,
    /// Heartbeat interval (should be < `idle_timeout` / 2)
    pub heartbeat_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
        }
    }
}

/// State of one connection.
///
/// Generic over `Instant` so simulations can drive it with virtual time.
#[derive(Debug, Clone)]
pub struct Session<I = Instant>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    connection_id: ConnectionId,
    state: SessionState,
    config: SessionConfig,
    last_activity: I,
    last_heartbeat: Option<I>,
    user: Option<UserRecord>,
    attachment: Option<Attachment>,
}

impl<I> Session<I>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    /// Create a session in [`SessionState::Handshake`].
    pub fn new(connection_id: ConnectionId, now: I, config: SessionConfig) -> Self {
        Self {
            connection_id,
            state: SessionState::Handshake,
            config,
            last_activity: now,
            last_heartbeat: None,
            user: None,
            attachment: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Connection id assigned at accept time.
    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// Caller record, `None` before `Hello`.
    pub fn user(&self) -> Option<&UserRecord> {
        self.user.as_ref()
    }

    /// Attached surface, `None` before `Hello`.
    pub fn attachment(&self) -> Option<&Attachment> {
        self.attachment.as_ref()
    }

    /// Conversation group name, if attached to the conversation surface.
    pub fn group(&self) -> Option<&str> {
        match &self.attachment {
            Some(Attachment::Conversation { group, .. }) => Some(group),
            _ => None,
        }
    }

    /// Process `Hello`.
    ///
    /// Presence attaches immediately. A conversation moves to
    /// [`SessionState::Joining`]; the caller reports the outcome through
    /// [`Self::joined`] or [`Self::join_failed`].
    ///
    /// # Errors
    ///
    /// - `SessionError::InvalidState` if not in `Handshake`
    /// - `SessionError::UnsupportedVersion` for any version but
    ///   [`PROTOCOL_VERSION`]
    /// - `SessionError::InvalidIdentity` if either identity fails validation
    /// - `SessionError::SelfConversation` if the peer is the caller
    pub fn accept_hello(&mut self, hello: &Hello, now: I) -> Result<Attachment, SessionError> {
        self.expect_state(SessionState::Handshake, "accept hello")?;

        if hello.version != PROTOCOL_VERSION {
            return Err(SessionError::UnsupportedVersion(hello.version));
        }

        let username = UserName::new(&hello.username)?;
        let attachment = match &hello.surface {
            Surface::Presence => Attachment::Presence,
            Surface::Conversation { with } => {
                let peer = UserName::new(with)?;
                if peer == username {
                    return Err(SessionError::SelfConversation);
                }
                let group = group_name(&username, &peer);
                Attachment::Conversation { peer, group }
            },
        };

        let known_as = hello.known_as.clone().unwrap_or_default();
        self.user = Some(UserRecord::new(username, known_as));
        self.state = match attachment {
            Attachment::Presence => SessionState::Presence,
            Attachment::Conversation { .. } => SessionState::Joining,
        };
        self.attachment = Some(attachment.clone());
        self.last_activity = now;

        Ok(attachment)
    }

    /// Group join committed.
    ///
    /// # Errors
    ///
    /// - `SessionError::InvalidState` if not in `Joining`
    pub fn joined(&mut self) -> Result<(), SessionError> {
        self.expect_state(SessionState::Joining, "complete join")?;
        self.state = SessionState::Joined;
        Ok(())
    }

    /// Group join failed; nothing was committed so the session just closes.
    pub fn join_failed(&mut self) {
        debug_assert_eq!(self.state, SessionState::Joining);
        self.state = SessionState::Closed;
    }

    /// Start a send or delete.
    ///
    /// # Errors
    ///
    /// - `SessionError::InvalidState` if not in `Joined`
    pub fn begin_send(&mut self) -> Result<(), SessionError> {
        self.expect_state(SessionState::Joined, "send")?;
        self.state = SessionState::Sending;
        Ok(())
    }

    /// Send or delete finished, successfully or not.
    pub fn finish_send(&mut self) {
        if self.state == SessionState::Sending {
            self.state = SessionState::Joined;
        }
    }

    /// Start disconnect cleanup. Valid from any live state.
    ///
    /// Returns the state the session was in.
    ///
    /// # Errors
    ///
    /// - `SessionError::InvalidState` if already `Leaving` or `Closed`
    pub fn begin_leave(&mut self) -> Result<SessionState, SessionError> {
        match self.state {
            SessionState::Leaving | SessionState::Closed => Err(SessionError::InvalidState {
                state: self.state,
                operation: "leave",
            }),
            previous => {
                self.state = SessionState::Leaving;
                Ok(previous)
            },
        }
    }

    /// Disconnect cleanup finished.
    pub fn left(&mut self) {
        self.state = SessionState::Closed;
    }

    /// Record inbound activity.
    pub fn touch(&mut self, now: I) {
        self.last_activity = now;
    }

    /// Elapsed time since last activity if the applicable timeout passed.
    pub fn check_timeout(&self, now: I) -> Option<Duration> {
        let timeout = match self.state {
            SessionState::Handshake => self.config.handshake_timeout,
            SessionState::Presence | SessionState::Joined => self.config.idle_timeout,
            // In-flight hub operations are bounded by the hub itself.
            _ => return None,
        };

        let elapsed = now - self.last_activity;
        if elapsed > timeout { Some(elapsed) } else { None }
    }

    /// Periodic maintenance: timeouts and heartbeats.
    pub fn tick(&mut self, now: I) -> Vec<SessionAction> {
        if let Some(elapsed) = self.check_timeout(now) {
            let reason = match self.state {
                SessionState::Handshake => format!("handshake timeout after {elapsed:?}"),
                _ => format!("idle timeout after {elapsed:?}"),
            };
            return vec![SessionAction::Close { reason }];
        }

        if !matches!(self.state, SessionState::Presence | SessionState::Joined) {
            return Vec::new();
        }

        let due = self.last_heartbeat.is_none_or(|last| now - last >= self.config.heartbeat_interval);
        if !due {
            return Vec::new();
        }

        self.last_heartbeat = Some(now);
        vec![SessionAction::SendFrame(Frame::new(FrameHeader::new(Opcode::Ping), Vec::new()))]
    }

    fn expect_state(&self, expected: SessionState, operation: &'static str) -> Result<(), SessionError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(SessionError::InvalidState { state: self.state, operation })
        }
    }
}
