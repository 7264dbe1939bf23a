//! Duet core: pure coordination logic for two-party conversations.
//!
//! Nothing in this crate performs I/O. Time and randomness come from an
//! [`env::Environment`], persistence and delivery live in `duet-server`.
//!
//! # Components
//!
//! - [`identity`]: validated user names and opaque connection ids
//! - [`group`]: deterministic conversation-group naming and membership sets
//! - [`message`]: the durable message entity and user records
//! - [`presence::PresenceRegistry`]: process-wide user -> live connections map
//! - [`session::Session`]: per-connection state machine

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod env;
pub mod error;
pub mod group;
pub mod identity;
pub mod message;
pub mod presence;
pub mod session;

pub use error::{IdentityError, SessionError};
pub use group::{Connection, ConversationGroup, group_name};
pub use identity::{ConnectionId, UserName};
pub use message::{Message, UserRecord};
pub use presence::PresenceRegistry;
pub use session::{Attachment, Session, SessionAction, SessionConfig, SessionState};
