//! Error types for the Duet core.
//!
//! Identity validation and session state transitions each get their own enum.
//! Both are client errors: the peer sent something the hub will not act on.

use thiserror::Error;

use crate::session::SessionState;

/// Errors from the per-connection session state machine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Invalid state transition attempted
    #[error("invalid state transition: cannot {operation} from {state:?}")]
    InvalidState {
        /// State when the error occurred
        state: SessionState,
        /// Operation that was attempted
        operation: &'static str,
    },

    /// A conversation needs two distinct participants
    #[error("cannot open a conversation with yourself")]
    SelfConversation,

    /// Unsupported protocol version in `Hello`
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    /// Caller or peer identity failed validation
    #[error("invalid identity: {0}")]
    InvalidIdentity(#[from] IdentityError),
}

/// Errors from validating a user identity.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    /// Identity is empty after trimming
    #[error("user name is empty")]
    Empty,

    /// Identity exceeds the maximum length
    #[error("user name is {len} characters long (max {max})")]
    TooLong {
        /// Actual length in characters
        len: usize,
        /// Maximum allowed length
        max: usize,
    },

    /// Identity contains whitespace or a control character
    #[error("user name contains invalid character {0:?}")]
    InvalidCharacter(char),
}
