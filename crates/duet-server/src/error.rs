//! Runtime error types.

use std::fmt;

use crate::{server_error::HubError, storage::StorageError};

/// Errors that stop the server or a single connection.
#[derive(Debug)]
pub enum ServerError {
    /// Invalid bind address, unreadable TLS material, unusable data dir.
    ///
    /// Fatal at startup.
    Config(String),

    /// QUIC endpoint or stream failure.
    ///
    /// Fatal for the affected connection only, unless raised while binding.
    Transport(String),

    /// Peer sent bytes that do not frame.
    Protocol(String),

    /// Unexpected runtime state. Indicates a bug.
    Internal(String),

    /// Hub operation failed outside a client request.
    Hub(HubError),

    /// Store could not be opened or prepared.
    Storage(StorageError),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "configuration error: {msg}"),
            Self::Transport(msg) => write!(f, "transport error: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol error: {msg}"),
            Self::Internal(msg) => write!(f, "internal error: {msg}"),
            Self::Hub(err) => write!(f, "hub error: {err}"),
            Self::Storage(err) => write!(f, "storage error: {err}"),
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Hub(err) => Some(err),
            Self::Storage(err) => Some(err),
            _ => None,
        }
    }
}

impl From<HubError> for ServerError {
    fn from(err: HubError) -> Self {
        Self::Hub(err)
    }
}

impl From<StorageError> for ServerError {
    fn from(err: StorageError) -> Self {
        Self::Storage(err)
    }
}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}
