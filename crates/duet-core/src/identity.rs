//! User and connection identities.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::IdentityError;

/// A validated, normalized user identity.
///
/// Identities are compared case-insensitively by lowercasing on
/// construction, so `"Alice"` and `"alice"` are the same user.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserName(String);

impl UserName {
    /// Maximum identity length in characters.
    pub const MAX_LEN: usize = 64;

    /// Validate and normalize a raw identity.
    ///
    /// # Errors
    ///
    /// - `IdentityError::Empty` if nothing remains after trimming
    /// - `IdentityError::TooLong` past [`Self::MAX_LEN`] characters
    /// - `IdentityError::InvalidCharacter` for inner whitespace or control
    ///   characters
    pub fn new(raw: impl AsRef<str>) -> Result<Self, IdentityError> {
        let normalized = raw.as_ref().trim().to_lowercase();

        if normalized.is_empty() {
            return Err(IdentityError::Empty);
        }

        let len = normalized.chars().count();
        if len > Self::MAX_LEN {
            return Err(IdentityError::TooLong { len, max: Self::MAX_LEN });
        }

        if let Some(c) = normalized.chars().find(|c| c.is_whitespace() || c.is_control()) {
            return Err(IdentityError::InvalidCharacter(c));
        }

        Ok(Self(normalized))
    }

    /// Normalized identity.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for UserName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Opaque identifier of one live network session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Wrap a raw id.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw id.
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl From<u64> for ConnectionId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}
