//! Principal identity and the external authentication collaborators.
//!
//! A principal is the authenticated identity behind a connection. Relay does
//! not own principal data; it consumes two external collaborators, modeled
//! as traits so the server can back them with any token scheme or store.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Unique identifier for a principal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PrincipalId(pub String);

impl PrincipalId {
    /// Create a new principal ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PrincipalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for PrincipalId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for PrincipalId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Snapshot of a principal, taken from the directory at handshake time.
///
/// The registry caches this snapshot for the lifetime of a session; it is
/// never re-fetched mid-session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// Principal identifier.
    pub id: PrincipalId,
    /// Display name used to attribute chat messages.
    pub full_name: String,
    /// Whether the principal may hold a session.
    pub is_active: bool,
}

impl Principal {
    /// Create a new active principal.
    #[must_use]
    pub fn new(id: impl Into<PrincipalId>, full_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            full_name: full_name.into(),
            is_active: true,
        }
    }

    /// Mark the principal inactive.
    #[must_use]
    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }
}

/// Credential verification errors.
#[derive(Debug, Error)]
pub enum VerifyError {
    /// The token is malformed, expired, or carries a bad signature.
    ///
    /// Deliberately opaque: rejected peers learn nothing about which check
    /// failed.
    #[error("Credential rejected")]
    InvalidCredential,

    /// The verifier could not be reached.
    #[error("Verifier unavailable: {0}")]
    Unavailable(String),
}

/// Principal directory errors.
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// The directory could not be reached.
    #[error("Directory unavailable: {0}")]
    Unavailable(String),
}

/// Validates an opaque signed token and resolves the principal identifier.
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    /// Verify a bearer token.
    ///
    /// # Errors
    ///
    /// Returns [`VerifyError::InvalidCredential`] for any rejected token and
    /// [`VerifyError::Unavailable`] when verification cannot be performed.
    async fn verify(&self, token: &str) -> Result<PrincipalId, VerifyError>;
}

/// Resolves principal identity and state.
#[async_trait]
pub trait PrincipalDirectory: Send + Sync {
    /// Look up a principal by identifier.
    ///
    /// Returns `Ok(None)` when the principal does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError::Unavailable`] when the lookup cannot be
    /// performed.
    async fn lookup(&self, id: &PrincipalId) -> Result<Option<Principal>, DirectoryError>;
}
