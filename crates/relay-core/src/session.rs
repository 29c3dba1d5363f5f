//! Session handshake.
//!
//! Each incoming connection walks the state machine
//! `Connecting -> Authenticating -> Registered -> Closed`. The handshake
//! orchestrates credential verification, directory lookup, registry
//! admission, and the presence announcement that follows. Authentication
//! failures are terminal for the attempt: the transport is closed with no
//! reason payload so a rejected peer learns nothing about which step
//! failed.

use crate::broadcast::Broadcaster;
use crate::connection::{ConnectionHandle, ConnectionId};
use crate::principal::{
    CredentialVerifier, DirectoryError, Principal, PrincipalDirectory, VerifyError,
};
use crate::registry::{Registry, RegistryError};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Default bound on credential verification and directory lookup.
///
/// An unbounded handshake would leak a pending connection slot if the
/// verifier or directory hangs; expiry is treated as a credential failure.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Lifecycle states of a connection's session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Transport accepted, credential not yet examined.
    Connecting,
    /// Credential extracted; verification and directory lookup in flight.
    Authenticating,
    /// Admitted to the registry and announced.
    Registered,
    /// Removed from the registry (or never admitted).
    Closed,
}

/// Handshake failures. All variants are terminal for the attempt and none
/// are surfaced to the rejected peer.
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// No credential was presented at connect time.
    #[error("No credential presented")]
    MissingCredential,

    /// The credential was malformed, expired, or unsigned.
    #[error("Credential rejected")]
    CredentialRejected,

    /// The verifier could not be reached.
    #[error("Verifier unavailable: {0}")]
    VerifierUnavailable(String),

    /// The principal does not exist.
    #[error("Unknown principal")]
    UnknownPrincipal,

    /// The principal exists but is not active.
    #[error("Inactive principal")]
    InactivePrincipal,

    /// The directory could not be reached.
    #[error("Directory unavailable: {0}")]
    DirectoryUnavailable(String),

    /// Verification or lookup did not complete within the handshake bound.
    #[error("Handshake timed out")]
    TimedOut,
}

impl From<VerifyError> for HandshakeError {
    fn from(err: VerifyError) -> Self {
        match err {
            VerifyError::InvalidCredential => HandshakeError::CredentialRejected,
            VerifyError::Unavailable(reason) => HandshakeError::VerifierUnavailable(reason),
        }
    }
}

impl From<DirectoryError> for HandshakeError {
    fn from(err: DirectoryError) -> Self {
        match err {
            DirectoryError::Unavailable(reason) => HandshakeError::DirectoryUnavailable(reason),
        }
    }
}

impl From<RegistryError> for HandshakeError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::InactivePrincipal(_) => HandshakeError::InactivePrincipal,
        }
    }
}

/// Orchestrates accept -> authenticate -> register -> announce.
#[derive(Clone)]
pub struct SessionHandshake {
    verifier: Arc<dyn CredentialVerifier>,
    directory: Arc<dyn PrincipalDirectory>,
    registry: Arc<Registry>,
    broadcaster: Broadcaster,
    timeout: Duration,
}

impl SessionHandshake {
    /// Create a handshake orchestrator with the default timeout.
    #[must_use]
    pub fn new(
        verifier: Arc<dyn CredentialVerifier>,
        directory: Arc<dyn PrincipalDirectory>,
        registry: Arc<Registry>,
    ) -> Self {
        let broadcaster = Broadcaster::new(registry.clone());
        Self {
            verifier,
            directory,
            registry,
            broadcaster,
            timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }

    /// Override the verification/lookup timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run the handshake for an incoming connection.
    ///
    /// The registry is untouched until both the credential and the
    /// directory lookup succeed; a failed handshake leaves no state behind.
    /// On success the connection is admitted (evicting any prior session
    /// for the same principal) and the updated connection set is announced
    /// to every registered connection, the new one included.
    ///
    /// # Errors
    ///
    /// Returns a [`HandshakeError`] describing the failed step. Callers
    /// must close the transport without relaying the reason.
    pub async fn admit(
        &self,
        handle: ConnectionHandle,
        credential: Option<&str>,
    ) -> Result<RegisteredSession, HandshakeError> {
        let connection_id = handle.id().clone();
        debug!(connection = %connection_id, state = ?SessionState::Authenticating, "Handshake started");

        let token = credential.ok_or(HandshakeError::MissingCredential)?;

        let principal_id = tokio::time::timeout(self.timeout, self.verifier.verify(token))
            .await
            .map_err(|_| HandshakeError::TimedOut)??;

        let principal = tokio::time::timeout(self.timeout, self.directory.lookup(&principal_id))
            .await
            .map_err(|_| HandshakeError::TimedOut)??
            .ok_or(HandshakeError::UnknownPrincipal)?;

        if !principal.is_active {
            return Err(HandshakeError::InactivePrincipal);
        }

        let evicted = self.registry.admit(handle, principal.clone())?;
        if let Some(old_id) = evicted {
            debug!(connection = %connection_id, evicted = %old_id, "Replaced prior session");
        }

        debug!(
            connection = %connection_id,
            principal = %principal.id,
            state = ?SessionState::Registered,
            "Handshake complete"
        );
        self.broadcaster.announce_presence();

        Ok(RegisteredSession {
            connection_id,
            principal,
            registry: self.registry.clone(),
            broadcaster: self.broadcaster.clone(),
        })
    }
}

/// A connection that completed the handshake.
///
/// Dropping the session without calling [`close`](Self::close) leaks the
/// registry entry until the same principal reconnects; the socket task must
/// close the session when its transport ends for any reason.
pub struct RegisteredSession {
    connection_id: ConnectionId,
    principal: Principal,
    registry: Arc<Registry>,
    broadcaster: Broadcaster,
}

impl RegisteredSession {
    /// The connection's unique identifier.
    #[must_use]
    pub fn connection_id(&self) -> &ConnectionId {
        &self.connection_id
    }

    /// The principal snapshot taken at handshake time.
    #[must_use]
    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    /// Transition to `Closed`: remove the registry entry (idempotent, the
    /// entry may already be gone after an eviction) and announce the
    /// updated connection set.
    pub fn close(self) {
        self.registry.remove(&self.connection_id);
        debug!(
            connection = %self.connection_id,
            principal = %self.principal.id,
            state = ?SessionState::Closed,
            "Session closed"
        );
        self.broadcaster.announce_presence();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Outbound;
    use crate::principal::PrincipalId;
    use async_trait::async_trait;
    use relay_protocol::ServerEvent;
    use std::collections::HashMap;
    use tokio::sync::mpsc::UnboundedReceiver;

    /// Verifier backed by a fixed token table.
    struct TableVerifier {
        tokens: HashMap<String, PrincipalId>,
    }

    impl TableVerifier {
        fn new(tokens: &[(&str, &str)]) -> Self {
            Self {
                tokens: tokens
                    .iter()
                    .map(|(token, id)| (token.to_string(), PrincipalId::new(*id)))
                    .collect(),
            }
        }
    }

    #[async_trait]
    impl CredentialVerifier for TableVerifier {
        async fn verify(&self, token: &str) -> Result<PrincipalId, VerifyError> {
            self.tokens
                .get(token)
                .cloned()
                .ok_or(VerifyError::InvalidCredential)
        }
    }

    /// Verifier that never resolves.
    struct HangingVerifier;

    #[async_trait]
    impl CredentialVerifier for HangingVerifier {
        async fn verify(&self, _token: &str) -> Result<PrincipalId, VerifyError> {
            std::future::pending().await
        }
    }

    /// Directory backed by a fixed principal table.
    struct TableDirectory {
        principals: HashMap<PrincipalId, Principal>,
    }

    impl TableDirectory {
        fn new(principals: Vec<Principal>) -> Self {
            Self {
                principals: principals
                    .into_iter()
                    .map(|p| (p.id.clone(), p))
                    .collect(),
            }
        }
    }

    #[async_trait]
    impl PrincipalDirectory for TableDirectory {
        async fn lookup(&self, id: &PrincipalId) -> Result<Option<Principal>, DirectoryError> {
            Ok(self.principals.get(id).cloned())
        }
    }

    /// Directory that always fails.
    struct DownDirectory;

    #[async_trait]
    impl PrincipalDirectory for DownDirectory {
        async fn lookup(&self, _id: &PrincipalId) -> Result<Option<Principal>, DirectoryError> {
            Err(DirectoryError::Unavailable("connection refused".into()))
        }
    }

    fn handshake() -> (SessionHandshake, Arc<Registry>) {
        let registry = Arc::new(Registry::new());
        let verifier = Arc::new(TableVerifier::new(&[("token-u1", "u1"), ("token-u2", "u2")]));
        let directory = Arc::new(TableDirectory::new(vec![
            Principal::new("u1", "Ada Lovelace"),
            Principal::new("u2", "Grace Hopper"),
            Principal::new("u3", "Gone User").inactive(),
        ]));
        (
            SessionHandshake::new(verifier, directory, registry.clone()),
            registry,
        )
    }

    fn drain(rx: &mut UnboundedReceiver<Outbound>) -> Vec<Outbound> {
        let mut out = Vec::new();
        while let Ok(cmd) = rx.try_recv() {
            out.push(cmd);
        }
        out
    }

    fn delivered(rx: &mut UnboundedReceiver<Outbound>) -> Vec<ServerEvent> {
        drain(rx)
            .into_iter()
            .filter_map(|cmd| match cmd {
                Outbound::Deliver(event) => Some((*event).clone()),
                Outbound::Close => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_valid_connect_announces_single_client() {
        let (handshake, registry) = handshake();

        let (handle, mut rx) = ConnectionHandle::channel(ConnectionId::new("conn-1"));
        let session = handshake.admit(handle, Some("token-u1")).await.unwrap();

        assert_eq!(session.principal().full_name, "Ada Lovelace");
        assert_eq!(registry.len(), 1);

        // The new connection receives the announcement too.
        let events = delivered(&mut rx);
        assert_eq!(
            events,
            vec![ServerEvent::clients_updated(vec!["conn-1".into()])]
        );
    }

    #[tokio::test]
    async fn test_same_principal_reconnect_evicts_first() {
        let (handshake, registry) = handshake();

        let (handle1, mut rx1) = ConnectionHandle::channel(ConnectionId::new("conn-1"));
        let _session1 = handshake.admit(handle1, Some("token-u1")).await.unwrap();

        let (handle2, mut rx2) = ConnectionHandle::channel(ConnectionId::new("conn-2"));
        let _session2 = handshake.admit(handle2, Some("token-u1")).await.unwrap();

        // First connection was force-closed.
        let commands = drain(&mut rx1);
        assert!(commands
            .iter()
            .any(|cmd| matches!(cmd, Outbound::Close)));

        // Still exactly one entry, under the new connection ID.
        assert_eq!(registry.snapshot(), vec![ConnectionId::new("conn-2")]);
        let events = delivered(&mut rx2);
        assert_eq!(
            events,
            vec![ServerEvent::clients_updated(vec!["conn-2".into()])]
        );
    }

    #[tokio::test]
    async fn test_invalid_token_closes_without_announcement() {
        let (handshake, registry) = handshake();

        let (observer, mut observer_rx) = ConnectionHandle::channel(ConnectionId::new("conn-0"));
        let _session = handshake.admit(observer, Some("token-u2")).await.unwrap();
        drain(&mut observer_rx);

        let (handle, mut rx) = ConnectionHandle::channel(ConnectionId::new("conn-1"));
        let result = handshake.admit(handle, Some("bad-token")).await;

        assert!(matches!(result, Err(HandshakeError::CredentialRejected)));
        assert_eq!(registry.len(), 1);
        // Neither the rejected peer nor anyone else hears about it.
        assert!(delivered(&mut rx).is_empty());
        assert!(delivered(&mut observer_rx).is_empty());
    }

    #[tokio::test]
    async fn test_missing_token_rejected() {
        let (handshake, registry) = handshake();

        let (handle, _rx) = ConnectionHandle::channel(ConnectionId::new("conn-1"));
        let result = handshake.admit(handle, None).await;

        assert!(matches!(result, Err(HandshakeError::MissingCredential)));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_and_inactive_principals_rejected() {
        let registry = Arc::new(Registry::new());
        let verifier = Arc::new(TableVerifier::new(&[
            ("token-ghost", "ghost"),
            ("token-u3", "u3"),
        ]));
        let directory = Arc::new(TableDirectory::new(vec![Principal::new(
            "u3",
            "Gone User",
        )
        .inactive()]));
        let handshake = SessionHandshake::new(verifier, directory, registry.clone());

        let (handle, _rx) = ConnectionHandle::channel(ConnectionId::new("conn-1"));
        let result = handshake.admit(handle, Some("token-ghost")).await;
        assert!(matches!(result, Err(HandshakeError::UnknownPrincipal)));

        let (handle, _rx) = ConnectionHandle::channel(ConnectionId::new("conn-2"));
        let result = handshake.admit(handle, Some("token-u3")).await;
        assert!(matches!(result, Err(HandshakeError::InactivePrincipal)));

        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_directory_failure_leaves_registry_untouched() {
        let registry = Arc::new(Registry::new());
        let verifier = Arc::new(TableVerifier::new(&[("token-u1", "u1")]));
        let handshake =
            SessionHandshake::new(verifier, Arc::new(DownDirectory), registry.clone());

        let (handle, _rx) = ConnectionHandle::channel(ConnectionId::new("conn-1"));
        let result = handshake.admit(handle, Some("token-u1")).await;

        assert!(matches!(result, Err(HandshakeError::DirectoryUnavailable(_))));
        assert!(registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_verifier_times_out() {
        let registry = Arc::new(Registry::new());
        let directory = Arc::new(TableDirectory::new(vec![Principal::new("u1", "Ada")]));
        let handshake = SessionHandshake::new(Arc::new(HangingVerifier), directory, registry.clone())
            .with_timeout(Duration::from_millis(100));

        let (handle, _rx) = ConnectionHandle::channel(ConnectionId::new("conn-1"));
        let result = handshake.admit(handle, Some("any-token")).await;

        assert!(matches!(result, Err(HandshakeError::TimedOut)));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_chat_fan_out_between_registered_sessions() {
        let (handshake, registry) = handshake();
        let broadcaster = Broadcaster::new(registry.clone());

        let (handle1, mut rx1) = ConnectionHandle::channel(ConnectionId::new("conn-1"));
        let session1 = handshake.admit(handle1, Some("token-u1")).await.unwrap();
        let (handle2, mut rx2) = ConnectionHandle::channel(ConnectionId::new("conn-2"));
        let _session2 = handshake.admit(handle2, Some("token-u2")).await.unwrap();
        drain(&mut rx1);
        drain(&mut rx2);

        let count = broadcaster.handle_chat(session1.connection_id(), "hi");
        assert_eq!(count, 2);

        let expected = ServerEvent::message_from_server("Ada Lovelace", "hi");
        assert_eq!(delivered(&mut rx1), vec![expected.clone()]);
        assert_eq!(delivered(&mut rx2), vec![expected]);
    }

    #[tokio::test]
    async fn test_disconnect_announces_remaining_and_drops_stale_sender() {
        let (handshake, registry) = handshake();
        let broadcaster = Broadcaster::new(registry.clone());

        let (handle1, mut rx1) = ConnectionHandle::channel(ConnectionId::new("conn-1"));
        let session1 = handshake.admit(handle1, Some("token-u1")).await.unwrap();
        let (handle2, mut rx2) = ConnectionHandle::channel(ConnectionId::new("conn-2"));
        let _session2 = handshake.admit(handle2, Some("token-u2")).await.unwrap();
        drain(&mut rx1);
        drain(&mut rx2);

        let stale_id = session1.connection_id().clone();
        session1.close();

        assert_eq!(
            delivered(&mut rx2),
            vec![ServerEvent::clients_updated(vec!["conn-2".into()])]
        );

        // Chat from the stale handle produces zero outbound events.
        assert_eq!(broadcaster.handle_chat(&stale_id, "too late"), 0);
        assert!(delivered(&mut rx2).is_empty());
    }
}
