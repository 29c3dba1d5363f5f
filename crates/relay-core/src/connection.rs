//! Connection identity and the non-owning connection handle.
//!
//! The transport task owns the socket; everything else (registry,
//! broadcaster) talks to the connection through a [`ConnectionHandle`],
//! a cloneable sender of outbound commands.

use relay_protocol::ServerEvent;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;

/// Atomic counter for ensuring unique IDs even within the same nanosecond.
static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Unique identifier for a live connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    /// Create a new connection ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh connection ID.
    #[must_use]
    pub fn generate() -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as u64;
        let counter = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(format!("conn_{:x}_{:x}", timestamp, counter))
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ConnectionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Outbound command delivered to a connection's socket task.
#[derive(Debug, Clone)]
pub enum Outbound {
    /// Deliver an event to the peer.
    Deliver(Arc<ServerEvent>),
    /// Drop the transport. The socket task must exit its loop.
    Close,
}

/// Non-owning handle to a live connection.
///
/// Sends are non-blocking and best-effort: delivering to a connection whose
/// socket task has already exited is a no-op.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    tx: mpsc::UnboundedSender<Outbound>,
}

impl ConnectionHandle {
    /// Create a handle around an existing outbound sender.
    #[must_use]
    pub fn new(id: ConnectionId, tx: mpsc::UnboundedSender<Outbound>) -> Self {
        Self { id, tx }
    }

    /// Create a handle together with the receiving end of its outbound queue.
    ///
    /// The socket task drains the returned receiver.
    #[must_use]
    pub fn channel(id: ConnectionId) -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { id, tx }, rx)
    }

    /// Get the connection's unique identifier.
    #[must_use]
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Deliver an event to the connection.
    ///
    /// Returns `true` if the socket task is still draining its queue.
    pub fn deliver(&self, event: Arc<ServerEvent>) -> bool {
        self.tx.send(Outbound::Deliver(event)).is_ok()
    }

    /// Forcibly close the connection.
    ///
    /// The socket task drops the transport on receipt. Closing an already
    /// gone connection is a no-op.
    pub fn force_close(&self) {
        let _ = self.tx.send(Outbound::Close);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_generation() {
        let id1 = ConnectionId::generate();
        let id2 = ConnectionId::generate();
        assert_ne!(id1, id2);
        assert!(id1.as_str().starts_with("conn_"));
    }

    #[test]
    fn test_connection_id_from_string() {
        let id: ConnectionId = "test-id".into();
        assert_eq!(id.as_str(), "test-id");
    }

    #[tokio::test]
    async fn test_handle_deliver_and_close() {
        let (handle, mut rx) = ConnectionHandle::channel(ConnectionId::new("conn-1"));

        let event = Arc::new(ServerEvent::clients_updated(vec!["conn-1".into()]));
        assert!(handle.deliver(event));
        handle.force_close();

        assert!(matches!(rx.recv().await, Some(Outbound::Deliver(_))));
        assert!(matches!(rx.recv().await, Some(Outbound::Close)));
    }

    #[tokio::test]
    async fn test_deliver_to_gone_connection_is_noop() {
        let (handle, rx) = ConnectionHandle::channel(ConnectionId::new("conn-1"));
        drop(rx);

        let event = Arc::new(ServerEvent::message_from_server("Ada", "hi"));
        assert!(!handle.deliver(event));
        handle.force_close(); // Must not panic either
    }
}
