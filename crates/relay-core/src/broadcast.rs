//! Broadcast routing.
//!
//! The broadcaster dispatches inbound chat events and presence
//! announcements to every registered connection. Fan-out is best-effort: a
//! connection that joins or leaves mid-fan-out may or may not receive a
//! particular event.

use crate::connection::{ConnectionHandle, ConnectionId};
use crate::registry::Registry;
use relay_protocol::ServerEvent;
use std::sync::Arc;
use tracing::{debug, trace};

/// Fans out chat and presence events to all registered connections.
#[derive(Debug, Clone)]
pub struct Broadcaster {
    registry: Arc<Registry>,
}

impl Broadcaster {
    /// Create a broadcaster over a registry.
    #[must_use]
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    /// Broadcast the current connection set to every registered connection.
    ///
    /// Called after every admit and every remove. Returns the number of
    /// connections the announcement was delivered to.
    pub fn announce_presence(&self) -> usize {
        // Ids and handles come from one critical section; the sends happen
        // with the registry lock released.
        let (ids, handles) = self.registry.presence_targets();
        let event = Arc::new(ServerEvent::clients_updated(
            ids.iter().map(|id| id.as_str().to_string()).collect(),
        ));

        let count = fan_out(&handles, &event);
        debug!(clients = ids.len(), recipients = count, "Announced presence");
        count
    }

    /// Dispatch an inbound chat event from a connection.
    ///
    /// The sender's display name is resolved against the registry at
    /// dispatch time. If the sender is no longer registered the event is
    /// silently dropped: not re-queued, not retried, zero outbound events.
    ///
    /// Returns the number of connections the message was delivered to.
    pub fn handle_chat(&self, sender: &ConnectionId, message: impl Into<String>) -> usize {
        let Some(full_name) = self.registry.display_name_of(sender) else {
            trace!(connection = %sender, "Dropped chat event from unregistered sender");
            return 0;
        };

        let event = Arc::new(ServerEvent::message_from_server(full_name, message));
        let count = fan_out(&self.registry.handles(), &event);
        debug!(connection = %sender, recipients = count, "Dispatched chat event");
        count
    }
}

fn fan_out(handles: &[ConnectionHandle], event: &Arc<ServerEvent>) -> usize {
    handles
        .iter()
        .filter(|handle| handle.deliver(event.clone()))
        .count()
}
