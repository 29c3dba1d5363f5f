//! Event types for the Relay protocol.
//!
//! Events are tagged with their wire name under an `event` field, matching
//! the names the browser client subscribes to.

use serde::{Deserialize, Serialize};

/// An event sent by a client to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum ClientEvent {
    /// A chat message from the client.
    #[serde(rename = "message-from-client")]
    MessageFromClient {
        /// Message body.
        message: String,
    },
}

impl ClientEvent {
    /// Create a new `message-from-client` event.
    #[must_use]
    pub fn message_from_client(message: impl Into<String>) -> Self {
        ClientEvent::MessageFromClient {
            message: message.into(),
        }
    }

    /// Get the wire name of the event.
    #[must_use]
    pub fn event_name(&self) -> &'static str {
        match self {
            ClientEvent::MessageFromClient { .. } => "message-from-client",
        }
    }
}

/// An event sent by the server to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum ServerEvent {
    /// Presence announcement carrying the connected set.
    ///
    /// Connection identifiers are listed in registration order.
    #[serde(rename = "clients-updated")]
    ClientsUpdated {
        /// Connection identifiers of all registered connections.
        clients: Vec<String>,
    },

    /// A chat message fanned out to all registered connections.
    #[serde(rename = "message-from-server")]
    MessageFromServer {
        /// Display name of the sender's principal.
        #[serde(rename = "fullName")]
        full_name: String,
        /// Message body.
        message: String,
    },
}

impl ServerEvent {
    /// Create a new `clients-updated` event.
    #[must_use]
    pub fn clients_updated(clients: Vec<String>) -> Self {
        ServerEvent::ClientsUpdated { clients }
    }

    /// Create a new `message-from-server` event.
    #[must_use]
    pub fn message_from_server(full_name: impl Into<String>, message: impl Into<String>) -> Self {
        ServerEvent::MessageFromServer {
            full_name: full_name.into(),
            message: message.into(),
        }
    }

    /// Get the wire name of the event.
    #[must_use]
    pub fn event_name(&self) -> &'static str {
        match self {
            ServerEvent::ClientsUpdated { .. } => "clients-updated",
            ServerEvent::MessageFromServer { .. } => "message-from-server",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_names() {
        let chat = ClientEvent::message_from_client("hi");
        assert_eq!(chat.event_name(), "message-from-client");

        let presence = ServerEvent::clients_updated(vec!["conn-1".into()]);
        assert_eq!(presence.event_name(), "clients-updated");

        let outbound = ServerEvent::message_from_server("Ada", "hi");
        assert_eq!(outbound.event_name(), "message-from-server");
    }

    #[test]
    fn test_client_event_wire_shape() {
        let event = ClientEvent::message_from_client("hello");
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({"event": "message-from-client", "message": "hello"})
        );
    }

    #[test]
    fn test_server_event_wire_shape() {
        let event = ServerEvent::message_from_server("Ada Lovelace", "hello");
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({
                "event": "message-from-server",
                "fullName": "Ada Lovelace",
                "message": "hello"
            })
        );

        let event = ServerEvent::clients_updated(vec!["a".into(), "b".into()]);
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({"event": "clients-updated", "clients": ["a", "b"]})
        );
    }

    #[test]
    fn test_clients_updated_preserves_order() {
        let ids = vec!["c".to_string(), "a".to_string(), "b".to_string()];
        let event = ServerEvent::clients_updated(ids.clone());
        match event {
            ServerEvent::ClientsUpdated { clients } => assert_eq!(clients, ids),
            other => panic!("Unexpected event: {:?}", other),
        }
    }
}
