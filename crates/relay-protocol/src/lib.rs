//! # relay-protocol
//!
//! Wire event definitions for the Relay realtime chat server.
//!
//! This crate defines the events exchanged between clients and the server,
//! plus the length-prefixed MessagePack codec used to carry them over a
//! binary transport.
//!
//! ## Events
//!
//! - `message-from-client` - inbound chat message
//! - `message-from-server` - outbound chat message, attributed to a sender
//! - `clients-updated` - presence announcement with the connected set
//!
//! ## Example
//!
//! ```rust
//! use relay_protocol::{codec, ServerEvent};
//!
//! let event = ServerEvent::message_from_server("Ada Lovelace", "hello");
//!
//! let encoded = codec::encode(&event).unwrap();
//! let decoded: ServerEvent = codec::decode(&encoded).unwrap();
//! assert_eq!(event, decoded);
//! ```

pub mod codec;
pub mod events;

pub use codec::{decode, encode, ProtocolError};
pub use events::{ClientEvent, ServerEvent};
