//! # relay-core
//!
//! Connection registry, session handshake, and broadcast routing for the
//! Relay realtime chat server.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **Registry** - authoritative set of live, authenticated connections
//! - **SessionHandshake** - accept, authenticate, register, announce
//! - **Broadcaster** - fan out chat and presence events to all connections
//! - **Principal** - the authenticated identity behind a connection
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌───────────────┐     ┌─────────────┐
//! │  Connection │────▶│   Handshake   │────▶│  Registry   │
//! └─────────────┘     └───────────────┘     └─────────────┘
//!                            │                     ▲
//!                            ▼                     │
//!                     ┌─────────────┐              │
//!                     │ Broadcaster │──────────────┘
//!                     └─────────────┘
//! ```
//!
//! Authentication is delegated to two external collaborators, modeled as
//! traits: a [`CredentialVerifier`] that validates bearer tokens and a
//! [`PrincipalDirectory`] that resolves principal identity and state.

pub mod broadcast;
pub mod connection;
pub mod principal;
pub mod registry;
pub mod session;

pub use broadcast::Broadcaster;
pub use connection::{ConnectionHandle, ConnectionId, Outbound};
pub use principal::{
    CredentialVerifier, DirectoryError, Principal, PrincipalDirectory, PrincipalId, VerifyError,
};
pub use registry::{Registry, RegistryError};
pub use session::{HandshakeError, RegisteredSession, SessionHandshake, SessionState};
