//! The connection registry.
//!
//! The registry is the single authoritative, in-memory set of live
//! authenticated connections. It enforces the single-session invariant: at
//! most one live connection per principal at any time. It holds no state
//! across process restarts.

use crate::connection::{ConnectionHandle, ConnectionId};
use crate::principal::{Principal, PrincipalId};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::debug;

/// Registry errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The principal is not active and may not hold a session.
    #[error("Principal {0} is not active")]
    InactivePrincipal(PrincipalId),
}

/// A registered connection: the live handle plus the principal snapshot
/// taken at handshake time.
#[derive(Debug, Clone)]
struct RegistryEntry {
    handle: ConnectionHandle,
    principal: Principal,
}

/// Interior state, guarded by a single mutex so that compound operations
/// (evict-then-admit) are atomic with respect to every other mutation.
#[derive(Debug, Default)]
struct Inner {
    /// Entries keyed by connection ID.
    entries: HashMap<ConnectionId, RegistryEntry>,
    /// Index from principal ID to its single live connection.
    by_principal: HashMap<PrincipalId, ConnectionId>,
    /// Insertion order, for presence snapshots.
    order: Vec<ConnectionId>,
}

/// The authoritative set of live, authenticated connections.
///
/// All mutation is serialized; readers observe a consistent state relative
/// to concurrent admits and removals. Critical sections are short - fan-out
/// to connections happens outside the lock, via handle snapshots.
#[derive(Debug, Default)]
pub struct Registry {
    inner: Mutex<Inner>,
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn locked(&self) -> MutexGuard<'_, Inner> {
        // A poisoned lock means a panic mid-mutation elsewhere; the state
        // itself is still structurally valid, so keep serving.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Admit an authenticated connection.
    ///
    /// If an entry already exists for the same principal, that entry's
    /// connection is forcibly closed and removed before the new entry is
    /// inserted. The whole operation runs in one critical section, so no
    /// interleaving can observe two entries for one principal.
    ///
    /// Returns the evicted connection ID, if any.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InactivePrincipal`] if the principal is not
    /// active. The registry is left untouched in that case.
    pub fn admit(
        &self,
        handle: ConnectionHandle,
        principal: Principal,
    ) -> Result<Option<ConnectionId>, RegistryError> {
        if !principal.is_active {
            return Err(RegistryError::InactivePrincipal(principal.id));
        }

        let connection_id = handle.id().clone();
        let mut inner = self.locked();

        // Evict-then-admit: close and drop any prior session for this
        // principal before the new entry becomes visible.
        let evicted = inner.by_principal.remove(&principal.id);
        if let Some(old_id) = &evicted {
            if let Some(old) = inner.entries.remove(old_id) {
                old.handle.force_close();
            }
            inner.order.retain(|id| id != old_id);
            debug!(principal = %principal.id, connection = %old_id, "Evicted prior session");
        }

        inner
            .by_principal
            .insert(principal.id.clone(), connection_id.clone());
        inner.order.push(connection_id.clone());
        inner.entries.insert(
            connection_id.clone(),
            RegistryEntry { handle, principal: principal.clone() },
        );

        debug!(
            principal = %principal.id,
            connection = %connection_id,
            registered = inner.entries.len(),
            "Admitted connection"
        );

        Ok(evicted)
    }

    /// Remove a connection.
    ///
    /// Idempotent: removing an unknown ID is a no-op, which absorbs
    /// double-disconnect races.
    pub fn remove(&self, connection_id: &ConnectionId) {
        let mut inner = self.locked();

        let Some(entry) = inner.entries.remove(connection_id) else {
            return;
        };

        // Only clear the principal index if it still points at this
        // connection; an eviction may already have re-pointed it.
        if inner.by_principal.get(&entry.principal.id) == Some(connection_id) {
            inner.by_principal.remove(&entry.principal.id);
        }
        inner.order.retain(|id| id != connection_id);

        debug!(
            principal = %entry.principal.id,
            connection = %connection_id,
            registered = inner.entries.len(),
            "Removed connection"
        );
    }

    /// Connection IDs of all registered connections, in insertion order.
    ///
    /// The order is a display convenience, not a correctness guarantee.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ConnectionId> {
        self.locked().order.clone()
    }

    /// The cached display name for a connection's principal.
    ///
    /// `None` means the connection is not (or no longer) registered; callers
    /// must treat that as a legitimate race outcome, not an error.
    #[must_use]
    pub fn display_name_of(&self, connection_id: &ConnectionId) -> Option<String> {
        self.locked()
            .entries
            .get(connection_id)
            .map(|entry| entry.principal.full_name.clone())
    }

    /// Point-in-time copy of all live handles, in insertion order.
    ///
    /// Used for fan-out: the copy is taken under the lock, the sends happen
    /// without it.
    #[must_use]
    pub fn handles(&self) -> Vec<ConnectionHandle> {
        let inner = self.locked();
        inner
            .order
            .iter()
            .filter_map(|id| inner.entries.get(id).map(|entry| entry.handle.clone()))
            .collect()
    }

    /// Consistent pair of (snapshot, handles), taken in one critical section.
    #[must_use]
    pub fn presence_targets(&self) -> (Vec<ConnectionId>, Vec<ConnectionHandle>) {
        let inner = self.locked();
        let ids = inner.order.clone();
        let handles = inner
            .order
            .iter()
            .filter_map(|id| inner.entries.get(id).map(|entry| entry.handle.clone()))
            .collect();
        (ids, handles)
    }

    /// Number of registered connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.locked().entries.len()
    }

    /// Check whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.locked().entries.is_empty()
    }
}
