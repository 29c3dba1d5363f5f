//! In-memory principal directory.
//!
//! The core only needs existence, active flag, and display name, so the
//! server backs the directory with a map seeded from configuration. Any
//! other store can replace this without touching the core.

use crate::config::PrincipalSeed;
use async_trait::async_trait;
use relay_core::{DirectoryError, Principal, PrincipalDirectory, PrincipalId};
use std::collections::HashMap;

/// Directory backed by a fixed in-memory table.
#[derive(Debug, Default)]
pub struct StaticDirectory {
    principals: HashMap<PrincipalId, Principal>,
}

impl StaticDirectory {
    /// Build a directory from configuration seeds.
    #[must_use]
    pub fn from_seeds(seeds: &[PrincipalSeed]) -> Self {
        Self {
            principals: seeds
                .iter()
                .map(|seed| {
                    let principal = Principal {
                        id: PrincipalId::new(&seed.id),
                        full_name: seed.full_name.clone(),
                        is_active: seed.active,
                    };
                    (principal.id.clone(), principal)
                })
                .collect(),
        }
    }

    /// Number of known principals.
    #[must_use]
    pub fn len(&self) -> usize {
        self.principals.len()
    }

    /// Check whether the directory is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.principals.is_empty()
    }
}

#[async_trait]
impl PrincipalDirectory for StaticDirectory {
    async fn lookup(&self, id: &PrincipalId) -> Result<Option<Principal>, DirectoryError> {
        Ok(self.principals.get(id).cloned())
    }
}
