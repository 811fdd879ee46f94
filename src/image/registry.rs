//! Token to entity registrations, with explicit collision handling.

use std::sync::Mutex;

use rustc_hash::FxHashMap;

use crate::{image::entity::EntityId, metadata::token::Token, Error, Result};

/// What to do when a token is registered twice.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TokenCollision {
    /// The token must not be registered yet; a duplicate is an error.
    New,
    /// Re-registration is allowed if it maps to the same entity.
    SameOk,
    /// Re-registration overwrites the previous entity.
    Replace,
}

/// Maps emitted tokens back to the entities they were created for.
///
/// Mirrors the runtime-side token table a loader would keep: resolvers and
/// callers register each token they hand out so later passes can recover the
/// entity behind a token. The map is lock-guarded so lookups work through a
/// shared reference.
pub struct TokenRegistry {
    entries: Mutex<FxHashMap<Token, EntityId>>,
}

impl TokenRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        TokenRegistry {
            entries: Mutex::new(FxHashMap::default()),
        }
    }

    /// Registers `token` as belonging to `entity` under the given policy.
    ///
    /// # Errors
    /// Returns [`Error::TokenCollision`] when the policy forbids the
    /// registration.
    pub fn register(
        &self,
        token: Token,
        entity: EntityId,
        collision: TokenCollision,
    ) -> Result<()> {
        let mut entries = match self.entries.lock() {
            Ok(entries) => entries,
            Err(poisoned) => poisoned.into_inner(),
        };
        match entries.get(&token) {
            None => {
                entries.insert(token, entity);
                Ok(())
            }
            Some(&existing) => match collision {
                TokenCollision::New => Err(Error::TokenCollision(token)),
                TokenCollision::SameOk => {
                    if existing == entity {
                        Ok(())
                    } else {
                        Err(Error::TokenCollision(token))
                    }
                }
                TokenCollision::Replace => {
                    entries.insert(token, entity);
                    Ok(())
                }
            },
        }
    }

    /// Looks up the entity registered for `token`.
    #[must_use]
    pub fn lookup(&self, token: Token) -> Option<EntityId> {
        let entries = match self.entries.lock() {
            Ok(entries) => entries,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.get(&token).copied()
    }

    /// Number of registered tokens.
    #[must_use]
    pub fn len(&self) -> usize {
        let entries = match self.entries.lock() {
            Ok(entries) => entries,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.len()
    }

    /// Returns true when no tokens are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for TokenRegistry {
    fn default() -> Self {
        TokenRegistry::new()
    }
}
