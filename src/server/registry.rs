use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use thiserror::Error;

use crate::server::session::{Session, SessionState};

/// Represents errors that may occur in registry operations.
#[derive(Error, Debug)]
pub enum RegistryError {
    /// The requested nickname is bound to another live session.
    #[error("Nickname already in use: {0}")]
    NicknameTaken(String),
}

/// Manages the set of live sessions.
///
/// The primary map owns the sessions; the nickname index is a non-owning
/// lookup relation that never extends a session's lifetime. Index entries
/// are validated against the primary map at read time and pruned lazily,
/// so removing a session implicitly invalidates its nickname entry.
pub struct SessionRegistry {
    /// Session id -> session. Exclusive ownership lives here.
    sessions: DashMap<u64, Arc<Session>>,
    /// Nickname -> session id of the owner.
    nicknames: DashMap<String, u64>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            nicknames: DashMap::new(),
        }
    }

    /// Registers a session under its id.
    pub fn add(&self, session: Arc<Session>) {
        self.sessions.insert(session.id(), session);
    }

    /// Removes a session, returning it to the caller.
    ///
    /// Idempotent: a second removal of the same id reports `None` instead
    /// of faulting, which makes the explicit-close path safe against a
    /// concurrent cleanup sweep.
    pub fn remove(&self, id: u64) -> Option<Arc<Session>> {
        let removed = self.sessions.remove(&id).map(|(_, session)| session);
        if let Some(ref session) = removed {
            if let Some(nickname) = session.nickname() {
                self.nicknames.remove_if(&nickname, |_, owner| *owner == id);
            }
        }
        removed
    }

    /// Looks up a session by id.
    pub fn get(&self, id: u64) -> Option<Arc<Session>> {
        self.sessions.get(&id).map(|entry| entry.value().clone())
    }

    /// Number of currently registered sessions.
    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    /// Claims a nickname for the given session id.
    ///
    /// # Errors
    /// Returns `RegistryError::NicknameTaken` when the nickname belongs to
    /// another session that is still registered and not closed. A stale
    /// claim left behind by a dead session is silently replaced.
    pub fn bind_nickname(&self, nickname: &str, id: u64) -> Result<(), RegistryError> {
        match self.nicknames.entry(nickname.to_string()) {
            Entry::Occupied(mut occupied) => {
                let owner = *occupied.get();
                let owner_live = owner != id
                    && self
                        .sessions
                        .get(&owner)
                        .map(|s| !s.is_closed())
                        .unwrap_or(false);
                if owner_live {
                    return Err(RegistryError::NicknameTaken(nickname.to_string()));
                }
                occupied.insert(id);
                Ok(())
            }
            Entry::Vacant(vacant) => {
                vacant.insert(id);
                Ok(())
            }
        }
    }

    /// Resolves a nickname to its session.
    ///
    /// Only resolves if the indexed session is still present in the primary
    /// map and authenticated; a stale index entry is pruned and reported as
    /// absent.
    pub fn find_by_nickname(&self, nickname: &str) -> Option<Arc<Session>> {
        let id = {
            let entry = self.nicknames.get(nickname)?;
            *entry.value()
        };
        match self.sessions.get(&id) {
            Some(session) if session.state() == SessionState::Authenticated => {
                Some(session.value().clone())
            }
            _ => {
                self.nicknames.remove_if(nickname, |_, owner| *owner == id);
                None
            }
        }
    }

    /// Invokes `f` once per currently registered session.
    ///
    /// The callback observes a snapshot taken up front, so sessions added
    /// or removed mid-iteration cannot corrupt the traversal, and `f` may
    /// call back into the registry without deadlocking.
    pub fn for_each(&self, mut f: impl FnMut(&Arc<Session>)) {
        let snapshot: Vec<Arc<Session>> = self
            .sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        for session in &snapshot {
            f(session);
        }
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
