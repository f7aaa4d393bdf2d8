//! Session registry.
//!
//! A session binds a client-declared filesystem path to a stable id for the
//! lifetime of the server. The registry is append-only: sessions are never
//! updated or removed, and ids are the 1-based insertion position.

use serde::{Deserialize, Serialize};
use std::sync::{PoisonError, RwLock};
use tracing::{debug, info};

/// A registered working context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    /// Opaque identity key; never validated or resolved here.
    pub path: String,
}

/// Outcome of [`SessionRegistry::get_or_create`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registration {
    /// A new session was appended.
    Created(Session),
    /// A session for this path already existed and is returned unchanged.
    Existing(Session),
}

impl Registration {
    pub fn session(&self) -> &Session {
        match self {
            Registration::Created(session) | Registration::Existing(session) => session,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, Registration::Created(_))
    }
}

/// In-memory, insertion-ordered session registry.
///
/// Readers get clones; only the registry itself ever appends.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<Vec<Session>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// All sessions in insertion order.
    pub fn list(&self) -> Vec<Session> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Look up a session by id.
    pub fn get(&self, id: &str) -> Option<Session> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|session| session.id == id)
            .cloned()
    }

    /// Return the session registered for `path`, creating it if needed.
    ///
    /// The lookup and the append happen under a single write lock, so
    /// concurrent registrations of the same unseen path create one session.
    pub fn get_or_create(&self, path: &str) -> Registration {
        let mut sessions = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(existing) = sessions.iter().find(|session| session.path == path) {
            debug!(session.id = %existing.id, session.path = %path, "session already registered");
            return Registration::Existing(existing.clone());
        }

        let session = Session {
            id: (sessions.len() + 1).to_string(),
            path: path.to_string(),
        };
        sessions.push(session.clone());

        info!(session.id = %session.id, session.path = %path, "registered session");
        Registration::Created(session)
    }

    pub fn len(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
