//! Durable session-state storage with optimistic concurrency.
//!
//! Stores only hold values; they never call the session manager. Writers do
//! read → compute → [`SessionStore::compare_and_swap`] and retry from a fresh
//! read on [`StoreError::Conflict`].

mod file;
mod memory;

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::SessionId;
use crate::error::{Effect, Transience};
use crate::session::SessionState;

pub use file::FileSessionStore;
pub use memory::InMemorySessionStore;

/// Monotonic per-key write counter. The first write yields version 1.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(u64);

impl Version {
    pub const FIRST: Version = Version(1);

    pub fn get(self) -> u64 {
        self.0
    }

    pub fn next(self) -> Version {
        Version(self.0.saturating_add(1))
    }

    /// Version a write produces given the version it replaced.
    pub fn after(previous: Option<Version>) -> Version {
        previous.map_or(Version::FIRST, Version::next)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Versioned<T> {
    pub version: Version,
    pub value: T,
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    #[error("write conflict on session {session_id}: expected {expected:?}, found {actual:?}")]
    Conflict {
        session_id: SessionId,
        expected: Option<Version>,
        actual: Option<Version>,
    },

    #[error("state for {session_id} is keyed as {found}")]
    KeyMismatch {
        session_id: SessionId,
        found: SessionId,
    },

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt session record at {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    pub fn transience(&self) -> Transience {
        match self {
            StoreError::Conflict { .. } => Transience::Retryable,
            StoreError::KeyMismatch { .. } | StoreError::Corrupt { .. } => Transience::Permanent,
            StoreError::Io { .. } => Transience::Unknown,
        }
    }

    pub fn effect(&self) -> Effect {
        match self {
            StoreError::Io { .. } => Effect::Unknown,
            _ => Effect::None,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

pub trait SessionStore {
    fn get(&self, session_id: &SessionId) -> Result<Option<Versioned<SessionState>>, StoreError>;

    /// Writes `state` only if the stored version still equals `expected`
    /// (`None`: the key must be absent). Returns the new version.
    fn compare_and_swap(
        &self,
        expected: Option<Version>,
        state: &SessionState,
    ) -> Result<Version, StoreError>;

    /// Returns whether a record existed.
    fn remove(&self, session_id: &SessionId) -> Result<bool, StoreError>;

    /// Every stored session id, ascending.
    fn list(&self) -> Result<Vec<SessionId>, StoreError>;
}

impl<S: SessionStore + ?Sized> SessionStore for &S {
    fn get(&self, session_id: &SessionId) -> Result<Option<Versioned<SessionState>>, StoreError> {
        (**self).get(session_id)
    }

    fn compare_and_swap(
        &self,
        expected: Option<Version>,
        state: &SessionState,
    ) -> Result<Version, StoreError> {
        (**self).compare_and_swap(expected, state)
    }

    fn remove(&self, session_id: &SessionId) -> Result<bool, StoreError> {
        (**self).remove(session_id)
    }

    fn list(&self) -> Result<Vec<SessionId>, StoreError> {
        (**self).list()
    }
}

pub(crate) fn check_version(
    session_id: &SessionId,
    expected: Option<Version>,
    actual: Option<Version>,
) -> Result<Version, StoreError> {
    if expected != actual {
        return Err(StoreError::Conflict {
            session_id: session_id.clone(),
            expected,
            actual,
        });
    }
    Ok(Version::after(actual))
}
