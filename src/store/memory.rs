//! Thread-safe in-process session store.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use super::{SessionStore, StoreError, Version, Versioned, check_version};
use crate::core::SessionId;
use crate::session::SessionState;

type Records = BTreeMap<SessionId, Versioned<SessionState>>;

/// Cheap to clone; clones share the same records.
#[derive(Clone, Debug, Default)]
pub struct InMemorySessionStore {
    inner: Arc<Mutex<Records>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Records> {
        self.inner.lock().expect("session store lock poisoned")
    }
}

impl SessionStore for InMemorySessionStore {
    fn get(&self, session_id: &SessionId) -> Result<Option<Versioned<SessionState>>, StoreError> {
        Ok(self.lock().get(session_id).cloned())
    }

    fn compare_and_swap(
        &self,
        expected: Option<Version>,
        state: &SessionState,
    ) -> Result<Version, StoreError> {
        let session_id = state.session_id();
        let mut records = self.lock();
        let actual = records.get(session_id).map(|record| record.version);
        let version = check_version(session_id, expected, actual)?;
        records.insert(
            session_id.clone(),
            Versioned {
                version,
                value: state.clone(),
            },
        );
        Ok(version)
    }

    fn remove(&self, session_id: &SessionId) -> Result<bool, StoreError> {
        Ok(self.lock().remove(session_id).is_some())
    }

    fn list(&self) -> Result<Vec<SessionId>, StoreError> {
        Ok(self.lock().keys().cloned().collect())
    }
}
