//! One JSON document per session under a directory.
//!
//! Writes go to a temp file in the same directory, are synced, and are
//! persisted over the target with a rename. Compare-and-swap is serialized by an in-process
//! mutex; a directory must not be shared between processes.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use super::{SessionStore, StoreError, Version, Versioned, check_version};
use crate::core::SessionId;
use crate::session::SessionState;

const EXTENSION: &str = "json";

#[derive(Clone, Debug)]
pub struct FileSessionStore {
    dir: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl FileSessionStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| StoreError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self {
            dir,
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, session_id: &SessionId) -> PathBuf {
        self.dir.join(format!("{}.{EXTENSION}", session_id.as_str()))
    }

    fn read(&self, session_id: &SessionId) -> Result<Option<Versioned<SessionState>>, StoreError> {
        let path = self.path_for(session_id);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(StoreError::Io { path, source }),
        };
        let record: Versioned<SessionState> =
            serde_json::from_slice(&bytes).map_err(|source| StoreError::Corrupt {
                path: path.clone(),
                source,
            })?;
        if record.value.session_id() != session_id {
            return Err(StoreError::KeyMismatch {
                session_id: session_id.clone(),
                found: record.value.session_id().clone(),
            });
        }
        Ok(Some(record))
    }

    fn write(&self, record: &Versioned<SessionState>) -> Result<(), StoreError> {
        let path = self.path_for(record.value.session_id());
        let io_err = |source: io::Error| StoreError::Io {
            path: path.clone(),
            source,
        };
        let contents = serde_json::to_vec_pretty(record).map_err(|source| StoreError::Corrupt {
            path: path.clone(),
            source,
        })?;
        let mut temp = tempfile::NamedTempFile::new_in(&self.dir).map_err(io_err)?;
        temp.as_file_mut().write_all(&contents).map_err(io_err)?;
        // contents must be on disk before the rename makes them visible
        temp.as_file().sync_all().map_err(io_err)?;
        temp.persist(&path).map_err(|err| io_err(err.error))?;
        Ok(())
    }
}

impl SessionStore for FileSessionStore {
    fn get(&self, session_id: &SessionId) -> Result<Option<Versioned<SessionState>>, StoreError> {
        self.read(session_id)
    }

    fn compare_and_swap(
        &self,
        expected: Option<Version>,
        state: &SessionState,
    ) -> Result<Version, StoreError> {
        let _guard = self.write_lock.lock().expect("file store lock poisoned");
        let session_id = state.session_id();
        let actual = self.read(session_id)?.map(|record| record.version);
        let version = check_version(session_id, expected, actual)?;
        self.write(&Versioned {
            version,
            value: state.clone(),
        })?;
        tracing::trace!(%session_id, %version, "session state persisted");
        Ok(version)
    }

    fn remove(&self, session_id: &SessionId) -> Result<bool, StoreError> {
        let _guard = self.write_lock.lock().expect("file store lock poisoned");
        let path = self.path_for(session_id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(StoreError::Io { path, source }),
        }
    }

    fn list(&self) -> Result<Vec<SessionId>, StoreError> {
        let entries = fs::read_dir(&self.dir).map_err(|source| StoreError::Io {
            path: self.dir.clone(),
            source,
        })?;
        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| StoreError::Io {
                path: self.dir.clone(),
                source,
            })?;
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            match SessionId::new(stem) {
                Ok(id) => ids.push(id),
                Err(err) => tracing::debug!(path = %path.display(), "skipping foreign file: {err}"),
            }
        }
        ids.sort();
        Ok(ids)
    }
}
