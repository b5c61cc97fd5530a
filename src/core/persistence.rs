//! Durable storage for session state.
//!
//! The session store talks to storage through [`StatePersistence`], a
//! synchronous side-effect port. The file-backed implementation keeps the
//! full thread list as one JSON blob plus a second file holding the active
//! thread id as a bare string; [`MemoryStore`] backs tests. Writers are not
//! locked against each other; a single writer per data directory is assumed.

use std::error::Error as StdError;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use directories::ProjectDirs;
use tempfile::NamedTempFile;
use tracing::warn;
use uuid::Uuid;

use crate::core::session::Thread;

const THREADS_FILE: &str = "threads.json";
const ACTIVE_THREAD_FILE: &str = "active_thread";

#[derive(Debug)]
pub enum PersistenceError {
    /// Failed to write state to disk.
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to serialize the thread list.
    Serialize { source: serde_json::Error },
}

impl fmt::Display for PersistenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PersistenceError::Write { path, source } => {
                write!(f, "failed to write state at {}: {}", path.display(), source)
            }
            PersistenceError::Serialize { source } => {
                write!(f, "failed to serialize session state: {}", source)
            }
        }
    }
}

impl StdError for PersistenceError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            PersistenceError::Write { source, .. } => Some(source),
            PersistenceError::Serialize { source } => Some(source),
        }
    }
}

/// Session state as reconstructed from storage. Malformed or absent data
/// always hydrates as the empty default, never as an error.
#[derive(Clone, Debug, Default)]
pub struct HydratedState {
    pub threads: Vec<Thread>,
    pub active_thread_id: Option<Uuid>,
}

pub trait StatePersistence {
    fn load(&self) -> HydratedState;

    fn save(&self, threads: &[Thread], active_thread_id: Option<Uuid>)
        -> Result<(), PersistenceError>;
}

/// File-backed persistence under a data directory.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn at(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn in_default_location() -> Result<Self, Box<dyn StdError>> {
        let dirs = ProjectDirs::from("org", "permacommons", "causerie")
            .ok_or("could not determine a data directory for this platform")?;
        Ok(Self::at(dirs.data_dir()))
    }

    fn threads_path(&self) -> PathBuf {
        self.dir.join(THREADS_FILE)
    }

    fn active_path(&self) -> PathBuf {
        self.dir.join(ACTIVE_THREAD_FILE)
    }

    fn write_atomically(&self, path: &Path, contents: &[u8]) -> Result<(), PersistenceError> {
        let write_err = |source| PersistenceError::Write {
            path: path.to_path_buf(),
            source,
        };

        fs::create_dir_all(&self.dir).map_err(write_err)?;
        let mut temp_file = NamedTempFile::new_in(&self.dir).map_err(write_err)?;
        temp_file.write_all(contents).map_err(write_err)?;
        temp_file.as_file_mut().sync_all().map_err(write_err)?;
        temp_file.persist(path).map_err(|err| write_err(err.error))?;
        Ok(())
    }
}

impl StatePersistence for FileStore {
    fn load(&self) -> HydratedState {
        let threads = match fs::read_to_string(self.threads_path()) {
            Ok(contents) => match serde_json::from_str::<Vec<Thread>>(&contents) {
                Ok(threads) => threads,
                Err(err) => {
                    warn!(error = %err, "persisted threads are malformed, starting empty");
                    Vec::new()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(err) => {
                warn!(error = %err, "could not read persisted threads, starting empty");
                Vec::new()
            }
        };

        let active_thread_id = fs::read_to_string(self.active_path())
            .ok()
            .and_then(|contents| Uuid::parse_str(contents.trim()).ok());

        HydratedState {
            threads,
            active_thread_id,
        }
    }

    fn save(
        &self,
        threads: &[Thread],
        active_thread_id: Option<Uuid>,
    ) -> Result<(), PersistenceError> {
        let contents = serde_json::to_vec(threads)
            .map_err(|source| PersistenceError::Serialize { source })?;
        self.write_atomically(&self.threads_path(), &contents)?;

        match active_thread_id {
            Some(id) => self.write_atomically(&self.active_path(), id.to_string().as_bytes())?,
            None => match fs::remove_file(self.active_path()) {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(source) => {
                    return Err(PersistenceError::Write {
                        path: self.active_path(),
                        source,
                    })
                }
            },
        }

        Ok(())
    }
}

/// In-memory persistence, the substitutable fake for tests. Clones share the
/// same underlying state, so a test can hand one clone to a store and inspect
/// or re-hydrate through another.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<HydratedState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seeded(threads: Vec<Thread>, active_thread_id: Option<Uuid>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HydratedState {
                threads,
                active_thread_id,
            })),
        }
    }
}

impl StatePersistence for MemoryStore {
    fn load(&self) -> HydratedState {
        self.inner.lock().expect("state lock poisoned").clone()
    }

    fn save(
        &self,
        threads: &[Thread],
        active_thread_id: Option<Uuid>,
    ) -> Result<(), PersistenceError> {
        let mut state = self.inner.lock().expect("state lock poisoned");
        state.threads = threads.to_vec();
        state.active_thread_id = active_thread_id;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::message::Message;
    use chrono::Utc;
    use tempfile::TempDir;

    fn sample_thread(title: &str) -> Thread {
        Thread {
            id: Uuid::new_v4(),
            title: title.to_string(),
            created_at: Utc::now(),
            messages: vec![Message::user("hello"), Message::assistant("hi there")],
        }
    }

    #[test]
    fn state_round_trips_through_the_file_store() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::at(dir.path());

        let threads = vec![sample_thread("first"), sample_thread("second")];
        let active = Some(threads[1].id);
        store.save(&threads, active).unwrap();

        let state = store.load();
        assert_eq!(state.active_thread_id, active);
        assert_eq!(state.threads.len(), 2);
        for (saved, loaded) in threads.iter().zip(&state.threads) {
            assert_eq!(saved.id, loaded.id);
            assert_eq!(saved.title, loaded.title);
            assert_eq!(saved.messages.len(), loaded.messages.len());
            assert_eq!(saved.messages[0].content, loaded.messages[0].content);
        }
    }

    #[test]
    fn the_active_id_is_stored_as_a_bare_string() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::at(dir.path());

        let thread = sample_thread("only");
        let id = thread.id;
        store.save(&[thread], Some(id)).unwrap();

        let raw = fs::read_to_string(dir.path().join(ACTIVE_THREAD_FILE)).unwrap();
        assert_eq!(raw, id.to_string());
    }

    #[test]
    fn clearing_the_active_id_removes_its_file() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::at(dir.path());

        let thread = sample_thread("only");
        let id = thread.id;
        store.save(std::slice::from_ref(&thread), Some(id)).unwrap();
        store.save(&[thread], None).unwrap();

        assert!(!dir.path().join(ACTIVE_THREAD_FILE).exists());
        assert!(store.load().active_thread_id.is_none());
    }

    #[test]
    fn absent_state_hydrates_empty() {
        let dir = TempDir::new().unwrap();
        let state = FileStore::at(dir.path().join("nested")).load();
        assert!(state.threads.is_empty());
        assert!(state.active_thread_id.is_none());
    }

    #[test]
    fn corrupted_state_hydrates_like_absent_state() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(THREADS_FILE), "{not json").unwrap();
        fs::write(dir.path().join(ACTIVE_THREAD_FILE), "not-a-uuid").unwrap();

        let state = FileStore::at(dir.path()).load();
        assert!(state.threads.is_empty());
        assert!(state.active_thread_id.is_none());
    }

    #[test]
    fn memory_store_clones_share_state() {
        let store = MemoryStore::new();
        let observer = store.clone();

        let thread = sample_thread("shared");
        let id = thread.id;
        store.save(&[thread], Some(id)).unwrap();

        let state = observer.load();
        assert_eq!(state.threads.len(), 1);
        assert_eq!(state.active_thread_id, Some(id));
    }
}
