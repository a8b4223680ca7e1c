//! Storage backends for cached response bodies.
//!
//! A store is a flat map from [`CacheKey`] to raw body bytes, with a
//! last-write timestamp kept by the backend itself. Nothing else is
//! persisted: freshness is derived from [`CacheStore::mod_time`] alone.
//!
//! Calls are blocking and synchronous. A stalled backend stalls the request
//! that is talking to it.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use bytes::Bytes;
use thiserror::Error;
use tracing::debug;

use super::clock::{Clock, SystemClock};
use super::key::CacheKey;

/// Errors raised by a storage backend.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("no cache entry for key {key}")]
    NotFound { key: String },

    #[error("storage I/O error for key {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: io::Error,
    },
}

impl StorageError {
    fn io(key: &CacheKey, source: io::Error) -> Self {
        Self::Io {
            key: key.to_string(),
            source,
        }
    }

    /// Like [`io`](Self::io), but a missing file means a missing entry.
    fn lookup(key: &CacheKey, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::NotFound {
            Self::NotFound {
                key: key.to_string(),
            }
        } else {
            Self::io(key, source)
        }
    }
}

/// The minimal contract the cache needs from durable storage.
///
/// Any key-value or filesystem-like store can stand behind it. Writes
/// overwrite; there is no delete.
pub trait CacheStore: Send + Sync {
    /// Returns `true` if an entry is stored under `key`.
    fn exists(&self, key: &CacheKey) -> Result<bool, StorageError>;

    /// Returns the time `key` was last written. Only meaningful when
    /// [`exists`](Self::exists) is `true`.
    fn mod_time(&self, key: &CacheKey) -> Result<SystemTime, StorageError>;

    /// Returns the stored bytes, or [`StorageError::NotFound`].
    fn read(&self, key: &CacheKey) -> Result<Bytes, StorageError>;

    /// Stores `bytes` under `key`, replacing any previous entry.
    fn write(&self, key: &CacheKey, bytes: &[u8]) -> Result<(), StorageError>;
}

/// One file per key under a root directory.
///
/// The file name is the key's hex digest and the file's modification time is
/// the entry timestamp.
///
/// Writes land in a dot-prefixed temporary file in the same directory and
/// are renamed over the entry once complete, so a reader sees either the
/// previous body or the new one in full.
///
/// # Examples
///
/// ```no_run
/// use pagecache::cache::{CacheKey, CacheStore, FsStore};
///
/// let store = FsStore::open("/var/cache/pages")?;
/// let key = CacheKey::from_uri("/about");
/// store.write(&key, b"<html>about</html>")?;
/// assert!(store.exists(&key)?);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    /// Opens a store rooted at `root`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns [`io::Error`] if the directory cannot be created.
    pub fn open(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        debug!(root = %root.display(), "filesystem cache store opened");
        Ok(Self { root })
    }

    /// Returns the directory entries live in.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the file path backing `key`.
    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.root.join(key.as_str())
    }

    fn temp_path_for(&self, key: &CacheKey) -> PathBuf {
        static SEQ: AtomicU64 = AtomicU64::new(0);
        let seq = SEQ.fetch_add(1, Ordering::Relaxed);
        self.root.join(format!(".{key}.{}.{seq}.tmp", process::id()))
    }
}

impl CacheStore for FsStore {
    fn exists(&self, key: &CacheKey) -> Result<bool, StorageError> {
        match fs::metadata(self.path_for(key)) {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::io(key, e)),
        }
    }

    fn mod_time(&self, key: &CacheKey) -> Result<SystemTime, StorageError> {
        fs::metadata(self.path_for(key))
            .and_then(|meta| meta.modified())
            .map_err(|e| StorageError::lookup(key, e))
    }

    fn read(&self, key: &CacheKey) -> Result<Bytes, StorageError> {
        fs::read(self.path_for(key))
            .map(Bytes::from)
            .map_err(|e| StorageError::lookup(key, e))
    }

    fn write(&self, key: &CacheKey, bytes: &[u8]) -> Result<(), StorageError> {
        let tmp_path = self.temp_path_for(key);
        let result = fs::write(&tmp_path, bytes)
            .and_then(|()| fs::rename(&tmp_path, self.path_for(key)));
        if let Err(e) = result {
            fs::remove_file(&tmp_path).ok();
            return Err(StorageError::io(key, e));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct MemoryEntry {
    bytes: Bytes,
    modified: SystemTime,
}

/// An in-process store. Entry timestamps come from the injected [`Clock`].
///
/// Counts successful writes so callers can assert that a request did or did
/// not persist anything.
pub struct MemoryStore {
    entries: Mutex<HashMap<CacheKey, MemoryEntry>>,
    clock: Arc<dyn Clock>,
    writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
            writes: AtomicUsize::new(0),
        }
    }

    /// Stores an entry with an explicit timestamp. Does not count as a write.
    pub fn insert_at(&self, key: &CacheKey, bytes: impl Into<Bytes>, modified: SystemTime) {
        self.lock().insert(
            key.clone(),
            MemoryEntry {
                bytes: bytes.into(),
                modified,
            },
        );
    }

    /// Number of successful [`CacheStore::write`] calls so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<CacheKey, MemoryEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn entry(&self, key: &CacheKey) -> Result<MemoryEntry, StorageError> {
        self.lock()
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                key: key.to_string(),
            })
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl CacheStore for MemoryStore {
    fn exists(&self, key: &CacheKey) -> Result<bool, StorageError> {
        Ok(self.lock().contains_key(key))
    }

    fn mod_time(&self, key: &CacheKey) -> Result<SystemTime, StorageError> {
        self.entry(key).map(|entry| entry.modified)
    }

    fn read(&self, key: &CacheKey) -> Result<Bytes, StorageError> {
        self.entry(key).map(|entry| entry.bytes)
    }

    fn write(&self, key: &CacheKey, bytes: &[u8]) -> Result<(), StorageError> {
        let modified = self.clock.now();
        self.insert_at(key, Bytes::copy_from_slice(bytes), modified);
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;
    use std::thread;
    use std::time::{Duration, UNIX_EPOCH};

    use super::*;
    use crate::cache::clock::ManualClock;

    #[test]
    fn fs_store_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::open(dir.path()).unwrap();
        let key = CacheKey::from_uri("/foo");

        assert!(!store.exists(&key).unwrap());
        store.write(&key, b"first").unwrap();
        assert!(store.exists(&key).unwrap());
        assert_eq!(store.read(&key).unwrap(), Bytes::from_static(b"first"));

        store.write(&key, b"second").unwrap();
        assert_eq!(store.read(&key).unwrap(), Bytes::from_static(b"second"));
        assert!(store.path_for(&key).ends_with(key.as_str()));
    }

    #[test]
    fn fs_store_open_creates_nested_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("pages").join("v1");
        let store = FsStore::open(&root).unwrap();
        assert!(store.root().is_dir());
    }

    #[test]
    fn fs_store_missing_entry_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::open(dir.path()).unwrap();
        let key = CacheKey::from_uri("/missing");
        assert!(matches!(
            store.read(&key),
            Err(StorageError::NotFound { .. })
        ));
        assert!(matches!(
            store.mod_time(&key),
            Err(StorageError::NotFound { .. })
        ));
    }

    #[test]
    fn fs_store_mod_time_follows_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::open(dir.path()).unwrap();
        let key = CacheKey::from_uri("/aged");
        store.write(&key, b"body").unwrap();

        let past = UNIX_EPOCH + Duration::from_secs(1_000_000);
        let file = fs::File::options()
            .write(true)
            .open(store.path_for(&key))
            .unwrap();
        file.set_modified(past).unwrap();

        assert_eq!(store.mod_time(&key).unwrap(), past);
    }

    #[test]
    fn fs_store_readers_never_see_partial_bodies() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FsStore::open(dir.path()).unwrap());
        let key = CacheKey::from_uri("/big");
        let len = 1 << 20;
        store.write(&key, &vec![b'a'; len]).unwrap();

        let stop = Arc::new(AtomicBool::new(false));
        let writer = {
            let (store, key, stop) = (Arc::clone(&store), key.clone(), Arc::clone(&stop));
            thread::spawn(move || {
                let mut fill = b'b';
                while !stop.load(Ordering::Relaxed) {
                    store.write(&key, &vec![fill; len]).unwrap();
                    fill = if fill == b'z' { b'a' } else { fill + 1 };
                }
            })
        };

        for _ in 0..500 {
            let body = store.read(&key).unwrap();
            assert_eq!(body.len(), len);
            assert!(body.iter().all(|&b| b == body[0]));
        }
        stop.store(true, Ordering::Relaxed);
        writer.join().unwrap();

        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from(key.as_str())]);
    }

    #[test]
    fn fs_store_failed_write_keeps_previous_entry() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::open(dir.path()).unwrap();
        let key = CacheKey::from_uri("/kept");
        store.write(&key, b"old").unwrap();

        // A directory in the entry's place makes the final rename fail.
        let blocked = CacheKey::from_uri("/blocked");
        fs::create_dir(store.path_for(&blocked)).unwrap();
        fs::write(store.path_for(&blocked).join("child"), b"x").unwrap();
        assert!(matches!(
            store.write(&blocked, b"new"),
            Err(StorageError::Io { .. })
        ));

        assert_eq!(store.read(&key).unwrap(), Bytes::from_static(b"old"));
        let leftovers = fs::read_dir(dir.path())
            .unwrap()
            .filter(|entry| {
                entry
                    .as_ref()
                    .unwrap()
                    .file_name()
                    .to_string_lossy()
                    .ends_with(".tmp")
            })
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn fs_store_write_into_missing_root_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("pages");
        let store = FsStore::open(&root).unwrap();
        fs::remove_dir(&root).unwrap();

        let err = store.write(&CacheKey::from_uri("/foo"), b"x").unwrap_err();
        match err {
            StorageError::Io { source, .. } => {
                assert_eq!(source.kind(), io::ErrorKind::NotFound);
            }
            other => panic!("expected an I/O error, got {other:?}"),
        }
    }

    #[test]
    fn memory_store_stamps_writes_with_clock() {
        let clock = Arc::new(ManualClock::new(UNIX_EPOCH + Duration::from_secs(500)));
        let store = MemoryStore::new(clock.clone());
        let key = CacheKey::from_uri("/foo");

        store.write(&key, b"x").unwrap();
        assert_eq!(
            store.mod_time(&key).unwrap(),
            UNIX_EPOCH + Duration::from_secs(500)
        );

        clock.advance(Duration::from_secs(10));
        store.write(&key, b"y").unwrap();
        assert_eq!(
            store.mod_time(&key).unwrap(),
            UNIX_EPOCH + Duration::from_secs(510)
        );
        assert_eq!(store.read(&key).unwrap(), Bytes::from_static(b"y"));
        assert_eq!(store.write_count(), 2);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn memory_store_insert_at_is_not_a_write() {
        let store = MemoryStore::default();
        let key = CacheKey::from_uri("/seeded");
        store.insert_at(&key, "seed", UNIX_EPOCH);
        assert!(store.exists(&key).unwrap());
        assert_eq!(store.write_count(), 0);
    }
}
