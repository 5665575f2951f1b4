//!
//! clockhub storage module
//! -----------------------
//! All persistent state lives in a single set of in-memory `Tables` guarded by a
//! mutex. Reads take the same lock. Writes are transactional: the closure runs against
//! a scratch copy of the tables, and the copy only replaces the live tables when the
//! closure succeeds.
//!
//! When a data directory is configured each committed write is serialized under the
//! table lock and written to the JSON snapshot after the lock is released. Snapshot
//! writes are ordered by commit generation, so a slow writer never replaces a newer
//! file with an older one. The file write itself is a small synchronous write on the
//! calling task; a failed write is reported to that caller and the next successful
//! commit brings the file up to date.
//!
//! The public API centers around `SharedStore`, a cheap-to-clone `Arc<Mutex<Store>>`
//! handed to every request handler.

use std::{fs, path::{Path, PathBuf}};
use std::sync::Arc;
use anyhow::{Context, Result};
use parking_lot::Mutex;
use tracing::{debug, error};

use crate::error::{AppError, AppResult};

pub mod models;
pub mod tables;

pub use tables::Tables;

const SNAPSHOT_FILE: &str = "clockhub.json";

/// Snapshot target plus the newest generation already on disk.
struct SnapshotFile {
    path: PathBuf,
    written: Mutex<u64>,
}

impl SnapshotFile {
    /// Write `bytes` unless a later generation is already on disk.
    fn store(&self, generation: u64, bytes: &[u8]) -> Result<bool> {
        let mut written = self.written.lock();
        if *written >= generation { return Ok(false); }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, bytes).with_context(|| format!("writing {}", tmp.display()))?;
        fs::rename(&tmp, &self.path).with_context(|| format!("replacing {}", self.path.display()))?;
        *written = generation;
        Ok(true)
    }
}

/// Live tables plus where (if anywhere) they are snapshotted.
pub struct Store {
    tables: Tables,
    snapshot: Option<Arc<SnapshotFile>>,
    /// Committed write count.
    revision: u64,
}

impl Store {
    pub fn in_memory() -> Self {
        Self { tables: Tables::default(), snapshot: None, revision: 0 }
    }

    /// Open a store rooted at `dir`, loading `clockhub.json` when present.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).with_context(|| format!("creating data directory {}", dir.display()))?;
        let path = dir.join(SNAPSHOT_FILE);
        let tables = if path.exists() {
            let bytes = fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
            serde_json::from_slice::<Tables>(&bytes).with_context(|| format!("parsing {}", path.display()))?
        } else {
            Tables::default()
        };
        debug!(target: "clockhub::storage", path = %path.display(), "store opened");
        let snapshot = SnapshotFile { path, written: Mutex::new(0) };
        Ok(Self { tables, snapshot: Some(Arc::new(snapshot)), revision: 0 })
    }

    pub fn snapshot_path(&self) -> Option<&Path> { self.snapshot.as_deref().map(|s| s.path.as_path()) }
}

#[derive(Clone)]
pub struct SharedStore(pub Arc<Mutex<Store>>);

impl SharedStore {
    pub fn new(store: Store) -> Self { Self(Arc::new(Mutex::new(store))) }

    pub fn in_memory() -> Self { Self::new(Store::in_memory()) }

    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> { Ok(Self::new(Store::open(dir)?)) }

    /// Read-only access to the live tables.
    pub fn read<T>(&self, f: impl FnOnce(&Tables) -> T) -> T {
        let guard = self.0.lock();
        f(&guard.tables)
    }

    /// Number of committed writes since the store was opened.
    pub fn revision(&self) -> u64 { self.0.lock().revision }

    /// Run `f` as one transaction. Nothing is visible to other requests unless `f`
    /// returns `Ok`.
    pub fn write<T>(&self, f: impl FnOnce(&mut Tables) -> AppResult<T>) -> AppResult<T> {
        let (out, pending) = {
            let mut guard = self.0.lock();
            let mut scratch = guard.tables.clone();
            let out = f(&mut scratch)?;
            let bytes = match guard.snapshot {
                Some(_) => Some(serde_json::to_vec(&scratch).map_err(|e| {
                    error!(target: "clockhub::storage", error = %e, "snapshot serialization failed; transaction rolled back");
                    AppError::internal("storage_error", "internal server error")
                })?),
                None => None,
            };
            guard.tables = scratch;
            guard.revision += 1;
            let revision = guard.revision;
            (out, guard.snapshot.clone().zip(bytes).map(|(file, bytes)| (file, revision, bytes)))
        };
        if let Some((file, revision, bytes)) = pending {
            if let Err(e) = file.store(revision, &bytes) {
                error!(target: "clockhub::storage", error = %e, revision, "snapshot write failed");
                return Err(AppError::internal("storage_error", "internal server error"));
            }
        }
        Ok(out)
    }
}

/// Lookup used by the IP guard. A failed lookup must be treated as a denial.
pub trait AllowlistSource: Send + Sync {
    fn contains(&self, ip: &str) -> Result<bool>;
}

impl AllowlistSource for SharedStore {
    fn contains(&self, ip: &str) -> Result<bool> {
        Ok(self.read(|t| t.is_ip_allowlisted(ip)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use crate::storage::tables::NewIdentity;

    #[test]
    fn failed_transaction_leaves_tables_untouched() {
        let store = SharedStore::in_memory();
        let res: AppResult<()> = store.write(|t| {
            t.insert_identity(NewIdentity { full_name: "Ada".into(), ..Default::default() }, Utc::now())?;
            Err(AppError::invalid("boom", "abort"))
        });
        assert!(res.is_err());
        assert_eq!(store.read(|t| t.identity_count()), 0);
    }

    #[test]
    fn snapshot_round_trips_through_open() {
        let dir = tempfile::tempdir().unwrap();
        let store = SharedStore::open(dir.path()).unwrap();
        let id = store.write(|t| {
            let u = t.insert_identity(NewIdentity { full_name: "Ada".into(), access_code: Some("424242".into()), ..Default::default() }, Utc::now())?;
            t.clock_in(u.id, Utc::now())?;
            Ok(u.id)
        }).unwrap();
        drop(store);

        let reopened = SharedStore::open(dir.path()).unwrap();
        let (code, open) = reopened.read(|t| (t.identity(id).map(|u| u.access_code.clone()), t.open_log(id).is_some()));
        assert_eq!(code.as_deref(), Some("424242"));
        assert!(open);
        // sequences survive too
        let next = reopened.write(|t| t.insert_identity(NewIdentity { full_name: "Bob".into(), ..Default::default() }, Utc::now())).unwrap();
        assert!(next.id > id);
    }

    #[test]
    fn revision_counts_committed_writes_only() {
        let store = SharedStore::in_memory();
        assert_eq!(store.revision(), 0);
        store.write(|t| t.insert_allowed_ip("10.1.2.3", None, None, Utc::now())).unwrap();
        let _ = store.write(|_| -> AppResult<()> { Err(AppError::invalid("boom", "abort")) });
        assert_eq!(store.revision(), 1);
    }

    #[test]
    fn older_generation_never_replaces_newer_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let file = SnapshotFile { path: dir.path().join(SNAPSHOT_FILE), written: Mutex::new(0) };
        assert!(file.store(2, b"{\"newer\":true}").unwrap());
        assert!(!file.store(1, b"{\"older\":true}").unwrap());
        let on_disk = fs::read_to_string(&file.path).unwrap();
        assert_eq!(on_disk, "{\"newer\":true}");
    }

    #[test]
    fn allowlist_source_reads_live_tables() {
        let store = SharedStore::in_memory();
        store.write(|t| t.insert_allowed_ip("10.1.2.3", None, None, Utc::now())).unwrap();
        assert!(store.contains("10.1.2.3").unwrap());
        assert!(!store.contains("10.1.2.4").unwrap());
    }
}
