use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use tempfile::NamedTempFile;
use tracing::debug;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// bucket -> key -> value
pub type Buckets = BTreeMap<String, BTreeMap<String, String>>;

/// One correspondence record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub bucket: String,
    pub key: String,
    pub value: String,
}

impl Record {
    pub fn new(
        bucket: impl AsRef<str>,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            bucket: bucket.as_ref().to_string(),
            key: key.into(),
            value: value.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot decode store {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("cannot encode store: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("invalid record: bucket={bucket:?} key={key:?}")]
    InvalidRecord { bucket: String, key: String },
    #[error("store lock poisoned")]
    Poisoned,
}

pub type Result<T> = std::result::Result<T, StoreError>;

// ---------------------------------------------------------------------------
// CorrespondenceStore
// ---------------------------------------------------------------------------

/// Durable `(bucket, key) -> value` mapping of cross-tracker IDs.
pub trait CorrespondenceStore: Send + Sync {
    /// Value stored under `(bucket, key)`; `None` when absent.
    fn get(&self, bucket: &str, key: &str) -> Result<Option<String>>;

    /// Upsert one record.
    fn put(&self, bucket: &str, key: &str, value: &str) -> Result<()> {
        self.put_many(&[Record::new(bucket, key, value)])
    }

    /// Upsert all records or none of them, durably, before returning.
    fn put_many(&self, records: &[Record]) -> Result<()>;

    /// Copy of the whole mapping.
    fn snapshot(&self) -> Result<Buckets>;

    /// Flush pending state. Safe to call repeatedly.
    fn close(&self) -> Result<()>;
}

/// Applies `records` to `buckets`, rejecting the batch on the first record
/// with an empty bucket, key or value.
fn apply(buckets: &mut Buckets, records: &[Record]) -> Result<()> {
    for r in records {
        if r.bucket.is_empty() || r.key.is_empty() || r.value.is_empty() {
            return Err(StoreError::InvalidRecord {
                bucket: r.bucket.clone(),
                key: r.key.clone(),
            });
        }
        buckets
            .entry(r.bucket.clone())
            .or_default()
            .insert(r.key.clone(), r.value.clone());
    }
    Ok(())
}

fn lookup(buckets: &Buckets, bucket: &str, key: &str) -> Option<String> {
    buckets.get(bucket).and_then(|b| b.get(key)).cloned()
}

// ---------------------------------------------------------------------------
// FileStore
// ---------------------------------------------------------------------------

/// JSON-file-backed store.
///
/// Every mutation rewrites the whole document into a temp file next to the
/// target, syncs it and renames it over the previous version, so the file
/// always holds either the old or the new state. The in-memory map changes
/// only after the rename succeeded.
pub struct FileStore {
    path: PathBuf,
    buckets: RwLock<Buckets>,
}

impl FileStore {
    /// Open an existing store file. A missing file is an error.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let text = std::fs::read_to_string(&path).map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })?;
        // `null` is accepted as an empty store.
        let buckets: Option<Buckets> =
            serde_json::from_str(&text).map_err(|source| StoreError::Decode {
                path: path.clone(),
                source,
            })?;
        let buckets = buckets.unwrap_or_default();
        debug!(path = %path.display(), buckets = buckets.len(), "opened correspondence store");
        Ok(Self {
            path,
            buckets: RwLock::new(buckets),
        })
    }

    /// Open `path`, first writing an empty store there if it does not exist.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            write_atomically(path, &Buckets::new())?;
        }
        Self::open(path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Buckets>> {
        self.buckets.read().map_err(|_| StoreError::Poisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Buckets>> {
        self.buckets.write().map_err(|_| StoreError::Poisoned)
    }
}

impl CorrespondenceStore for FileStore {
    fn get(&self, bucket: &str, key: &str) -> Result<Option<String>> {
        Ok(lookup(&*self.read()?, bucket, key))
    }

    fn put_many(&self, records: &[Record]) -> Result<()> {
        let mut guard = self.write()?;
        let mut next = guard.clone();
        apply(&mut next, records)?;
        write_atomically(&self.path, &next)?;
        *guard = next;
        Ok(())
    }

    fn snapshot(&self) -> Result<Buckets> {
        Ok(self.read()?.clone())
    }

    fn close(&self) -> Result<()> {
        let guard = self.write()?;
        write_atomically(&self.path, &guard)
    }
}

fn write_atomically(path: &Path, buckets: &Buckets) -> Result<()> {
    let io_err = |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir).map_err(io_err)?;
    serde_json::to_writer(&mut tmp, buckets)?;
    tmp.write_all(b"\n").map_err(io_err)?;
    tmp.as_file().sync_all().map_err(io_err)?;
    tmp.persist(path).map_err(|e| io_err(e.error))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// Non-durable store with the same semantics as [`FileStore`].
#[derive(Default)]
pub struct MemoryStore {
    buckets: RwLock<Buckets>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_buckets(buckets: Buckets) -> Self {
        Self {
            buckets: RwLock::new(buckets),
        }
    }
}

impl CorrespondenceStore for MemoryStore {
    fn get(&self, bucket: &str, key: &str) -> Result<Option<String>> {
        let guard = self.buckets.read().map_err(|_| StoreError::Poisoned)?;
        Ok(lookup(&guard, bucket, key))
    }

    fn put_many(&self, records: &[Record]) -> Result<()> {
        let mut guard = self.buckets.write().map_err(|_| StoreError::Poisoned)?;
        let mut next = guard.clone();
        apply(&mut next, records)?;
        *guard = next;
        Ok(())
    }

    fn snapshot(&self) -> Result<Buckets> {
        let guard = self.buckets.read().map_err(|_| StoreError::Poisoned)?;
        Ok(guard.clone())
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
