//! Persistent storage for in-flight resumable upload sessions.
//!
//! A [`SessionRecord`] links an object's canonical key (`"{bucket}/{name}"`)
//! to the resume URI the server returned at negotiation time. The record is
//! written once, never updated, and removed when the upload finishes.
//!
//! No cross-process locking is provided: concurrent writers to the same store
//! follow last-writer-wins semantics.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Persisted state of one resumable upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Resume URI returned by the server in the initiation `Location` header.
    pub uri: String,
}

impl SessionRecord {
    /// Create a record for `uri`.
    #[must_use]
    pub fn new(uri: impl Into<String>) -> Self {
        Self { uri: uri.into() }
    }
}

/// Session store failure.
#[derive(Debug, thiserror::Error)]
pub enum SessionStoreError {
    /// Reading or writing the backing file failed.
    #[error("session store I/O error at {path}: {source}")]
    Io {
        /// The file or directory involved.
        path: PathBuf,
        /// The underlying error.
        source: std::io::Error,
    },

    /// The records could not be serialized.
    #[error("failed to encode session store: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Key-value store for [`SessionRecord`]s.
#[async_trait]
pub trait SessionStore: Send + Sync + 'static {
    /// Look up the record for `key`.
    async fn get(&self, key: &str) -> Result<Option<SessionRecord>, SessionStoreError>;

    /// Store `record` under `key`, replacing any previous record.
    async fn set(&self, key: &str, record: SessionRecord) -> Result<(), SessionStoreError>;

    /// Remove the record for `key`. Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<(), SessionStoreError>;
}

// ---------------------------------------------------------------------------
// FileSessionStore
// ---------------------------------------------------------------------------

/// Session store backed by a single JSON file.
///
/// Every mutation rewrites the file through a temporary sibling and an atomic
/// rename, so a crash never leaves a half-written store behind. Within one
/// process, mutations are serialized.
#[derive(Debug)]
pub struct FileSessionStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileSessionStore {
    /// Create a store persisted at `path`. The file and its parent directory
    /// are created on first write.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// The backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All persisted records, keyed by object key.
    pub async fn entries(&self) -> Result<BTreeMap<String, SessionRecord>, SessionStoreError> {
        let _guard = self.lock.lock().await;
        self.load().await
    }

    async fn load(&self) -> Result<BTreeMap<String, SessionRecord>, SessionStoreError> {
        let data = match tokio::fs::read(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(source) => {
                return Err(SessionStoreError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        match serde_json::from_slice(&data) {
            Ok(records) => Ok(records),
            Err(e) => {
                // A damaged store only costs the ability to resume.
                warn!(path = %self.path.display(), error = %e, "ignoring unreadable session store");
                Ok(BTreeMap::new())
            }
        }
    }

    async fn save(&self, records: &BTreeMap<String, SessionRecord>) -> Result<(), SessionStoreError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| SessionStoreError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        let data = serde_json::to_vec_pretty(records)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &data)
            .await
            .map_err(|source| SessionStoreError::Io {
                path: tmp.clone(),
                source,
            })?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|source| SessionStoreError::Io {
                path: self.path.clone(),
                source,
            })?;

        debug!(path = %self.path.display(), records = records.len(), "saved session store");
        Ok(())
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn get(&self, key: &str) -> Result<Option<SessionRecord>, SessionStoreError> {
        let _guard = self.lock.lock().await;
        Ok(self.load().await?.remove(key))
    }

    async fn set(&self, key: &str, record: SessionRecord) -> Result<(), SessionStoreError> {
        let _guard = self.lock.lock().await;
        let mut records = self.load().await?;
        records.insert(key.to_owned(), record);
        self.save(&records).await
    }

    async fn delete(&self, key: &str) -> Result<(), SessionStoreError> {
        let _guard = self.lock.lock().await;
        let mut records = self.load().await?;
        if records.remove(key).is_some() {
            self.save(&records).await?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemorySessionStore
// ---------------------------------------------------------------------------

/// Process-local session store.
///
/// # Examples
///
/// ```
/// use stowline_transfer::{MemorySessionStore, SessionRecord, SessionStore};
///
/// # tokio_test::block_on(async {
/// let store = MemorySessionStore::new();
/// store.set("bucket/photo.jpg", SessionRecord::new("https://host/upload?upload_id=1")).await.unwrap();
/// assert_eq!(store.len(), 1);
/// store.delete("bucket/photo.jpg").await.unwrap();
/// assert!(store.is_empty());
/// # });
/// ```
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    inner: DashMap<String, SessionRecord>,
}

impl MemorySessionStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, key: &str) -> Result<Option<SessionRecord>, SessionStoreError> {
        Ok(self.inner.get(key).map(|r| r.value().clone()))
    }

    async fn set(&self, key: &str, record: SessionRecord) -> Result<(), SessionStoreError> {
        self.inner.insert(key.to_owned(), record);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), SessionStoreError> {
        self.inner.remove(key);
        Ok(())
    }
}
