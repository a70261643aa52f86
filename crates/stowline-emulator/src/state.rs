//! In-memory emulator state: stored objects, open upload sessions, fault
//! switches and the request log.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, SecondsFormat, Utc};
use dashmap::DashMap;
use md5::{Digest, Md5};
use parking_lot::Mutex;
use stowline_core::ObjectMetadata;
use stowline_core::endpoint::encode_segment;
use tracing::debug;

/// A finished object.
#[derive(Debug, Clone)]
pub struct StoredObject {
    /// Bucket name.
    pub bucket: String,
    /// Object name.
    pub name: String,
    /// Object data.
    pub data: Bytes,
    /// Declared content type.
    pub content_type: String,
    /// Custom metadata.
    pub metadata: BTreeMap<String, String>,
    /// Generation number.
    pub generation: u64,
    /// Base64 MD5 of `data`.
    pub md5_hash: String,
    /// Base64 big-endian CRC-32C of `data`.
    pub crc32c: String,
    /// Creation time.
    pub created: DateTime<Utc>,
}

/// An open resumable upload.
#[derive(Debug, Clone)]
pub struct UploadSession {
    /// Target bucket.
    pub bucket: String,
    /// Target object name.
    pub name: String,
    /// Content type declared at initiation.
    pub content_type: String,
    /// Custom metadata declared at initiation.
    pub metadata: BTreeMap<String, String>,
    /// Bytes received so far.
    pub data: BytesMut,
    /// Object key once the upload has been finalized.
    pub completed: Option<String>,
}

/// One request as seen by the emulator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggedRequest {
    /// HTTP method.
    pub method: String,
    /// Path and query, exactly as received.
    pub path: String,
    /// `Content-Range` header, if any.
    pub content_range: Option<String>,
}

/// Fault injection switches.
#[derive(Debug, Default)]
pub struct Faults {
    corrupt_checksums: AtomicBool,
    fail_deletes: AtomicBool,
    fail_metadata: AtomicBool,
}

impl Faults {
    /// Report wrong `md5Hash` and `crc32c` values for every object.
    pub fn set_corrupt_checksums(&self, on: bool) {
        self.corrupt_checksums.store(on, Ordering::SeqCst);
    }

    /// Answer every object DELETE with `503`.
    pub fn set_fail_deletes(&self, on: bool) {
        self.fail_deletes.store(on, Ordering::SeqCst);
    }

    /// Answer every metadata GET with `503`.
    pub fn set_fail_metadata(&self, on: bool) {
        self.fail_metadata.store(on, Ordering::SeqCst);
    }

    pub(crate) fn corrupt_checksums(&self) -> bool {
        self.corrupt_checksums.load(Ordering::SeqCst)
    }

    pub(crate) fn fail_deletes(&self) -> bool {
        self.fail_deletes.load(Ordering::SeqCst)
    }

    pub(crate) fn fail_metadata(&self) -> bool {
        self.fail_metadata.load(Ordering::SeqCst)
    }
}

/// Shared emulator state.
#[derive(Debug, Default)]
pub struct EmulatorState {
    objects: DashMap<String, StoredObject>,
    sessions: DashMap<String, UploadSession>,
    requests: Mutex<Vec<LoggedRequest>>,
    generation: AtomicU64,
    /// Fault injection switches.
    pub faults: Faults,
}

fn object_key(bucket: &str, name: &str) -> String {
    format!("{bucket}/{name}")
}

/// Base64 MD5 and CRC-32C of `data`.
#[must_use]
pub fn digests(data: &[u8]) -> (String, String) {
    let md5 = BASE64_STANDARD.encode(Md5::digest(data));
    let crc = BASE64_STANDARD.encode(crc32c::crc32c(data).to_be_bytes());
    (md5, crc)
}

impl EmulatorState {
    /// Create empty state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // -----------------------------------------------------------------------
    // Objects
    // -----------------------------------------------------------------------

    /// Store a finished object, replacing any previous generation.
    pub fn put_object(
        &self,
        bucket: &str,
        name: &str,
        data: Bytes,
        content_type: String,
        metadata: BTreeMap<String, String>,
    ) -> StoredObject {
        let (md5_hash, crc32c) = digests(&data);
        let object = StoredObject {
            bucket: bucket.to_owned(),
            name: name.to_owned(),
            data,
            content_type,
            metadata,
            generation: self.generation.fetch_add(1, Ordering::SeqCst) + 1,
            md5_hash,
            crc32c,
            created: Utc::now(),
        };
        debug!(bucket, name, size = object.data.len(), "stored object");
        self.objects
            .insert(object_key(bucket, name), object.clone());
        object
    }

    /// Look up an object.
    #[must_use]
    pub fn get_object(&self, bucket: &str, name: &str) -> Option<StoredObject> {
        self.objects
            .get(&object_key(bucket, name))
            .map(|o| o.value().clone())
    }

    /// Remove an object. Returns whether it existed.
    pub fn delete_object(&self, bucket: &str, name: &str) -> bool {
        self.objects.remove(&object_key(bucket, name)).is_some()
    }

    /// Number of stored objects.
    #[must_use]
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// The JSON API resource for `object`. `base` is the scheme and authority
    /// the client used to reach the emulator.
    #[must_use]
    pub fn resource(&self, object: &StoredObject, base: &str) -> ObjectMetadata {
        let (md5_hash, crc32c) = if self.faults.corrupt_checksums() {
            let mut corrupted = object.data.to_vec();
            corrupted.extend_from_slice(b"corrupt");
            digests(&corrupted)
        } else {
            (object.md5_hash.clone(), object.crc32c.clone())
        };

        let bucket = encode_segment(&object.bucket);
        let name = encode_segment(&object.name);
        let created = object.created.to_rfc3339_opts(SecondsFormat::Millis, true);
        let mut extra = serde_json::Map::new();
        extra.insert("kind".to_owned(), "storage#object".into());
        extra.insert(
            "id".to_owned(),
            format!("{}/{}/{}", object.bucket, object.name, object.generation).into(),
        );
        extra.insert(
            "selfLink".to_owned(),
            format!("{base}/storage/v1/b/{bucket}/o/{name}").into(),
        );
        extra.insert("timeCreated".to_owned(), created.clone().into());
        extra.insert("updated".to_owned(), created.into());

        ObjectMetadata {
            name: object.name.clone(),
            bucket: object.bucket.clone(),
            size: Some(object.data.len().to_string()),
            content_type: Some(object.content_type.clone()),
            md5_hash: Some(md5_hash),
            crc32c: Some(crc32c),
            media_link: Some(format!(
                "{base}/download/storage/v1/b/{bucket}/o/{name}?generation={}&alt=media",
                object.generation
            )),
            generation: Some(object.generation.to_string()),
            metadata: object.metadata.clone(),
            extra,
        }
    }

    // -----------------------------------------------------------------------
    // Resumable sessions
    // -----------------------------------------------------------------------

    /// Open a resumable session and return its id.
    pub fn create_session(
        &self,
        bucket: &str,
        name: &str,
        content_type: String,
        metadata: BTreeMap<String, String>,
    ) -> String {
        let id = uuid::Uuid::new_v4().simple().to_string();
        self.sessions.insert(
            id.clone(),
            UploadSession {
                bucket: bucket.to_owned(),
                name: name.to_owned(),
                content_type,
                metadata,
                data: BytesMut::new(),
                completed: None,
            },
        );
        debug!(bucket, name, upload_id = %id, "created upload session");
        id
    }

    /// Snapshot of a session.
    #[must_use]
    pub fn session(&self, id: &str) -> Option<UploadSession> {
        self.sessions.get(id).map(|s| s.value().clone())
    }

    /// Bytes persisted in a session, `None` when it does not exist.
    #[must_use]
    pub fn session_len(&self, id: &str) -> Option<u64> {
        self.sessions.get(id).map(|s| s.data.len() as u64)
    }

    /// Drop everything past `offset` so the next write continues there.
    pub fn truncate_session(&self, id: &str, offset: u64) {
        if let Some(mut session) = self.sessions.get_mut(id) {
            let offset = usize::try_from(offset).unwrap_or(usize::MAX);
            if offset < session.data.len() {
                session.data.truncate(offset);
            }
        }
    }

    /// Append received bytes to a session.
    pub fn append_to_session(&self, id: &str, chunk: &[u8]) -> bool {
        match self.sessions.get_mut(id) {
            Some(mut session) => {
                session.data.extend_from_slice(chunk);
                true
            }
            None => false,
        }
    }

    /// Turn a session's bytes into an object.
    pub fn finalize_session(&self, id: &str) -> Option<StoredObject> {
        let snapshot = self.session(id)?;
        let object = self.put_object(
            &snapshot.bucket,
            &snapshot.name,
            snapshot.data.freeze(),
            snapshot.content_type,
            snapshot.metadata,
        );
        if let Some(mut session) = self.sessions.get_mut(id) {
            session.completed = Some(object_key(&object.bucket, &object.name));
        }
        Some(object)
    }

    /// The object a completed session produced, if it still exists.
    #[must_use]
    pub fn completed_object(&self, id: &str) -> Option<StoredObject> {
        let key = self.sessions.get(id)?.completed.clone()?;
        self.objects.get(&key).map(|o| o.value().clone())
    }

    // -----------------------------------------------------------------------
    // Request log
    // -----------------------------------------------------------------------

    pub(crate) fn record(&self, request: LoggedRequest) {
        self.requests.lock().push(request);
    }

    /// Every request received so far.
    #[must_use]
    pub fn requests(&self) -> Vec<LoggedRequest> {
        self.requests.lock().clone()
    }

    /// Forget the recorded requests.
    pub fn clear_requests(&self) {
        self.requests.lock().clear();
    }
}
