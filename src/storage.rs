//! Object storage seam: existence probe and overwrite-safe writes.
//!
//! The pipeline only ever needs two verbs — `head_object` and `put_object` —
//! so that is the whole trait. "Not found" is data (`Ok(None)`), never an
//! error: only transport failures error, and those propagate to the
//! per-image pipeline where they mark the image failed for the next retry.
//!
//! Two implementations ship with the crate as glue, not core:
//! [`MemoryStore`] backs the test suite (instrumented with call counters)
//! and [`FsStore`] maps keys to files under a root directory so the CLI can
//! run against a local disk. Production embedders implement the trait over
//! their real object store client.

use async_trait::async_trait;
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use thiserror::Error;
use tracing::debug;

/// Transport-level storage failure. Absence of a key is not an error.
#[derive(Debug, Error)]
#[error("storage transport error: {detail}")]
pub struct StorageError {
    pub detail: String,
}

impl StorageError {
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
        }
    }
}

impl From<io::Error> for StorageError {
    fn from(e: io::Error) -> Self {
        Self::new(e.to_string())
    }
}

/// Metadata returned by a successful existence probe.
#[derive(Debug, Clone)]
pub struct ObjectMeta {
    pub key: String,
    pub size: u64,
}

/// One overwrite-safe write.
#[derive(Debug, Clone)]
pub struct ObjectPut {
    pub key: String,
    pub body: Vec<u8>,
    /// `Cache-Control` header to store alongside the object; long-lived for
    /// originals, shorter for derivatives.
    pub cache_control: String,
    pub content_type: Option<String>,
}

/// The storage collaborator consumed by the pipeline.
///
/// Writes must be idempotent in effect: re-putting the same key with the
/// same inputs is a no-op for readers.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Probe `key`. `Ok(None)` when absent; errors only on transport
    /// failures.
    async fn head_object(&self, key: &str) -> Result<Option<ObjectMeta>, StorageError>;

    /// Write (or overwrite) `key`.
    async fn put_object(&self, put: ObjectPut) -> Result<(), StorageError>;
}

// ── In-memory store ──────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct StoredObject {
    body: Vec<u8>,
    cache_control: String,
    content_type: Option<String>,
}

/// In-memory store for tests and demos.
///
/// Counts head/put calls so tests can assert the pipeline's exact storage
/// traffic (cache short-circuits, idempotent re-entry).
#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<HashMap<String, StoredObject>>,
    heads: AtomicUsize,
    puts: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-seed a key, e.g. a canonical derivative from a "prior run".
    pub fn seed(&self, key: &str, body: Vec<u8>) {
        self.objects.lock().expect("store lock").insert(
            key.to_string(),
            StoredObject {
                body,
                cache_control: String::new(),
                content_type: None,
            },
        );
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.lock().expect("store lock").contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.objects.lock().expect("store lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stored bytes for `key`, if present.
    pub fn body(&self, key: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .expect("store lock")
            .get(key)
            .map(|o| o.body.clone())
    }

    /// Stored content type for `key`, if present.
    pub fn content_type(&self, key: &str) -> Option<String> {
        self.objects
            .lock()
            .expect("store lock")
            .get(key)
            .and_then(|o| o.content_type.clone())
    }

    /// Stored cache-control for `key`, if present.
    pub fn cache_control(&self, key: &str) -> Option<String> {
        self.objects
            .lock()
            .expect("store lock")
            .get(key)
            .map(|o| o.cache_control.clone())
    }

    /// Number of `head_object` calls since construction.
    pub fn head_calls(&self) -> usize {
        self.heads.load(Ordering::SeqCst)
    }

    /// Number of `put_object` calls since construction.
    pub fn put_calls(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn head_object(&self, key: &str) -> Result<Option<ObjectMeta>, StorageError> {
        self.heads.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .objects
            .lock()
            .expect("store lock")
            .get(key)
            .map(|o| ObjectMeta {
                key: key.to_string(),
                size: o.body.len() as u64,
            }))
    }

    async fn put_object(&self, put: ObjectPut) -> Result<(), StorageError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.objects.lock().expect("store lock").insert(
            put.key,
            StoredObject {
                body: put.body,
                cache_control: put.cache_control,
                content_type: put.content_type,
            },
        );
        Ok(())
    }
}

// ── Filesystem store ─────────────────────────────────────────────────────

/// Object store backed by a local directory; keys become relative paths.
///
/// Writes are atomic (temp file + rename) so a concurrent reader never
/// observes a half-written derivative. Cache-control and content-type are
/// accepted and dropped — the filesystem has nowhere to put them, and the
/// CLI use case (local inspection of derivative sets) does not need them.
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

#[async_trait]
impl ObjectStore for FsStore {
    async fn head_object(&self, key: &str) -> Result<Option<ObjectMeta>, StorageError> {
        match tokio::fs::metadata(self.path_for(key)).await {
            Ok(meta) => Ok(Some(ObjectMeta {
                key: key.to_string(),
                size: meta.len(),
            })),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put_object(&self, put: ObjectPut) -> Result<(), StorageError> {
        let path = self.path_for(&put.key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Atomic write: temp file in the same directory, then rename.
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, &put.body).await?;
        tokio::fs::rename(&tmp, &path).await?;

        debug!("Wrote {} ({} bytes)", path.display(), put.body.len());
        Ok(())
    }
}
