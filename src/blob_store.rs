//! Blob Store adapter for record attachments.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum BlobError {
    #[error("Blob I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid blob reference")]
    InvalidReference,

    #[error("Blob store rejected the artifact: {0}")]
    Rejected(String),

    #[error("Blob store lock poisoned")]
    LockPoisoned,
}

/// One artifact received from a client.
#[derive(Debug, Clone)]
pub struct Upload {
    pub file_name: String,
    pub content_type: Option<String>,
    pub data: Vec<u8>,
}

/// What the store hands back for a stored artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    pub reference: String,
    pub url: String,
    pub size: u64,
    pub mime_type: String,
}

pub trait BlobStore: Send + Sync {
    fn store(&self, upload: &Upload) -> Result<StoredBlob, BlobError>;
    fn fetch(&self, reference: &str) -> Result<Vec<u8>, BlobError>;
    fn delete(&self, reference: &str) -> Result<(), BlobError>;
}

/// Client-declared type when present, otherwise guessed from the name.
fn resolve_mime(upload: &Upload) -> String {
    upload
        .content_type
        .as_deref()
        .map(str::trim)
        .filter(|ct| !ct.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| {
            mime_guess::from_path(&upload.file_name)
                .first_or_octet_stream()
                .essence_str()
                .to_string()
        })
}

/// References are always bare UUIDs, which keeps them out of path syntax.
fn checked_reference(reference: &str) -> Result<Uuid, BlobError> {
    Uuid::parse_str(reference).map_err(|_| BlobError::InvalidReference)
}

// ═══════════════════════════════════════════════════════════
// Local filesystem
// ═══════════════════════════════════════════════════════════

pub struct LocalBlobStore {
    root: PathBuf,
    public_url: String,
}

impl LocalBlobStore {
    pub fn open(root: &Path, public_url: &str) -> Result<Self, BlobError> {
        std::fs::create_dir_all(root)?;
        Ok(Self {
            root: root.to_path_buf(),
            public_url: public_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl BlobStore for LocalBlobStore {
    fn store(&self, upload: &Upload) -> Result<StoredBlob, BlobError> {
        let reference = Uuid::new_v4().to_string();
        std::fs::write(self.root.join(&reference), &upload.data)?;
        Ok(StoredBlob {
            url: format!("{}/files/{reference}", self.public_url),
            reference,
            size: upload.data.len() as u64,
            mime_type: resolve_mime(upload),
        })
    }

    fn fetch(&self, reference: &str) -> Result<Vec<u8>, BlobError> {
        let id = checked_reference(reference)?;
        Ok(std::fs::read(self.root.join(id.to_string()))?)
    }

    fn delete(&self, reference: &str) -> Result<(), BlobError> {
        let id = checked_reference(reference)?;
        std::fs::remove_file(self.root.join(id.to_string()))?;
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════
// In-memory
// ═══════════════════════════════════════════════════════════

/// Keeps artifacts in a map. Can be told to reject stores after a number
/// of successes, to exercise cleanup paths.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
    accept_limit: Option<usize>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `count` stores, then reject every further one.
    pub fn accepting(count: usize) -> Self {
        Self {
            blobs: Mutex::new(HashMap::new()),
            accept_limit: Some(count),
        }
    }

    pub fn contains(&self, reference: &str) -> bool {
        self.blobs
            .lock()
            .map(|b| b.contains_key(reference))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl BlobStore for MemoryBlobStore {
    fn store(&self, upload: &Upload) -> Result<StoredBlob, BlobError> {
        let mut blobs = self.blobs.lock().map_err(|_| BlobError::LockPoisoned)?;
        if self.accept_limit.is_some_and(|limit| blobs.len() >= limit) {
            return Err(BlobError::Rejected("capacity reached".into()));
        }
        let reference = Uuid::new_v4().to_string();
        blobs.insert(reference.clone(), upload.data.clone());
        Ok(StoredBlob {
            url: format!("memory://{reference}"),
            reference,
            size: upload.data.len() as u64,
            mime_type: resolve_mime(upload),
        })
    }

    fn fetch(&self, reference: &str) -> Result<Vec<u8>, BlobError> {
        let blobs = self.blobs.lock().map_err(|_| BlobError::LockPoisoned)?;
        blobs.get(reference).cloned().ok_or(BlobError::InvalidReference)
    }

    fn delete(&self, reference: &str) -> Result<(), BlobError> {
        let mut blobs = self.blobs.lock().map_err(|_| BlobError::LockPoisoned)?;
        blobs
            .remove(reference)
            .map(|_| ())
            .ok_or(BlobError::InvalidReference)
    }
}

// ═══════════════════════════════════════════════════════════
// Cleanup
// ═══════════════════════════════════════════════════════════

/// Delete artifacts on a detached blocking worker. Each reference is
/// attempted independently; failures are logged and skipped. Callers do
/// not need to await the handle.
pub fn spawn_artifact_cleanup(
    store: Arc<dyn BlobStore>,
    references: Vec<String>,
) -> JoinHandle<usize> {
    tokio::task::spawn_blocking(move || {
        let mut removed = 0;
        for reference in &references {
            match store.delete(reference) {
                Ok(()) => removed += 1,
                Err(e) => {
                    tracing::warn!(reference = %reference, error = %e, "Artifact cleanup failed");
                }
            }
        }
        tracing::info!(removed, attempted = references.len(), "Artifact cleanup finished");
        removed
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upload(name: &str, content_type: Option<&str>) -> Upload {
        Upload {
            file_name: name.into(),
            content_type: content_type.map(str::to_string),
            data: b"%PDF-1.4 sample".to_vec(),
        }
    }

    #[test]
    fn local_store_writes_and_deletes() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::open(&dir.path().join("blobs"), "http://localhost:8080/").unwrap();

        let stored = store.store(&upload("lab.pdf", None)).unwrap();
        assert_eq!(stored.size, 15);
        assert_eq!(stored.mime_type, "application/pdf");
        assert_eq!(stored.url, format!("http://localhost:8080/files/{}", stored.reference));
        assert!(store.root().join(&stored.reference).exists());
        assert_eq!(store.fetch(&stored.reference).unwrap(), b"%PDF-1.4 sample");

        store.delete(&stored.reference).unwrap();
        assert!(!store.root().join(&stored.reference).exists());
    }

    #[test]
    fn declared_content_type_wins() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::open(dir.path(), "http://x").unwrap();
        let stored = store.store(&upload("scan.bin", Some("image/png"))).unwrap();
        assert_eq!(stored.mime_type, "image/png");
    }

    #[test]
    fn unknown_extension_is_octet_stream() {
        let store = MemoryBlobStore::new();
        let stored = store.store(&upload("notes.zzz-unknown", None)).unwrap();
        assert_eq!(stored.mime_type, "application/octet-stream");
    }

    #[test]
    fn local_fetch_rejects_path_syntax() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::open(dir.path(), "http://localhost").unwrap();
        assert!(matches!(store.fetch("../secret"), Err(BlobError::InvalidReference)));
    }

    #[test]
    fn local_delete_rejects_path_syntax() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::open(dir.path(), "http://x").unwrap();
        assert!(matches!(store.delete("../etc/passwd"), Err(BlobError::InvalidReference)));
    }

    #[test]
    fn memory_store_rejects_after_limit() {
        let store = MemoryBlobStore::accepting(1);
        store.store(&upload("a.pdf", None)).unwrap();
        assert!(matches!(store.store(&upload("b.pdf", None)), Err(BlobError::Rejected(_))));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn cleanup_continues_past_failures() {
        let store = Arc::new(MemoryBlobStore::new());
        let a = store.store(&upload("a.pdf", None)).unwrap().reference;
        let b = store.store(&upload("b.pdf", None)).unwrap().reference;

        let removed = spawn_artifact_cleanup(
            store.clone(),
            vec![a.clone(), "missing".into(), b.clone()],
        )
        .await
        .unwrap();

        assert_eq!(removed, 2);
        assert!(store.is_empty());
    }
}
