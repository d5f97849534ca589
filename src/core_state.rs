//! Process-wide application state.
//!
//! Holds the only shared mutable resource, the store connection, behind a
//! `Mutex`, next to the immutable field codec and the collaborator handles.
//! Wrapped in `Arc` at startup and shared with every request.

use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::Connection;

use crate::audit::AuditTrail;
use crate::blob_store::BlobStore;
use crate::crypto::FieldCodec;
use crate::db;
use crate::insight::InsightService;

pub struct CoreState {
    db: Arc<Mutex<Connection>>,
    codec: FieldCodec,
    blobs: Arc<dyn BlobStore>,
    insight: Arc<dyn InsightService>,
    audit: AuditTrail,
}

impl CoreState {
    /// Assemble the state and start the audit writer. Must be called from
    /// within a tokio runtime.
    pub fn new(
        conn: Connection,
        codec: FieldCodec,
        blobs: Arc<dyn BlobStore>,
        insight: Arc<dyn InsightService>,
    ) -> Self {
        let db = Arc::new(Mutex::new(conn));
        let (audit, _writer) = AuditTrail::spawn(db.clone());
        Self {
            db,
            codec,
            blobs,
            insight,
            audit,
        }
    }

    /// Lock the store connection. Hold the guard only for the statements
    /// of one unit of work, never across an `.await`.
    pub fn db(&self) -> Result<MutexGuard<'_, Connection>, CoreError> {
        self.db.lock().map_err(|_| CoreError::LockPoisoned)
    }

    pub fn codec(&self) -> &FieldCodec {
        &self.codec
    }

    pub fn blobs(&self) -> Arc<dyn BlobStore> {
        self.blobs.clone()
    }

    pub fn insight(&self) -> Arc<dyn InsightService> {
        self.insight.clone()
    }

    pub fn audit(&self) -> &AuditTrail {
        &self.audit
    }

    /// In-memory store, in-memory blobs, fixed key.
    #[cfg(test)]
    pub(crate) fn for_tests(
        blobs: Arc<dyn BlobStore>,
        insight: Arc<dyn InsightService>,
    ) -> Self {
        let conn = db::open_memory_database().expect("in-memory database");
        let codec = FieldCodec::from_secret("core-state-test-secret").expect("codec");
        Self::new(conn, codec, blobs, insight)
    }
}

/// Errors from CoreState operations.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Internal lock error")]
    LockPoisoned,
    #[error("Database error: {0}")]
    Database(#[from] db::DatabaseError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob_store::MemoryBlobStore;
    use crate::insight::DisabledInsight;

    #[tokio::test]
    async fn test_state_has_migrated_store() {
        let state = CoreState::for_tests(Arc::new(MemoryBlobStore::new()), Arc::new(DisabledInsight));
        let conn = state.db().unwrap();
        assert_eq!(db::count_tables(&conn).unwrap(), 6);
    }

    #[tokio::test]
    async fn codec_round_trips() {
        let state = CoreState::for_tests(Arc::new(MemoryBlobStore::new()), Arc::new(DisabledInsight));
        let token = state.codec().encrypt("note").unwrap();
        assert_eq!(state.codec().decrypt(&token), "note");
    }

    #[tokio::test]
    async fn audit_starts_clean() {
        let state = CoreState::for_tests(Arc::new(MemoryBlobStore::new()), Arc::new(DisabledInsight));
        state.audit().flush().await;
        assert_eq!(state.audit().failures(), 0);
    }
}
