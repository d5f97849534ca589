use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::enums::{RecordStatus, RecordType};

/// Open key/value map attached to a record.
pub type Metadata = Map<String, Value>;

/// A clinical document shared by a hospital with one patient.
///
/// `description` is held as plaintext here; it only exists as a ciphertext
/// token inside the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub hospital_id: Uuid,
    pub hospital_name: String,
    pub record_type: RecordType,
    pub title: String,
    pub description: String,
    pub files: Vec<FileRef>,
    pub status: RecordStatus,
    /// Present iff `status == Rejected`.
    pub rejection_reason: Option<String>,
    pub is_deleted: bool,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Pointer to an artifact held by the Blob Store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRef {
    pub reference: String,
    pub url: String,
    pub name: String,
    pub size: u64,
    pub mime_type: String,
}

/// Record counts per status within the caller's scope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecordStats {
    pub total: u64,
    pub pending: u64,
    pub approved: u64,
    pub rejected: u64,
}

/// Shallow merge: incoming keys overwrite, untouched keys survive.
pub fn merge_metadata(existing: &mut Metadata, incoming: Metadata) {
    for (key, value) in incoming {
        existing.insert(key, value);
    }
}
