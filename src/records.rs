//! Record lifecycle: creation with attachments, scoped reads, the
//! PENDING → APPROVED / REJECTED transition, content edits and soft delete.
//!
//! Every mutating operation writes exactly one audit entry carrying its
//! real outcome.

use std::sync::Arc;

use chrono::Utc;
use rusqlite::Connection;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::authorization::{authorize, Caller, Operation, Ownership};
use crate::blob_store::{spawn_artifact_cleanup, BlobError, BlobStore, StoredBlob, Upload};
use crate::core_state::CoreState;
use crate::crypto::FieldCodec;
use crate::db::repository;
use crate::error::DomainError;
use crate::models::enums::{AuditAction, RecordStatus, RecordType, Role, TargetType};
use crate::models::*;

pub const MAX_TITLE_CHARS: usize = 200;
pub const MAX_UPLOADS: usize = 10;
pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

// ═══════════════════════════════════════════
// Inputs
// ═══════════════════════════════════════════

#[derive(Debug, Clone, Default)]
pub struct NewRecord {
    pub patient_id: Option<Uuid>,
    pub record_type: Option<RecordType>,
    pub title: String,
    pub description: String,
    pub metadata: Metadata,
    pub uploads: Vec<Upload>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusChange {
    pub status: RecordStatus,
    #[serde(default)]
    pub rejection_reason: Option<String>,
}

/// Partial content edit. Absent fields are left alone; metadata is merged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecordEdit {
    pub title: Option<String>,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub record_type: Option<RecordType>,
    pub metadata: Option<Metadata>,
}

impl RecordEdit {
    fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.record_type.is_none()
            && self.metadata.is_none()
    }

    fn field_names(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.title.is_some() {
            names.push("title");
        }
        if self.description.is_some() {
            names.push("description");
        }
        if self.record_type.is_some() {
            names.push("type");
        }
        if self.metadata.is_some() {
            names.push("metadata");
        }
        names
    }
}

// ═══════════════════════════════════════════
// Validation
// ═══════════════════════════════════════════

fn validate_title(title: &str) -> Result<(), DomainError> {
    if title.trim().is_empty() {
        return Err(DomainError::validation("title is required"));
    }
    if title.chars().count() > MAX_TITLE_CHARS {
        return Err(DomainError::validation(format!(
            "title exceeds {MAX_TITLE_CHARS} characters"
        )));
    }
    Ok(())
}

fn validate_description(description: &str) -> Result<(), DomainError> {
    if description.trim().is_empty() {
        return Err(DomainError::validation("description is required"));
    }
    Ok(())
}

fn validate_uploads(uploads: &[Upload]) -> Result<(), DomainError> {
    if uploads.len() > MAX_UPLOADS {
        return Err(DomainError::validation(format!(
            "at most {MAX_UPLOADS} files per record"
        )));
    }
    for (index, upload) in uploads.iter().enumerate() {
        if upload.data.is_empty() {
            return Err(DomainError::validation(format!("file #{} is empty", index + 1)));
        }
        if upload.data.len() > MAX_UPLOAD_BYTES {
            return Err(DomainError::validation(format!(
                "file #{} exceeds {} MiB",
                index + 1,
                MAX_UPLOAD_BYTES / (1024 * 1024)
            )));
        }
    }
    Ok(())
}

fn validate_new_record(input: &NewRecord) -> Result<(Uuid, RecordType), DomainError> {
    let patient_id = input
        .patient_id
        .ok_or_else(|| DomainError::validation("patient_id is required"))?;
    let record_type = input
        .record_type
        .ok_or_else(|| DomainError::validation("type is required"))?;
    validate_title(&input.title)?;
    validate_description(&input.description)?;
    validate_uploads(&input.uploads)?;
    Ok((patient_id, record_type))
}

// ═══════════════════════════════════════════
// Helpers
// ═══════════════════════════════════════════

fn record_ownership(record: Option<&Record>) -> Ownership {
    match record {
        Some(r) if !r.is_deleted => Ownership::Record {
            patient_id: r.patient_id,
            hospital_id: r.hospital_id,
        },
        _ => Ownership::Missing,
    }
}

/// Load a record and gate `op` on it. Absent and soft-deleted records are
/// NotFound for every caller.
fn load_authorized(
    conn: &Connection,
    codec: &FieldCodec,
    caller: &Caller,
    id: &Uuid,
    op: Operation,
) -> Result<Record, DomainError> {
    let record = repository::get_record(conn, codec, id)?;
    authorize(&caller.principal, op, record_ownership(record.as_ref()))?;
    record.ok_or(DomainError::NotFound)
}

fn reload(conn: &Connection, codec: &FieldCodec, id: &Uuid) -> Result<Record, DomainError> {
    repository::get_record(conn, codec, id)?.ok_or(DomainError::NotFound)
}

/// Store every upload in order, stopping at the first failure. Returns what
/// was stored so far alongside the failure, so the caller can clean up.
fn store_uploads(
    store: &dyn BlobStore,
    uploads: &[Upload],
) -> (Vec<(String, StoredBlob)>, Option<BlobError>) {
    let mut stored = Vec::with_capacity(uploads.len());
    for upload in uploads {
        match store.store(upload) {
            Ok(blob) => stored.push((upload.file_name.clone(), blob)),
            Err(e) => return (stored, Some(e)),
        }
    }
    (stored, None)
}

fn cleanup(store: Arc<dyn BlobStore>, stored: &[FileRef]) {
    if stored.is_empty() {
        return;
    }
    let references = stored.iter().map(|f| f.reference.clone()).collect();
    // Detached; the caller's error response does not wait for it.
    let _ = spawn_artifact_cleanup(store, references);
}

// ═══════════════════════════════════════════
// Operations
// ═══════════════════════════════════════════

/// Create a PENDING record owned by the calling hospital.
pub async fn create_record(
    state: &CoreState,
    caller: &Caller,
    input: NewRecord,
) -> Result<Record, DomainError> {
    let file_count = input.uploads.len();
    let outcome = create_record_inner(state, caller, input).await;

    let mut details = Map::new();
    details.insert("files".into(), json!(file_count));
    state.audit().record(
        caller,
        AuditAction::RecordCreated,
        outcome.as_ref().ok().map(|r| (TargetType::Record, r.id)),
        &outcome,
        details,
    );
    outcome
}

async fn create_record_inner(
    state: &CoreState,
    caller: &Caller,
    input: NewRecord,
) -> Result<Record, DomainError> {
    authorize(&caller.principal, Operation::CreateRecord, Ownership::Collection)?;
    let (patient_id, record_type) = validate_new_record(&input)?;

    let NewRecord {
        title,
        description,
        metadata,
        uploads,
        ..
    } = input;

    let store = state.blobs();
    let worker_store = store.clone();
    let (stored, failure) =
        tokio::task::spawn_blocking(move || store_uploads(worker_store.as_ref(), &uploads))
            .await
            .map_err(|e| BlobError::Rejected(format!("upload worker failed: {e}")))?;

    let files: Vec<FileRef> = stored
        .into_iter()
        .map(|(name, blob)| FileRef {
            reference: blob.reference,
            url: blob.url,
            name,
            size: blob.size,
            mime_type: blob.mime_type,
        })
        .collect();

    if let Some(err) = failure {
        tracing::warn!(stored = files.len(), error = %err, "Upload failed, cleaning up stored artifacts");
        cleanup(store, &files);
        return Err(err.into());
    }

    let inserted = insert_new_record(
        state,
        caller,
        patient_id,
        record_type,
        title,
        description,
        metadata,
        files.clone(),
    );
    if inserted.is_err() {
        cleanup(store, &files);
    }
    let record = inserted?;

    tracing::info!(
        record_id = %record.id,
        hospital_id = %record.hospital_id,
        files = record.files.len(),
        "Record created"
    );
    Ok(record)
}

#[allow(clippy::too_many_arguments)]
fn insert_new_record(
    state: &CoreState,
    caller: &Caller,
    patient_id: Uuid,
    record_type: RecordType,
    title: String,
    description: String,
    metadata: Metadata,
    files: Vec<FileRef>,
) -> Result<Record, DomainError> {
    let conn = state.db()?;

    match repository::get_user(&conn, &patient_id)? {
        Some(user) if user.role == Role::Patient => {}
        _ => return Err(DomainError::NotFound),
    }
    let hospital = match repository::get_user(&conn, &caller.id())? {
        Some(user) if user.role == Role::Hospital => user,
        _ => {
            return Err(DomainError::validation(
                "calling hospital is not registered in the directory",
            ))
        }
    };

    let now = Utc::now();
    let record = Record {
        id: Uuid::new_v4(),
        patient_id,
        hospital_id: hospital.id,
        hospital_name: hospital.name,
        record_type,
        title: title.trim().to_string(),
        description,
        files,
        status: RecordStatus::Pending,
        rejection_reason: None,
        is_deleted: false,
        metadata,
        created_at: now,
        updated_at: now,
    };
    repository::insert_record(&conn, state.codec(), &record)?;
    Ok(record)
}

pub fn list_records(
    state: &CoreState,
    caller: &Caller,
    filter: &RecordFilter,
) -> Result<Vec<Record>, DomainError> {
    authorize(&caller.principal, Operation::ListRecords, Ownership::Collection)?;
    let conn = state.db()?;
    Ok(repository::list_records(
        &conn,
        state.codec(),
        caller.principal.scope(),
        filter,
    )?)
}

pub fn get_record(state: &CoreState, caller: &Caller, id: Uuid) -> Result<Record, DomainError> {
    let conn = state.db()?;
    load_authorized(&conn, state.codec(), caller, &id, Operation::ReadRecord)
}

/// An attachment together with what was recorded about it at upload.
#[derive(Debug, Clone)]
pub struct Download {
    pub file: FileRef,
    pub data: Vec<u8>,
}

/// Read one attachment by its reference. Visible exactly when its record
/// is: owning patient, owning hospital or an admin, and never once the
/// record is soft-deleted.
pub async fn download_file(
    state: &CoreState,
    caller: &Caller,
    reference: &str,
) -> Result<Download, DomainError> {
    let file = {
        let conn = state.db()?;
        let record = repository::find_record_by_file(&conn, state.codec(), reference)?;
        authorize(&caller.principal, Operation::ReadRecord, record_ownership(record.as_ref()))?;
        record
            .and_then(|r| r.files.into_iter().find(|f| f.reference == reference))
            .ok_or(DomainError::NotFound)?
    };

    let store = state.blobs();
    let key = file.reference.clone();
    let data = tokio::task::spawn_blocking(move || store.fetch(&key))
        .await
        .map_err(|e| BlobError::Rejected(format!("download worker failed: {e}")))??;
    Ok(Download { file, data })
}

/// Counts per status, inside the caller's scope.
pub fn record_stats(state: &CoreState, caller: &Caller) -> Result<RecordStats, DomainError> {
    authorize(&caller.principal, Operation::ListRecords, Ownership::Collection)?;
    let conn = state.db()?;
    Ok(repository::count_records_by_status(
        &conn,
        caller.principal.scope(),
    )?)
}

/// Owning patient approves or rejects a PENDING record.
pub fn update_record_status(
    state: &CoreState,
    caller: &Caller,
    id: Uuid,
    change: StatusChange,
) -> Result<Record, DomainError> {
    let mut details = Map::new();
    details.insert("status".into(), Value::String(change.status.as_str().into()));

    let outcome = update_record_status_inner(state, caller, &id, change);
    state.audit().record(
        caller,
        AuditAction::RecordStatusChanged,
        Some((TargetType::Record, id)),
        &outcome,
        details,
    );
    outcome
}

fn update_record_status_inner(
    state: &CoreState,
    caller: &Caller,
    id: &Uuid,
    change: StatusChange,
) -> Result<Record, DomainError> {
    let conn = state.db()?;
    load_authorized(&conn, state.codec(), caller, id, Operation::TransitionRecord)?;

    let reason = match change.status {
        RecordStatus::Pending => {
            return Err(DomainError::validation(
                "status must be APPROVED or REJECTED",
            ))
        }
        RecordStatus::Approved => None,
        RecordStatus::Rejected => {
            let reason = change
                .rejection_reason
                .as_deref()
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .ok_or_else(|| DomainError::validation("rejection_reason is required"))?;
            Some(reason.to_string())
        }
    };

    let applied = repository::transition_record_status(
        &conn,
        id,
        RecordStatus::Pending,
        change.status,
        reason.as_deref(),
        &Utc::now(),
    )?;
    if !applied {
        return Err(DomainError::Conflict("record is no longer pending".into()));
    }

    tracing::info!(record_id = %id, status = %change.status, "Record status changed");
    reload(&conn, state.codec(), id)
}

/// Owning hospital or an admin edits content, in any status.
pub fn update_record(
    state: &CoreState,
    caller: &Caller,
    id: Uuid,
    edit: RecordEdit,
) -> Result<Record, DomainError> {
    let mut details = Map::new();
    details.insert("fields".into(), json!(edit.field_names()));

    let outcome = update_record_inner(state, caller, &id, edit);
    state.audit().record(
        caller,
        AuditAction::RecordUpdated,
        Some((TargetType::Record, id)),
        &outcome,
        details,
    );
    outcome
}

fn update_record_inner(
    state: &CoreState,
    caller: &Caller,
    id: &Uuid,
    edit: RecordEdit,
) -> Result<Record, DomainError> {
    let conn = state.db()?;
    let mut record = load_authorized(&conn, state.codec(), caller, id, Operation::EditRecord)?;

    if edit.is_empty() {
        return Err(DomainError::validation("no fields to update"));
    }
    if let Some(title) = &edit.title {
        validate_title(title)?;
    }
    if let Some(description) = &edit.description {
        validate_description(description)?;
    }

    if let Some(title) = edit.title {
        record.title = title.trim().to_string();
    }
    if let Some(description) = edit.description {
        record.description = description;
    }
    if let Some(record_type) = edit.record_type {
        record.record_type = record_type;
    }
    if let Some(incoming) = edit.metadata {
        merge_metadata(&mut record.metadata, incoming);
    }
    record.updated_at = Utc::now();

    if !repository::update_record_content(&conn, state.codec(), &record)? {
        return Err(DomainError::NotFound);
    }
    tracing::info!(record_id = %id, "Record updated");
    Ok(record)
}

/// Owning hospital or an admin soft-deletes. Irreversible.
pub fn delete_record(state: &CoreState, caller: &Caller, id: Uuid) -> Result<(), DomainError> {
    let outcome = delete_record_inner(state, caller, &id);
    state.audit().record(
        caller,
        AuditAction::RecordDeleted,
        Some((TargetType::Record, id)),
        &outcome,
        Map::new(),
    );
    outcome
}

fn delete_record_inner(state: &CoreState, caller: &Caller, id: &Uuid) -> Result<(), DomainError> {
    let conn = state.db()?;
    load_authorized(&conn, state.codec(), caller, id, Operation::DeleteRecord)?;
    if !repository::soft_delete_record(&conn, id, &Utc::now())? {
        return Err(DomainError::NotFound);
    }
    tracing::info!(record_id = %id, "Record soft-deleted");
    Ok(())
}
