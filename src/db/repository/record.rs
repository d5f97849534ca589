use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection};
use uuid::Uuid;

use crate::crypto::FieldCodec;
use crate::db::sqlite::{format_ts, parse_ts, parse_uuid};
use crate::db::DatabaseError;
use crate::models::enums::*;
use crate::models::*;

const RECORD_COLUMNS: &str = "id, patient_id, hospital_id, hospital_name, type, title, description,
     files, status, rejection_reason, is_deleted, metadata, created_at, updated_at";

/// Raw column values, before decoding and decryption.
struct RecordRow {
    id: String,
    patient_id: String,
    hospital_id: String,
    hospital_name: String,
    record_type: String,
    title: String,
    description: String,
    files: String,
    status: String,
    rejection_reason: Option<String>,
    is_deleted: i32,
    metadata: String,
    created_at: String,
    updated_at: String,
}

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RecordRow> {
    Ok(RecordRow {
        id: row.get(0)?,
        patient_id: row.get(1)?,
        hospital_id: row.get(2)?,
        hospital_name: row.get(3)?,
        record_type: row.get(4)?,
        title: row.get(5)?,
        description: row.get(6)?,
        files: row.get(7)?,
        status: row.get(8)?,
        rejection_reason: row.get(9)?,
        is_deleted: row.get(10)?,
        metadata: row.get(11)?,
        created_at: row.get(12)?,
        updated_at: row.get(13)?,
    })
}

fn record_from_row(row: RecordRow, codec: &FieldCodec) -> Result<Record, DatabaseError> {
    Ok(Record {
        id: parse_uuid("id", &row.id)?,
        patient_id: parse_uuid("patient_id", &row.patient_id)?,
        hospital_id: parse_uuid("hospital_id", &row.hospital_id)?,
        hospital_name: row.hospital_name,
        record_type: RecordType::from_str(&row.record_type)?,
        title: row.title,
        description: codec.decrypt(&row.description),
        files: serde_json::from_str(&row.files)?,
        status: RecordStatus::from_str(&row.status)?,
        rejection_reason: row.rejection_reason,
        is_deleted: row.is_deleted != 0,
        metadata: serde_json::from_str(&row.metadata)?,
        created_at: parse_ts("created_at", &row.created_at)?,
        updated_at: parse_ts("updated_at", &row.updated_at)?,
    })
}

pub fn insert_record(
    conn: &Connection,
    codec: &FieldCodec,
    record: &Record,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO records (id, patient_id, hospital_id, hospital_name, type, title, description,
         files, status, rejection_reason, is_deleted, metadata, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        params![
            record.id.to_string(),
            record.patient_id.to_string(),
            record.hospital_id.to_string(),
            record.hospital_name,
            record.record_type.as_str(),
            record.title,
            codec.encrypt(&record.description)?,
            serde_json::to_string(&record.files)?,
            record.status.as_str(),
            record.rejection_reason,
            record.is_deleted as i32,
            serde_json::to_string(&record.metadata)?,
            format_ts(&record.created_at),
            format_ts(&record.updated_at),
        ],
    )?;
    Ok(())
}

/// Fetch a record by id, soft-deleted or not. Callers decide visibility.
pub fn get_record(
    conn: &Connection,
    codec: &FieldCodec,
    id: &Uuid,
) -> Result<Option<Record>, DatabaseError> {
    let mut stmt = conn.prepare(&format!("SELECT {RECORD_COLUMNS} FROM records WHERE id = ?1"))?;
    let result = stmt.query_row(params![id.to_string()], read_row);

    match result {
        Ok(row) => Ok(Some(record_from_row(row, codec)?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Fetch the record that lists `reference` among its files, soft-deleted
/// or not.
pub fn find_record_by_file(
    conn: &Connection,
    codec: &FieldCodec,
    reference: &str,
) -> Result<Option<Record>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {RECORD_COLUMNS} FROM records
         WHERE EXISTS (SELECT 1 FROM json_each(records.files)
                       WHERE json_extract(value, '$.reference') = ?1)
         LIMIT 1"
    ))?;
    let result = stmt.query_row(params![reference], read_row);

    match result {
        Ok(row) => Ok(Some(record_from_row(row, codec)?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// List live records. The scope clause is always applied before any filter.
pub fn list_records(
    conn: &Connection,
    codec: &FieldCodec,
    scope: Scope,
    filter: &RecordFilter,
) -> Result<Vec<Record>, DatabaseError> {
    let (mut sql, mut values) = scoped_where(scope);

    if let Some(status) = filter.status {
        sql.push_str(" AND status = ?");
        values.push(SqlValue::Text(status.as_str().into()));
    }
    if let Some(record_type) = filter.record_type {
        sql.push_str(" AND type = ?");
        values.push(SqlValue::Text(record_type.as_str().into()));
    }
    if let Some(search) = filter.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        let pattern = like_pattern(search);
        sql.push_str(
            " AND (fold_case(title) LIKE ? ESCAPE '\\' OR fold_case(hospital_name) LIKE ? ESCAPE '\\')",
        );
        values.push(SqlValue::Text(pattern.clone()));
        values.push(SqlValue::Text(pattern));
    }

    let limit = page_size(filter.limit, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE);
    sql.push_str(" ORDER BY created_at DESC, id LIMIT ? OFFSET ?");
    values.push(SqlValue::Integer(limit as i64));
    values.push(SqlValue::Integer(filter.offset.unwrap_or(0) as i64));

    let mut stmt = conn.prepare(&format!("SELECT {RECORD_COLUMNS} FROM records {sql}"))?;
    let rows = stmt
        .query_map(params_from_iter(values.iter()), read_row)?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|row| record_from_row(row, codec))
        .collect()
}

/// Live record counts per status within a scope.
pub fn count_records_by_status(conn: &Connection, scope: Scope) -> Result<RecordStats, DatabaseError> {
    let (sql, values) = scoped_where(scope);
    let mut stmt = conn.prepare(&format!(
        "SELECT status, COUNT(*) FROM records {sql} GROUP BY status"
    ))?;
    let rows = stmt
        .query_map(params_from_iter(values.iter()), |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut stats = RecordStats::default();
    for (status, count) in rows {
        let count = count.max(0) as u64;
        match RecordStatus::from_str(&status)? {
            RecordStatus::Pending => stats.pending = count,
            RecordStatus::Approved => stats.approved = count,
            RecordStatus::Rejected => stats.rejected = count,
        }
        stats.total += count;
    }
    Ok(stats)
}

/// Atomic conditional status change: only applies while the record is
/// still live and in `expected`. Returns `false` when nothing matched.
pub fn transition_record_status(
    conn: &Connection,
    id: &Uuid,
    expected: RecordStatus,
    next: RecordStatus,
    rejection_reason: Option<&str>,
    now: &DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    let rows = conn.execute(
        "UPDATE records SET status = ?3, rejection_reason = ?4, updated_at = ?5
         WHERE id = ?1 AND status = ?2 AND is_deleted = 0",
        params![
            id.to_string(),
            expected.as_str(),
            next.as_str(),
            rejection_reason,
            format_ts(now),
        ],
    )?;
    Ok(rows == 1)
}

/// Rewrite the editable content of a live record. The sensitive field is
/// re-encrypted with a fresh IV.
pub fn update_record_content(
    conn: &Connection,
    codec: &FieldCodec,
    record: &Record,
) -> Result<bool, DatabaseError> {
    let rows = conn.execute(
        "UPDATE records SET type = ?2, title = ?3, description = ?4, metadata = ?5, updated_at = ?6
         WHERE id = ?1 AND is_deleted = 0",
        params![
            record.id.to_string(),
            record.record_type.as_str(),
            record.title,
            codec.encrypt(&record.description)?,
            serde_json::to_string(&record.metadata)?,
            format_ts(&record.updated_at),
        ],
    )?;
    Ok(rows == 1)
}

/// Set the soft-delete flag. There is no way back and no physical delete.
pub fn soft_delete_record(
    conn: &Connection,
    id: &Uuid,
    now: &DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    let rows = conn.execute(
        "UPDATE records SET is_deleted = 1, updated_at = ?2 WHERE id = ?1 AND is_deleted = 0",
        params![id.to_string(), format_ts(now)],
    )?;
    Ok(rows == 1)
}

/// `WHERE` clause for live rows inside a scope, plus its bound values.
pub(super) fn scoped_where(scope: Scope) -> (String, Vec<SqlValue>) {
    let mut sql = String::from("WHERE is_deleted = 0");
    let mut values = Vec::new();
    push_scope(&mut sql, &mut values, scope);
    (sql, values)
}

pub(super) fn push_scope(sql: &mut String, values: &mut Vec<SqlValue>, scope: Scope) {
    match scope {
        Scope::Patient(id) => {
            sql.push_str(" AND patient_id = ?");
            values.push(SqlValue::Text(id.to_string()));
        }
        Scope::Hospital(id) => {
            sql.push_str(" AND hospital_id = ?");
            values.push(SqlValue::Text(id.to_string()));
        }
        Scope::All => {}
    }
}

/// Lower-cased `%needle%` with LIKE wildcards escaped.
fn like_pattern(needle: &str) -> String {
    let mut escaped = String::with_capacity(needle.len() + 2);
    escaped.push('%');
    for ch in needle.to_lowercase().chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped.push('%');
    escaped
}
