use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection};
use uuid::Uuid;

use crate::db::sqlite::{format_ts, parse_ts, parse_uuid};
use crate::db::DatabaseError;
use crate::models::enums::*;
use crate::models::*;

use super::record::push_scope;

const DISPUTE_COLUMNS: &str = "id, record_id, patient_id, hospital_id, reason, description,
     evidence, priority, status, ai_suggestion, created_at, updated_at";

struct DisputeRow {
    id: String,
    record_id: String,
    patient_id: String,
    hospital_id: String,
    reason: String,
    description: String,
    evidence: String,
    priority: String,
    status: String,
    ai_suggestion: Option<String>,
    created_at: String,
    updated_at: String,
}

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DisputeRow> {
    Ok(DisputeRow {
        id: row.get(0)?,
        record_id: row.get(1)?,
        patient_id: row.get(2)?,
        hospital_id: row.get(3)?,
        reason: row.get(4)?,
        description: row.get(5)?,
        evidence: row.get(6)?,
        priority: row.get(7)?,
        status: row.get(8)?,
        ai_suggestion: row.get(9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
    })
}

fn dispute_from_row(conn: &Connection, row: DisputeRow) -> Result<Dispute, DatabaseError> {
    let id = parse_uuid("id", &row.id)?;
    Ok(Dispute {
        id,
        record_id: parse_uuid("record_id", &row.record_id)?,
        patient_id: parse_uuid("patient_id", &row.patient_id)?,
        hospital_id: parse_uuid("hospital_id", &row.hospital_id)?,
        reason: DisputeReason::from_str(&row.reason)?,
        description: row.description,
        evidence: serde_json::from_str(&row.evidence)?,
        priority: DisputePriority::from_str(&row.priority)?,
        status: DisputeStatus::from_str(&row.status)?,
        ai_suggestion: row.ai_suggestion,
        timeline: get_timeline(conn, &id)?,
        created_at: parse_ts("created_at", &row.created_at)?,
        updated_at: parse_ts("updated_at", &row.updated_at)?,
    })
}

/// Insert a dispute together with its initial timeline entries.
pub fn insert_dispute(conn: &Connection, dispute: &Dispute) -> Result<(), DatabaseError> {
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO disputes (id, record_id, patient_id, hospital_id, reason, description,
         evidence, priority, status, ai_suggestion, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            dispute.id.to_string(),
            dispute.record_id.to_string(),
            dispute.patient_id.to_string(),
            dispute.hospital_id.to_string(),
            dispute.reason.as_str(),
            dispute.description,
            serde_json::to_string(&dispute.evidence)?,
            dispute.priority.as_str(),
            dispute.status.as_str(),
            dispute.ai_suggestion,
            format_ts(&dispute.created_at),
            format_ts(&dispute.updated_at),
        ],
    )?;
    for entry in &dispute.timeline {
        append_timeline_entry(&tx, &dispute.id, entry)?;
    }
    tx.commit()?;
    Ok(())
}

pub fn get_dispute(conn: &Connection, id: &Uuid) -> Result<Option<Dispute>, DatabaseError> {
    let result = conn.query_row(
        &format!("SELECT {DISPUTE_COLUMNS} FROM disputes WHERE id = ?1"),
        params![id.to_string()],
        read_row,
    );
    match result {
        Ok(row) => Ok(Some(dispute_from_row(conn, row)?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// High priority first, then newest first.
pub fn list_disputes(
    conn: &Connection,
    scope: Scope,
    filter: &DisputeFilter,
) -> Result<Vec<Dispute>, DatabaseError> {
    let mut sql = String::from("WHERE 1 = 1");
    let mut values = Vec::new();
    push_scope(&mut sql, &mut values, scope);

    if let Some(status) = filter.status {
        sql.push_str(" AND status = ?");
        values.push(SqlValue::Text(status.as_str().into()));
    }
    if let Some(priority) = filter.priority {
        sql.push_str(" AND priority = ?");
        values.push(SqlValue::Text(priority.as_str().into()));
    }

    let limit = page_size(filter.limit, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE);
    sql.push_str(
        " ORDER BY CASE priority WHEN 'HIGH' THEN 0 ELSE 1 END, created_at DESC, id LIMIT ? OFFSET ?",
    );
    values.push(SqlValue::Integer(limit as i64));
    values.push(SqlValue::Integer(filter.offset.unwrap_or(0) as i64));

    let mut stmt = conn.prepare(&format!("SELECT {DISPUTE_COLUMNS} FROM disputes {sql}"))?;
    let rows = stmt
        .query_map(params_from_iter(values.iter()), read_row)?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|row| dispute_from_row(conn, row))
        .collect()
}

/// Atomic conditional resolution. The status change and its timeline entry
/// commit together, and only if the dispute is still in `expected`.
/// Returns `false` when another writer got there first.
pub fn resolve_dispute(
    conn: &Connection,
    id: &Uuid,
    expected: DisputeStatus,
    next: DisputeStatus,
    entry: &TimelineEntry,
) -> Result<bool, DatabaseError> {
    let tx = conn.unchecked_transaction()?;
    let rows = tx.execute(
        "UPDATE disputes SET status = ?3, updated_at = ?4 WHERE id = ?1 AND status = ?2",
        params![
            id.to_string(),
            expected.as_str(),
            next.as_str(),
            format_ts(&entry.at),
        ],
    )?;
    if rows != 1 {
        return Ok(false);
    }
    append_timeline_entry(&tx, id, entry)?;
    tx.commit()?;
    Ok(true)
}

/// Store the suggestion text once. Later writes do not overwrite it.
pub fn set_dispute_suggestion(
    conn: &Connection,
    id: &Uuid,
    suggestion: &str,
    now: &DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    let rows = conn.execute(
        "UPDATE disputes SET ai_suggestion = ?2, updated_at = ?3
         WHERE id = ?1 AND ai_suggestion IS NULL",
        params![id.to_string(), suggestion, format_ts(now)],
    )?;
    Ok(rows == 1)
}

pub fn append_timeline_entry(
    conn: &Connection,
    dispute_id: &Uuid,
    entry: &TimelineEntry,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO dispute_timeline (dispute_id, action, actor_id, note, at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            dispute_id.to_string(),
            entry.action.as_str(),
            entry.actor_id.to_string(),
            entry.note,
            format_ts(&entry.at),
        ],
    )?;
    Ok(())
}

fn get_timeline(conn: &Connection, dispute_id: &Uuid) -> Result<Vec<TimelineEntry>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT action, actor_id, note, at FROM dispute_timeline
         WHERE dispute_id = ?1 ORDER BY seq",
    )?;
    let rows = stmt
        .query_map(params![dispute_id.to_string()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(action, actor_id, note, at)| {
            Ok(TimelineEntry {
                action: TimelineAction::from_str(&action)?,
                actor_id: parse_uuid("actor_id", &actor_id)?,
                note,
                at: parse_ts("at", &at)?,
            })
        })
        .collect()
}
