use std::str::FromStr;

use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection};

use crate::db::sqlite::{format_ts, parse_ts, parse_uuid};
use crate::db::DatabaseError;
use crate::models::enums::{AuditAction, AuditResult, Role, TargetType};
use crate::models::{page_size, AuditEntry, AuditFilter};

/// Default and maximum page size for audit queries.
pub const DEFAULT_AUDIT_PAGE: u32 = 50;
pub const MAX_AUDIT_PAGE: u32 = 100;

struct AuditRow {
    id: String,
    actor_id: Option<String>,
    actor_role: Option<String>,
    action: String,
    target_type: Option<String>,
    target_id: Option<String>,
    result: String,
    details: String,
    ip: Option<String>,
    user_agent: Option<String>,
    at: String,
}

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<AuditRow> {
    Ok(AuditRow {
        id: row.get(0)?,
        actor_id: row.get(1)?,
        actor_role: row.get(2)?,
        action: row.get(3)?,
        target_type: row.get(4)?,
        target_id: row.get(5)?,
        result: row.get(6)?,
        details: row.get(7)?,
        ip: row.get(8)?,
        user_agent: row.get(9)?,
        at: row.get(10)?,
    })
}

fn entry_from_row(row: AuditRow) -> Result<AuditEntry, DatabaseError> {
    Ok(AuditEntry {
        id: parse_uuid("id", &row.id)?,
        actor_id: row.actor_id.as_deref().map(|v| parse_uuid("actor_id", v)).transpose()?,
        actor_role: row.actor_role.as_deref().map(Role::from_str).transpose()?,
        action: AuditAction::from_str(&row.action)?,
        target_type: row.target_type.as_deref().map(TargetType::from_str).transpose()?,
        target_id: row.target_id.as_deref().map(|v| parse_uuid("target_id", v)).transpose()?,
        result: AuditResult::from_str(&row.result)?,
        details: serde_json::from_str(&row.details)?,
        ip: row.ip,
        user_agent: row.user_agent,
        at: parse_ts("at", &row.at)?,
    })
}

/// Append one entry. The table rejects updates and deletes.
pub fn insert_audit_entry(conn: &Connection, entry: &AuditEntry) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO audit_log (id, actor_id, actor_role, action, target_type, target_id,
         result, details, ip, user_agent, at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            entry.id.to_string(),
            entry.actor_id.map(|id| id.to_string()),
            entry.actor_role.map(|r| r.as_str()),
            entry.action.as_str(),
            entry.target_type.map(|t| t.as_str()),
            entry.target_id.map(|id| id.to_string()),
            entry.result.as_str(),
            serde_json::to_string(&entry.details)?,
            entry.ip,
            entry.user_agent,
            format_ts(&entry.at),
        ],
    )?;
    Ok(())
}

/// Most recent entries first, in insertion order.
pub fn list_audit_entries(
    conn: &Connection,
    filter: &AuditFilter,
) -> Result<Vec<AuditEntry>, DatabaseError> {
    let mut sql = String::from(
        "SELECT id, actor_id, actor_role, action, target_type, target_id, result, details,
         ip, user_agent, at FROM audit_log",
    );
    let mut values = Vec::new();
    if let Some(actor_id) = filter.actor_id {
        sql.push_str(" WHERE actor_id = ?");
        values.push(SqlValue::Text(actor_id.to_string()));
    }
    sql.push_str(" ORDER BY seq DESC LIMIT ?");
    values.push(SqlValue::Integer(
        page_size(filter.limit, DEFAULT_AUDIT_PAGE, MAX_AUDIT_PAGE) as i64,
    ));

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(values.iter()), read_row)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(entry_from_row).collect()
}

pub fn count_audit_entries(conn: &Connection) -> Result<u64, DatabaseError> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM audit_log", [], |row| row.get(0))?;
    Ok(count.max(0) as u64)
}
