use std::str::FromStr;

use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection};
use uuid::Uuid;

use crate::db::sqlite::{format_ts, parse_ts, parse_uuid};
use crate::db::DatabaseError;
use crate::models::enums::Role;
use crate::models::{User, UserFilter};

fn user_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(String, String, String, Option<String>, String)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn decode_user(raw: (String, String, String, Option<String>, String)) -> Result<User, DatabaseError> {
    let (id, role, name, email, created_at) = raw;
    Ok(User {
        id: parse_uuid("id", &id)?,
        role: Role::from_str(&role)?,
        name,
        email,
        created_at: parse_ts("created_at", &created_at)?,
    })
}

/// Register a directory entry. A duplicate id surfaces as
/// `ConstraintViolation`.
pub fn insert_user(conn: &Connection, user: &User) -> Result<(), DatabaseError> {
    let result = conn.execute(
        "INSERT INTO users (id, role, name, email, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            user.id.to_string(),
            user.role.as_str(),
            user.name,
            user.email,
            format_ts(&user.created_at),
        ],
    );
    match result {
        Ok(_) => Ok(()),
        Err(rusqlite::Error::SqliteFailure(err, _))
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            Err(DatabaseError::ConstraintViolation(format!(
                "user {} already registered",
                user.id
            )))
        }
        Err(e) => Err(e.into()),
    }
}

pub fn get_user(conn: &Connection, id: &Uuid) -> Result<Option<User>, DatabaseError> {
    let result = conn.query_row(
        "SELECT id, role, name, email, created_at FROM users WHERE id = ?1",
        params![id.to_string()],
        user_from_row,
    );
    match result {
        Ok(raw) => Ok(Some(decode_user(raw)?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn list_users(conn: &Connection, filter: &UserFilter) -> Result<Vec<User>, DatabaseError> {
    let mut sql = String::from("SELECT id, role, name, email, created_at FROM users");
    let mut values = Vec::new();
    if let Some(role) = filter.role {
        sql.push_str(" WHERE role = ?");
        values.push(SqlValue::Text(role.as_str().into()));
    }
    sql.push_str(" ORDER BY created_at, id");

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(values.iter()), user_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(decode_user).collect()
}
