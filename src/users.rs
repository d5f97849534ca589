//! Directory of known accounts. Records reference patients and hospitals
//! by id; the directory lets creation verify them and resolve display
//! names.

use chrono::Utc;
use serde::Deserialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::authorization::{authorize, Caller, Operation, Ownership};
use crate::core_state::CoreState;
use crate::db::{repository, DatabaseError};
use crate::error::DomainError;
use crate::models::enums::{AuditAction, Role, TargetType};
use crate::models::{User, UserFilter};

pub const MAX_NAME_CHARS: usize = 200;

#[derive(Debug, Clone, Deserialize)]
pub struct NewUser {
    pub id: Uuid,
    pub role: Role,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
}

fn validate_new_user(input: &NewUser) -> Result<(), DomainError> {
    let name = input.name.trim();
    if name.is_empty() {
        return Err(DomainError::validation("name is required"));
    }
    if name.chars().count() > MAX_NAME_CHARS {
        return Err(DomainError::validation(format!(
            "name exceeds {MAX_NAME_CHARS} characters"
        )));
    }
    if let Some(email) = &input.email {
        if !email.contains('@') {
            return Err(DomainError::validation("email is malformed"));
        }
    }
    Ok(())
}

pub fn register_user(
    state: &CoreState,
    caller: &Caller,
    input: NewUser,
) -> Result<User, DomainError> {
    let mut details = Map::new();
    details.insert("role".into(), Value::String(input.role.as_str().into()));
    let target = input.id;

    let outcome = register_user_inner(state, caller, input);
    state.audit().record(
        caller,
        AuditAction::UserRegistered,
        Some((TargetType::User, target)),
        &outcome,
        details,
    );
    outcome
}

fn register_user_inner(
    state: &CoreState,
    caller: &Caller,
    input: NewUser,
) -> Result<User, DomainError> {
    authorize(&caller.principal, Operation::RegisterUser, Ownership::Collection)?;
    validate_new_user(&input)?;

    let user = User {
        id: input.id,
        role: input.role,
        name: input.name.trim().to_string(),
        email: input.email.map(|e| e.trim().to_string()).filter(|e| !e.is_empty()),
        created_at: Utc::now(),
    };
    let conn = state.db()?;
    match repository::insert_user(&conn, &user) {
        Ok(()) => {}
        Err(DatabaseError::ConstraintViolation(_)) => {
            return Err(DomainError::Conflict("user already registered".into()));
        }
        Err(e) => return Err(e.into()),
    }
    tracing::info!(user_id = %user.id, role = %user.role, "User registered");
    Ok(user)
}

pub fn get_user(state: &CoreState, caller: &Caller, id: Uuid) -> Result<User, DomainError> {
    let conn = state.db()?;
    let user = repository::get_user(&conn, &id)?;
    let ownership = match &user {
        Some(u) => Ownership::User { id: u.id },
        None => Ownership::Missing,
    };
    authorize(&caller.principal, Operation::ReadUser, ownership)?;
    user.ok_or(DomainError::NotFound)
}

pub fn list_users(
    state: &CoreState,
    caller: &Caller,
    filter: &UserFilter,
) -> Result<Vec<User>, DomainError> {
    authorize(&caller.principal, Operation::ListUsers, Ownership::Collection)?;
    let conn = state.db()?;
    Ok(repository::list_users(&conn, filter)?)
}
