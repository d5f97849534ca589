//! Dispute workflow: a patient contests a record they can read, an admin
//! resolves it. Priority is derived from the reason. A reviewer suggestion
//! is fetched from the Insight Service after the dispute is stored.

use chrono::Utc;
use rusqlite::Connection;
use serde::Deserialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::authorization::{authorize, Caller, Operation, Ownership};
use crate::core_state::CoreState;
use crate::db::repository;
use crate::error::DomainError;
use crate::insight::FALLBACK_SUGGESTION;
use crate::models::enums::{
    AuditAction, DisputeReason, DisputeStatus, RecordType, Role, TargetType, TimelineAction,
};
use crate::models::*;

pub const MAX_DESCRIPTION_CHARS: usize = 2000;
pub const MAX_EVIDENCE_ITEMS: usize = 10;
pub const MAX_NOTE_CHARS: usize = 2000;

#[derive(Debug, Clone, Deserialize)]
pub struct NewDispute {
    pub record_id: Uuid,
    pub reason: DisputeReason,
    pub description: String,
    #[serde(default)]
    pub evidence: Vec<String>,
    #[serde(default)]
    pub hospital_id: Option<Uuid>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Resolution {
    pub status: DisputeStatus,
    #[serde(default)]
    pub note: Option<String>,
}

fn validate_new_dispute(input: &NewDispute) -> Result<(), DomainError> {
    if input.description.trim().is_empty() {
        return Err(DomainError::validation("description is required"));
    }
    if input.description.chars().count() > MAX_DESCRIPTION_CHARS {
        return Err(DomainError::validation(format!(
            "description exceeds {MAX_DESCRIPTION_CHARS} characters"
        )));
    }
    if input.evidence.len() > MAX_EVIDENCE_ITEMS {
        return Err(DomainError::validation(format!(
            "at most {MAX_EVIDENCE_ITEMS} evidence items"
        )));
    }
    if input.evidence.iter().any(|e| e.trim().is_empty()) {
        return Err(DomainError::validation("evidence items must not be empty"));
    }
    Ok(())
}

fn dispute_ownership(dispute: Option<&Dispute>) -> Ownership {
    match dispute {
        Some(d) => Ownership::Dispute {
            patient_id: d.patient_id,
            hospital_id: d.hospital_id,
        },
        None => Ownership::Missing,
    }
}

fn load_authorized(
    conn: &Connection,
    caller: &Caller,
    id: &Uuid,
    op: Operation,
) -> Result<Dispute, DomainError> {
    let dispute = repository::get_dispute(conn, id)?;
    authorize(&caller.principal, op, dispute_ownership(dispute.as_ref()))?;
    dispute.ok_or(DomainError::NotFound)
}

/// Prompt for the reviewer suggestion. Built only from the dispute and the
/// disputed record's category and title.
pub fn suggestion_prompt(
    reason: DisputeReason,
    description: &str,
    record_type: RecordType,
    record_title: &str,
) -> String {
    format!(
        "A patient disputes a clinical record.\n\
         Dispute reason: {reason}\n\
         Patient statement: {description}\n\
         Record type: {record_type}\n\
         Record title: {record_title}\n\n\
         Suggest how an administrator should review and resolve this dispute."
    )
}

// ═══════════════════════════════════════════
// Operations
// ═══════════════════════════════════════════

pub async fn create_dispute(
    state: &CoreState,
    caller: &Caller,
    input: NewDispute,
) -> Result<Dispute, DomainError> {
    let mut details = Map::new();
    details.insert("record_id".into(), Value::String(input.record_id.to_string()));
    details.insert("reason".into(), Value::String(input.reason.as_str().into()));

    let outcome = create_dispute_inner(state, caller, input).await;
    if let Ok(dispute) = &outcome {
        details.insert("priority".into(), Value::String(dispute.priority.as_str().into()));
    }
    state.audit().record(
        caller,
        AuditAction::DisputeCreated,
        outcome.as_ref().ok().map(|d| (TargetType::Dispute, d.id)),
        &outcome,
        details,
    );
    outcome
}

async fn create_dispute_inner(
    state: &CoreState,
    caller: &Caller,
    input: NewDispute,
) -> Result<Dispute, DomainError> {
    let (mut dispute, prompt) = insert_new_dispute(state, caller, input)?;
    tracing::info!(
        dispute_id = %dispute.id,
        record_id = %dispute.record_id,
        priority = %dispute.priority,
        "Dispute created"
    );

    if let Some(suggestion) = fetch_suggestion(state, prompt).await {
        match store_suggestion(state, &dispute.id, &suggestion) {
            Ok(true) => dispute.ai_suggestion = Some(suggestion),
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(dispute_id = %dispute.id, error = %e, "Could not store suggestion");
            }
        }
    }
    Ok(dispute)
}

fn insert_new_dispute(
    state: &CoreState,
    caller: &Caller,
    input: NewDispute,
) -> Result<(Dispute, String), DomainError> {
    let conn = state.db()?;

    let record = repository::get_record(&conn, state.codec(), &input.record_id)?;
    let ownership = match &record {
        Some(r) if !r.is_deleted => Ownership::Record {
            patient_id: r.patient_id,
            hospital_id: r.hospital_id,
        },
        _ => Ownership::Missing,
    };
    authorize(&caller.principal, Operation::CreateDispute, ownership)?;
    let record = record.ok_or(DomainError::NotFound)?;

    validate_new_dispute(&input)?;

    let hospital_id = match input.hospital_id {
        Some(id) => match repository::get_user(&conn, &id)? {
            Some(user) if user.role == Role::Hospital => id,
            _ => {
                return Err(DomainError::validation(
                    "hospital_id does not name a registered hospital",
                ))
            }
        },
        None => record.hospital_id,
    };

    let now = Utc::now();
    let dispute = Dispute {
        id: Uuid::new_v4(),
        record_id: record.id,
        patient_id: caller.id(),
        hospital_id,
        reason: input.reason,
        description: input.description,
        evidence: input.evidence.into_iter().map(|e| e.trim().to_string()).collect(),
        priority: input.reason.priority(),
        status: DisputeStatus::PendingReview,
        ai_suggestion: None,
        timeline: vec![TimelineEntry {
            action: TimelineAction::Created,
            actor_id: caller.id(),
            note: None,
            at: now,
        }],
        created_at: now,
        updated_at: now,
    };
    repository::insert_dispute(&conn, &dispute)?;

    let prompt = suggestion_prompt(
        dispute.reason,
        &dispute.description,
        record.record_type,
        &record.title,
    );
    Ok((dispute, prompt))
}

/// Best effort. Unavailable service → fallback text; any other failure →
/// no suggestion. Never fails the caller.
async fn fetch_suggestion(state: &CoreState, prompt: String) -> Option<String> {
    let insight = state.insight();
    let result = tokio::task::spawn_blocking(move || insight.generate(&prompt)).await;

    match result {
        Ok(Ok(text)) => Some(text),
        Ok(Err(e)) if e.is_unavailable() => {
            tracing::info!(error = %e, "Insight Service unavailable, storing fallback suggestion");
            Some(FALLBACK_SUGGESTION.to_string())
        }
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "Insight Service failed, leaving suggestion empty");
            None
        }
        Err(e) => {
            tracing::warn!(error = %e, "Insight worker failed, leaving suggestion empty");
            None
        }
    }
}

fn store_suggestion(state: &CoreState, id: &Uuid, text: &str) -> Result<bool, DomainError> {
    let conn = state.db()?;
    Ok(repository::set_dispute_suggestion(&conn, id, text, &Utc::now())?)
}

pub fn list_disputes(
    state: &CoreState,
    caller: &Caller,
    filter: &DisputeFilter,
) -> Result<Vec<Dispute>, DomainError> {
    authorize(&caller.principal, Operation::ListDisputes, Ownership::Collection)?;
    let conn = state.db()?;
    Ok(repository::list_disputes(
        &conn,
        caller.principal.scope(),
        filter,
    )?)
}

pub fn get_dispute(state: &CoreState, caller: &Caller, id: Uuid) -> Result<Dispute, DomainError> {
    let conn = state.db()?;
    load_authorized(&conn, caller, &id, Operation::ReadDispute)
}

/// Admin moves a dispute out of PENDING_REVIEW. Of two racing resolvers
/// exactly one succeeds; the other gets `Conflict`.
pub fn resolve_dispute(
    state: &CoreState,
    caller: &Caller,
    id: Uuid,
    resolution: Resolution,
) -> Result<Dispute, DomainError> {
    let mut details = Map::new();
    details.insert("status".into(), Value::String(resolution.status.as_str().into()));

    let outcome = resolve_dispute_inner(state, caller, &id, resolution);
    state.audit().record(
        caller,
        AuditAction::DisputeResolved,
        Some((TargetType::Dispute, id)),
        &outcome,
        details,
    );
    outcome
}

fn resolve_dispute_inner(
    state: &CoreState,
    caller: &Caller,
    id: &Uuid,
    resolution: Resolution,
) -> Result<Dispute, DomainError> {
    let conn = state.db()?;
    load_authorized(&conn, caller, id, Operation::ResolveDispute)?;

    if !resolution.status.is_terminal() {
        return Err(DomainError::validation("status must be RESOLVED or DISMISSED"));
    }
    let note = resolution
        .note
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string);
    if note.as_ref().is_some_and(|n| n.chars().count() > MAX_NOTE_CHARS) {
        return Err(DomainError::validation(format!(
            "note exceeds {MAX_NOTE_CHARS} characters"
        )));
    }

    let entry = TimelineEntry {
        action: resolution.status.timeline_action(),
        actor_id: caller.id(),
        note,
        at: Utc::now(),
    };
    let applied = repository::resolve_dispute(
        &conn,
        id,
        DisputeStatus::PendingReview,
        resolution.status,
        &entry,
    )?;
    if !applied {
        return Err(DomainError::Conflict("dispute is no longer pending review".into()));
    }

    tracing::info!(dispute_id = %id, status = %resolution.status, "Dispute resolved");
    repository::get_dispute(&conn, id)?.ok_or(DomainError::NotFound)
}
