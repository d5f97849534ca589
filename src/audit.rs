//! Append-only audit trail.
//!
//! Producers enqueue onto an unbounded channel and return immediately.
//! A single detached writer task drains the channel into `audit_log`.
//! Write failures are logged and counted, never returned to a producer.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use rusqlite::Connection;
use serde_json::{Map, Value};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::authorization::{authorize, Caller, Operation, Ownership};
use crate::core_state::CoreState;
use crate::db::repository;
use crate::error::DomainError;
use crate::models::enums::{AuditAction, AuditResult, TargetType};
use crate::models::{AuditEntry, AuditFilter};

/// Requester metadata captured at the HTTP boundary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestMeta {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

enum AuditMessage {
    Append(Box<AuditEntry>),
    Flush(oneshot::Sender<()>),
}

/// Handle to the audit writer. Cheap to clone.
#[derive(Clone)]
pub struct AuditTrail {
    tx: mpsc::UnboundedSender<AuditMessage>,
    failures: Arc<AtomicU64>,
}

impl AuditTrail {
    /// Start the writer task on the current tokio runtime.
    pub fn spawn(db: Arc<Mutex<Connection>>) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let failures = Arc::new(AtomicU64::new(0));
        let handle = tokio::spawn(run_writer(db, rx, failures.clone()));
        (Self { tx, failures }, handle)
    }

    /// Enqueue one entry. Never blocks, never fails.
    pub fn append(&self, entry: AuditEntry) {
        if self.tx.send(AuditMessage::Append(Box::new(entry))).is_err() {
            self.failures.fetch_add(1, Ordering::Relaxed);
            tracing::error!("Audit writer has stopped, entry dropped");
        }
    }

    /// Record the outcome of one mutating attempt.
    pub fn record<T>(
        &self,
        caller: &Caller,
        action: AuditAction,
        target: Option<(TargetType, Uuid)>,
        outcome: &Result<T, DomainError>,
        details: Map<String, Value>,
    ) {
        self.append_outcome(caller, action, target, outcome.as_ref().err(), details);
    }

    /// Record an attempt that was turned away before its operation ran,
    /// e.g. an undecodable request body.
    pub fn record_failure(
        &self,
        caller: &Caller,
        action: AuditAction,
        target: Option<(TargetType, Uuid)>,
        err: &DomainError,
        details: Map<String, Value>,
    ) {
        self.append_outcome(caller, action, target, Some(err), details);
    }

    fn append_outcome(
        &self,
        caller: &Caller,
        action: AuditAction,
        target: Option<(TargetType, Uuid)>,
        failure: Option<&DomainError>,
        mut details: Map<String, Value>,
    ) {
        let result = match failure {
            None => AuditResult::Success,
            Some(err) => {
                details.insert("error".into(), Value::String(err.kind().into()));
                err.audit_result()
            }
        };
        self.append(AuditEntry {
            id: Uuid::new_v4(),
            actor_id: Some(caller.id()),
            actor_role: Some(caller.role()),
            action,
            target_type: target.map(|(t, _)| t),
            target_id: target.map(|(_, id)| id),
            result,
            details,
            ip: caller.meta.ip.clone(),
            user_agent: caller.meta.user_agent.clone(),
            at: Utc::now(),
        });
    }

    /// Resolve once everything enqueued before this call has been written.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(AuditMessage::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }

    /// Entries that could not be written since startup.
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

async fn run_writer(
    db: Arc<Mutex<Connection>>,
    mut rx: mpsc::UnboundedReceiver<AuditMessage>,
    failures: Arc<AtomicU64>,
) {
    while let Some(message) = rx.recv().await {
        match message {
            AuditMessage::Append(entry) => {
                if let Err(reason) = write_entry(&db, &entry) {
                    failures.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(
                        audit_id = %entry.id,
                        action = %entry.action,
                        error = %reason,
                        "Audit append failed"
                    );
                }
            }
            AuditMessage::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    tracing::debug!("Audit writer stopped");
}

fn write_entry(db: &Mutex<Connection>, entry: &AuditEntry) -> Result<(), String> {
    let conn = db.lock().map_err(|_| "database lock poisoned".to_string())?;
    repository::insert_audit_entry(&conn, entry).map_err(|e| e.to_string())
}

/// Admin read over the trail: most recent first, bounded.
pub fn list_audit(
    state: &CoreState,
    caller: &Caller,
    filter: &AuditFilter,
) -> Result<Vec<AuditEntry>, DomainError> {
    authorize(&caller.principal, Operation::ReadAudit, Ownership::Collection)?;
    let conn = state.db()?;
    Ok(repository::list_audit_entries(&conn, filter)?)
}
