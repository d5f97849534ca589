use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::enums::{AuditAction, AuditResult, Role, TargetType};

/// One immutable entry of the audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    /// `None` for system-originated entries.
    pub actor_id: Option<Uuid>,
    pub actor_role: Option<Role>,
    pub action: AuditAction,
    pub target_type: Option<TargetType>,
    pub target_id: Option<Uuid>,
    pub result: AuditResult,
    pub details: Map<String, Value>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub at: DateTime<Utc>,
}
