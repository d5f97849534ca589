use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{DisputePriority, DisputeReason, DisputeStatus, TimelineAction};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dispute {
    pub id: Uuid,
    pub record_id: Uuid,
    pub patient_id: Uuid,
    pub hospital_id: Uuid,
    pub reason: DisputeReason,
    pub description: String,
    pub evidence: Vec<String>,
    pub priority: DisputePriority,
    pub status: DisputeStatus,
    pub ai_suggestion: Option<String>,
    /// Ordered oldest first. Only ever extended.
    pub timeline: Vec<TimelineEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub action: TimelineAction,
    pub actor_id: Uuid,
    pub note: Option<String>,
    pub at: DateTime<Utc>,
}
