//! Audit trail read endpoint.

use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::{Extension, Json};
use serde::Deserialize;
use uuid::Uuid;

use crate::api::error::ApiError;
use crate::api::types::ApiContext;
use crate::authorization::Caller;
use crate::models::{AuditEntry, AuditFilter};

#[derive(Debug, Default, Deserialize)]
pub struct AuditQuery {
    pub actor: Option<Uuid>,
    pub limit: Option<u32>,
}

/// `GET /api/audit`: admin only, most recent first.
pub async fn list(
    State(ctx): State<ApiContext>,
    Extension(caller): Extension<Caller>,
    query: Result<Query<AuditQuery>, QueryRejection>,
) -> Result<Json<Vec<AuditEntry>>, ApiError> {
    let Query(query) = query?;
    let filter = AuditFilter {
        actor_id: query.actor,
        limit: query.limit,
    };
    let entries = crate::audit::list_audit(&ctx.core, &caller, &filter)?;
    Ok(Json(entries))
}
