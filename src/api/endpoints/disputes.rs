//! Dispute endpoints.

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde::Deserialize;
use uuid::Uuid;

use crate::api::endpoints::{invalid_body, reject_mutation};
use crate::api::error::ApiError;
use crate::api::types::ApiContext;
use crate::authorization::Caller;
use crate::disputes::{self, NewDispute, Resolution};
use crate::error::DomainError;
use crate::models::enums::{AuditAction, DisputePriority, DisputeStatus, TargetType};
use crate::models::{Dispute, DisputeFilter};

#[derive(Debug, Default, Deserialize)]
pub struct DisputeQuery {
    pub status: Option<DisputeStatus>,
    pub priority: Option<DisputePriority>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

/// `POST /api/disputes`: waits for the reviewer suggestion before replying.
pub async fn create(
    State(ctx): State<ApiContext>,
    Extension(caller): Extension<Caller>,
    payload: Result<Json<NewDispute>, JsonRejection>,
) -> Result<(StatusCode, Json<Dispute>), ApiError> {
    let input = match payload {
        Ok(Json(input)) => input,
        Err(rejection) => {
            return Err(reject_mutation(
                &ctx,
                &caller,
                AuditAction::DisputeCreated,
                None,
                invalid_body(rejection),
            ))
        }
    };
    let dispute = disputes::create_dispute(&ctx.core, &caller, input).await?;
    Ok((StatusCode::CREATED, Json(dispute)))
}

/// `GET /api/disputes`
pub async fn list(
    State(ctx): State<ApiContext>,
    Extension(caller): Extension<Caller>,
    query: Result<Query<DisputeQuery>, QueryRejection>,
) -> Result<Json<Vec<Dispute>>, ApiError> {
    let Query(query) = query?;
    let filter = DisputeFilter {
        status: query.status,
        priority: query.priority,
        limit: query.limit,
        offset: query.offset,
    };
    Ok(Json(disputes::list_disputes(&ctx.core, &caller, &filter)?))
}

/// `GET /api/disputes/:id`: includes the full timeline.
pub async fn detail(
    State(ctx): State<ApiContext>,
    Extension(caller): Extension<Caller>,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<Dispute>, ApiError> {
    let Path(id) = id?;
    Ok(Json(disputes::get_dispute(&ctx.core, &caller, id)?))
}

/// `POST /api/disputes/:id/resolve`
pub async fn resolve(
    State(ctx): State<ApiContext>,
    Extension(caller): Extension<Caller>,
    id: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<Resolution>, JsonRejection>,
) -> Result<Json<Dispute>, ApiError> {
    let action = AuditAction::DisputeResolved;
    let Ok(Path(id)) = id else {
        return Err(reject_mutation(&ctx, &caller, action, None, DomainError::NotFound));
    };
    let resolution = match payload {
        Ok(Json(resolution)) => resolution,
        Err(rejection) => {
            let target = Some((TargetType::Dispute, id));
            return Err(reject_mutation(&ctx, &caller, action, target, invalid_body(rejection)));
        }
    };
    Ok(Json(disputes::resolve_dispute(&ctx.core, &caller, id, resolution)?))
}
