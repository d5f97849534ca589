//! API endpoint handlers.
//!
//! Handlers translate HTTP into calls on the business modules and map
//! `DomainError` onto `ApiError`. No authorization decision is made here.

pub mod audit;
pub mod disputes;
pub mod files;
pub mod health;
pub mod records;
pub mod users;

use axum::extract::rejection::JsonRejection;
use serde_json::Map;
use uuid::Uuid;

use crate::api::error::ApiError;
use crate::api::types::ApiContext;
use crate::authorization::Caller;
use crate::error::DomainError;
use crate::models::enums::{AuditAction, TargetType};

/// Turn away a mutating request whose input could not be decoded. The
/// attempt still leaves its one audit entry.
pub(crate) fn reject_mutation(
    ctx: &ApiContext,
    caller: &Caller,
    action: AuditAction,
    target: Option<(TargetType, Uuid)>,
    err: DomainError,
) -> ApiError {
    ctx.core
        .audit()
        .record_failure(caller, action, target, &err, Map::new());
    err.into()
}

/// An undecodable JSON body is a validation failure of the operation.
pub(crate) fn invalid_body(rejection: JsonRejection) -> DomainError {
    DomainError::Validation(rejection.body_text())
}
