//! Account directory endpoints.

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
use crate::models::enums::{AuditAction, Role};
use crate::models::{User, UserFilter};
use crate::users::{self, NewUser};

#[derive(Debug, Default, Deserialize)]
pub struct UserQuery {
    pub role: Option<Role>,
}

/// `POST /api/users`
pub async fn register(
    State(ctx): State<ApiContext>,
    Extension(caller): Extension<Caller>,
    payload: Result<Json<NewUser>, JsonRejection>,
) -> Result<(StatusCode, Json<User>), ApiError> {
    let input = match payload {
        Ok(Json(input)) => input,
        Err(rejection) => {
            return Err(reject_mutation(
                &ctx,
                &caller,
                AuditAction::UserRegistered,
                None,
                invalid_body(rejection),
            ))
        }
    };
    let user = users::register_user(&ctx.core, &caller, input)?;
    Ok((StatusCode::CREATED, Json(user)))
}

/// `GET /api/users`
pub async fn list(
    State(ctx): State<ApiContext>,
    Extension(caller): Extension<Caller>,
    query: Result<Query<UserQuery>, QueryRejection>,
) -> Result<Json<Vec<User>>, ApiError> {
    let Query(query) = query?;
    let filter = UserFilter { role: query.role };
    Ok(Json(users::list_users(&ctx.core, &caller, &filter)?))
}

/// `GET /api/users/:id`
pub async fn detail(
    State(ctx): State<ApiContext>,
    Extension(caller): Extension<Caller>,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<User>, ApiError> {
    let Path(id) = id?;
    Ok(Json(users::get_user(&ctx.core, &caller, id)?))
}
