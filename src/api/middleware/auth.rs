//! Bearer token authentication middleware.
//!
//! Extracts `Authorization: Bearer <token>`, resolves it through the
//! configured `Authenticator`, and injects the `Caller` into request
//! extensions for downstream handlers.

use axum::http::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::api::error::ApiError;
use crate::api::types::ApiContext;
use crate::audit::RequestMeta;
use crate::authorization::Caller;

/// Require a valid bearer token. Unknown or missing tokens are rejected
/// before any operation runs.
pub async fn require_auth(req: Request<axum::body::Body>, next: Next) -> Response {
    match require_auth_inner(req, next).await {
        Ok(resp) => resp,
        Err(err) => err.into_response(),
    }
}

async fn require_auth_inner(
    mut req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let ctx: ApiContext = req
        .extensions()
        .get::<ApiContext>()
        .cloned()
        .ok_or(ApiError::Internal("missing API context".into()))?;

    let token = req
        .headers()
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(ApiError::Unauthorized)?;

    let principal = match ctx.authenticator.authenticate(token) {
        Some(principal) => principal,
        None => {
            tracing::warn!(path = %req.uri().path(), "Rejected unknown bearer token");
            return Err(ApiError::Unauthorized);
        }
    };

    let meta = req.extensions().get::<RequestMeta>().cloned().unwrap_or_default();
    req.extensions_mut().insert(Caller::new(principal, meta));

    Ok(next.run(req).await)
}
