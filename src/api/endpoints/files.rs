//! Attachment download.

use axum::body::Body;
use axum::extract::rejection::PathRejection;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Extension;

use crate::api::error::ApiError;
use crate::api::types::ApiContext;
use crate::authorization::Caller;
use crate::records;

/// `GET /files/:reference`
pub async fn download(
    State(ctx): State<ApiContext>,
    Extension(caller): Extension<Caller>,
    reference: Result<Path<String>, PathRejection>,
) -> Result<Response, ApiError> {
    let Path(reference) = reference?;
    let download = records::download_file(&ctx.core, &caller, &reference).await?;
    let filename = download.file.name.replace(['"', '\\', '\r', '\n'], "_");

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, download.file.mime_type.as_str())
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{filename}\""),
        )
        .header(header::CONTENT_LENGTH, download.data.len().to_string())
        .body(Body::from(download.data))
        .unwrap_or_else(|_| {
            (StatusCode::INTERNAL_SERVER_ERROR, "Response build failed").into_response()
        }))
}
