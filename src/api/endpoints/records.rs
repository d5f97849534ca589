//! Record endpoints.
//!
//! `POST /api/records` takes multipart form data: text fields
//! `patient_id`, `type`, `title`, `description`, an optional JSON object
//! `metadata`, and any number of `file` parts.

use std::str::FromStr;

use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde::Deserialize;
use uuid::Uuid;

use crate::api::endpoints::{invalid_body, reject_mutation};
use crate::api::error::ApiError;
use crate::api::types::ApiContext;
use crate::authorization::Caller;
use crate::blob_store::Upload;
use crate::error::DomainError;
use crate::models::enums::{AuditAction, RecordStatus, RecordType, TargetType};
use crate::models::{Metadata, Record, RecordFilter, RecordStats};
use crate::records::{self, NewRecord, RecordEdit, StatusChange};

#[derive(Debug, Default, Deserialize)]
pub struct RecordQuery {
    pub status: Option<RecordStatus>,
    #[serde(rename = "type")]
    pub record_type: Option<RecordType>,
    pub search: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

/// `POST /api/records`
pub async fn create(
    State(ctx): State<ApiContext>,
    Extension(caller): Extension<Caller>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<(StatusCode, Json<Record>), ApiError> {
    let input = match multipart {
        Ok(multipart) => read_new_record(multipart).await,
        Err(rejection) => Err(DomainError::Validation(rejection.body_text())),
    };
    let input = match input {
        Ok(input) => input,
        Err(err) => return Err(reject_mutation(&ctx, &caller, AuditAction::RecordCreated, None, err)),
    };
    let record = records::create_record(&ctx.core, &caller, input).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

fn malformed_form(err: MultipartError) -> DomainError {
    DomainError::Validation(err.body_text())
}

async fn read_new_record(mut multipart: Multipart) -> Result<NewRecord, DomainError> {
    let mut input = NewRecord::default();

    while let Some(field) = multipart.next_field().await.map_err(malformed_form)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" | "files" => {
                let file_name = field.file_name().unwrap_or("upload").to_string();
                let content_type = field.content_type().map(str::to_string);
                let data = field.bytes().await.map_err(malformed_form)?;
                input.uploads.push(Upload {
                    file_name,
                    content_type,
                    data: data.to_vec(),
                });
            }
            "patient_id" => {
                let raw = field.text().await.map_err(malformed_form)?;
                let raw = raw.trim();
                if !raw.is_empty() {
                    let id = Uuid::parse_str(raw)
                        .map_err(|_| DomainError::validation("patient_id is not a valid id"))?;
                    input.patient_id = Some(id);
                }
            }
            "type" => {
                let raw = field.text().await.map_err(malformed_form)?;
                let record_type = RecordType::from_str(raw.trim())
                    .map_err(|_| DomainError::validation("unknown record type"))?;
                input.record_type = Some(record_type);
            }
            "title" => input.title = field.text().await.map_err(malformed_form)?,
            "description" => input.description = field.text().await.map_err(malformed_form)?,
            "metadata" => {
                let raw = field.text().await.map_err(malformed_form)?;
                if !raw.trim().is_empty() {
                    input.metadata = serde_json::from_str::<Metadata>(&raw)
                        .map_err(|_| DomainError::validation("metadata must be a JSON object"))?;
                }
            }
            _ => {}
        }
    }
    Ok(input)
}

/// `GET /api/records`
pub async fn list(
    State(ctx): State<ApiContext>,
    Extension(caller): Extension<Caller>,
    query: Result<Query<RecordQuery>, QueryRejection>,
) -> Result<Json<Vec<Record>>, ApiError> {
    let Query(query) = query?;
    let filter = RecordFilter {
        status: query.status,
        record_type: query.record_type,
        search: query.search,
        limit: query.limit,
        offset: query.offset,
    };
    Ok(Json(records::list_records(&ctx.core, &caller, &filter)?))
}

/// `GET /api/records/stats`
pub async fn stats(
    State(ctx): State<ApiContext>,
    Extension(caller): Extension<Caller>,
) -> Result<Json<RecordStats>, ApiError> {
    Ok(Json(records::record_stats(&ctx.core, &caller)?))
}

/// `GET /api/records/:id`
pub async fn detail(
    State(ctx): State<ApiContext>,
    Extension(caller): Extension<Caller>,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<Record>, ApiError> {
    let Path(id) = id?;
    Ok(Json(records::get_record(&ctx.core, &caller, id)?))
}

/// `PATCH /api/records/:id`
pub async fn edit(
    State(ctx): State<ApiContext>,
    Extension(caller): Extension<Caller>,
    id: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<RecordEdit>, JsonRejection>,
) -> Result<Json<Record>, ApiError> {
    let action = AuditAction::RecordUpdated;
    let Ok(Path(id)) = id else {
        return Err(reject_mutation(&ctx, &caller, action, None, DomainError::NotFound));
    };
    let edit = match payload {
        Ok(Json(edit)) => edit,
        Err(rejection) => {
            let target = Some((TargetType::Record, id));
            return Err(reject_mutation(&ctx, &caller, action, target, invalid_body(rejection)));
        }
    };
    Ok(Json(records::update_record(&ctx.core, &caller, id, edit)?))
}

/// `POST /api/records/:id/status`
pub async fn set_status(
    State(ctx): State<ApiContext>,
    Extension(caller): Extension<Caller>,
    id: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<StatusChange>, JsonRejection>,
) -> Result<Json<Record>, ApiError> {
    let action = AuditAction::RecordStatusChanged;
    let Ok(Path(id)) = id else {
        return Err(reject_mutation(&ctx, &caller, action, None, DomainError::NotFound));
    };
    let change = match payload {
        Ok(Json(change)) => change,
        Err(rejection) => {
            let target = Some((TargetType::Record, id));
            return Err(reject_mutation(&ctx, &caller, action, target, invalid_body(rejection)));
        }
    };
    Ok(Json(records::update_record_status(&ctx.core, &caller, id, change)?))
}

/// `DELETE /api/records/:id`
pub async fn delete(
    State(ctx): State<ApiContext>,
    Extension(caller): Extension<Caller>,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<StatusCode, ApiError> {
    let Ok(Path(id)) = id else {
        return Err(reject_mutation(
            &ctx,
            &caller,
            AuditAction::RecordDeleted,
            None,
            DomainError::NotFound,
        ));
    };
    records::delete_record(&ctx.core, &caller, id)?;
    Ok(StatusCode::NO_CONTENT)
}
