//! API router.
//!
//! Returns a composable `Router` that can be mounted on any axum server.
//! Routes are nested under `/api/`; attachments are downloaded from
//! `/files/:reference`, gated like the record that lists them.
//!
//! Middleware stack (outermost → innermost):
//! 1. Extension(ApiContext) → 2. Cache-Control → 3. Requester capture
//! 4. Auth validator (protected routes only)

use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderValue};
use axum::routing::{get, post};
use axum::Router;
use tower_http::set_header::SetResponseHeaderLayer;

use crate::api::endpoints;
use crate::api::middleware;
use crate::api::types::ApiContext;
use crate::records::{MAX_UPLOADS, MAX_UPLOAD_BYTES};

/// Room for a full set of attachments plus the text fields.
const MAX_REQUEST_BYTES: usize = MAX_UPLOADS * MAX_UPLOAD_BYTES + 1024 * 1024;

/// Build the API router.
///
/// Middleware uses `Extension<ApiContext>` (injected as the outermost layer).
/// Endpoint handlers use `State<ApiContext>` (provided via `with_state`).
pub fn api_router(ctx: ApiContext) -> Router {
    // NOTE: Path params use `:param` syntax (matchit 0.7 / axum 0.7).
    let protected = Router::new()
        .route(
            "/records",
            post(endpoints::records::create).get(endpoints::records::list),
        )
        .route("/records/stats", get(endpoints::records::stats))
        .route(
            "/records/:id",
            get(endpoints::records::detail)
                .patch(endpoints::records::edit)
                .delete(endpoints::records::delete),
        )
        .route("/records/:id/status", post(endpoints::records::set_status))
        .route(
            "/disputes",
            post(endpoints::disputes::create).get(endpoints::disputes::list),
        )
        .route("/disputes/:id", get(endpoints::disputes::detail))
        .route("/disputes/:id/resolve", post(endpoints::disputes::resolve))
        .route("/audit", get(endpoints::audit::list))
        .route(
            "/users",
            post(endpoints::users::register).get(endpoints::users::list),
        )
        .route("/users/:id", get(endpoints::users::detail))
        .with_state(ctx.clone())
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BYTES))
        .layer(axum::middleware::from_fn(middleware::auth::require_auth));

    let unprotected = Router::new()
        .route("/health", get(endpoints::health::check))
        .with_state(ctx.clone());

    let files = Router::new()
        .route("/files/:reference", get(endpoints::files::download))
        .with_state(ctx.clone())
        .layer(axum::middleware::from_fn(middleware::auth::require_auth));

    Router::new()
        .nest("/api", protected.merge(unprotected))
        .merge(files)
        .layer(axum::middleware::from_fn(middleware::audit::capture_requester))
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
        // Extension must be outermost so middleware can extract ApiContext
        .layer(axum::Extension(ctx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use axum::response::Response;
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use uuid::Uuid;

    use crate::api::types::TokenDirectory;
    use crate::blob_store::{BlobStore, LocalBlobStore};
    use crate::core_state::CoreState;
    use crate::insight::StaticInsight;
    use crate::models::enums::Role;
    use crate::records::tests::{audit_count, register, world};

    const BOUNDARY: &str = "carebridge-test-boundary";

    struct Harness {
        app: Router,
        core: Arc<CoreState>,
        patient: Uuid,
        hospital: Uuid,
    }

    fn harness() -> Harness {
        let w = world();
        let mut tokens = TokenDirectory::new();
        tokens.insert("patient-token", w.patient.principal);
        tokens.insert("other-patient-token", w.other_patient.principal);
        tokens.insert("hospital-token", w.hospital.principal);
        tokens.insert("other-hospital-token", w.other_hospital.principal);
        tokens.insert("admin-token", w.admin.principal);

        let core = Arc::new(w.state);
        let ctx = ApiContext::new(core.clone(), Arc::new(tokens));
        Harness {
            app: api_router(ctx),
            core,
            patient: w.patient.id(),
            hospital: w.hospital.id(),
        }
    }

    fn request(method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(t) = token {
            builder = builder.header("Authorization", format!("Bearer {t}"));
        }
        match body {
            Some(json) => builder
                .header("Content-Type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    fn multipart_request(token: &str, fields: &[(&str, &str)], file: Option<(&str, &[u8])>) -> Request<Body> {
        let mut body = Vec::new();
        for (name, value) in fields {
            body.extend_from_slice(
                format!("--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n")
                    .as_bytes(),
            );
        }
        if let Some((file_name, data)) = file {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\n\
                     Content-Type: application/pdf\r\n\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(data);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

        Request::builder()
            .method("POST")
            .uri("/api/records")
            .header("Authorization", format!("Bearer {token}"))
            .header("Content-Type", format!("multipart/form-data; boundary={BOUNDARY}"))
            .header("X-Forwarded-For", "203.0.113.9, 10.0.0.2")
            .body(Body::from(body))
            .unwrap()
    }

    async fn read_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        }
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(req).await.unwrap();
        let status = response.status();
        (status, read_json(response).await)
    }

    async fn create_record(h: &Harness) -> Value {
        let patient = h.patient.to_string();
        let req = multipart_request(
            "hospital-token",
            &[
                ("patient_id", patient.as_str()),
                ("type", "LAB_REPORT"),
                ("title", "Lipid panel"),
                ("description", "LDL 3.1 mmol/L"),
                ("metadata", r#"{"ward": "C"}"#),
            ],
            Some(("lipids.pdf", &b"%PDF-1.4 lipids"[..])),
        );
        let (status, body) = send(&h.app, req).await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body
    }

    // ── auth & headers ─────────────────────────────────

    #[tokio::test]
    async fn health_is_public_and_not_cached() {
        let h = harness();
        let response = h.app.clone().oneshot(request("GET", "/api/health", None, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get("Cache-Control").unwrap(), "no-store");
        let json = read_json(response).await;
        assert_eq!(json["status"], "ok");
        assert_eq!(json["audit_failures"], 0);
    }

    #[tokio::test]
    async fn protected_routes_need_known_token() {
        let h = harness();
        let (status, body) = send(&h.app, request("GET", "/api/records", None, None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["code"], "AUTH_REQUIRED");

        let (status, _) = send(&h.app, request("GET", "/api/records", Some("forged"), None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let response = h
            .app
            .clone()
            .oneshot(request("GET", "/api/records", Some("patient-token"), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get("Cache-Control").unwrap(), "no-store");
    }

    // ── records ────────────────────────────────────────

    #[tokio::test]
    async fn multipart_create_then_scoped_reads() {
        let h = harness();
        let record = create_record(&h).await;
        assert_eq!(record["status"], "PENDING");
        assert_eq!(record["hospital_id"], h.hospital.to_string());
        assert_eq!(record["files"].as_array().unwrap().len(), 1);
        assert_eq!(record["files"][0]["mime_type"], "application/pdf");
        let id = record["id"].as_str().unwrap();

        let (status, body) = send(&h.app, request("GET", &format!("/api/records/{id}"), Some("patient-token"), None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["description"], "LDL 3.1 mmol/L");
        assert_eq!(body["metadata"]["ward"], "C");

        let (status, _) = send(&h.app, request("GET", &format!("/api/records/{id}"), Some("other-patient-token"), None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (_, list) = send(&h.app, request("GET", "/api/records?status=PENDING", Some("other-hospital-token"), None)).await;
        assert!(list.as_array().unwrap().is_empty());

        let (_, stats) = send(&h.app, request("GET", "/api/records/stats", Some("patient-token"), None)).await;
        assert_eq!(stats["pending"], 1);
    }

    #[tokio::test]
    async fn multipart_validation_errors_are_400() {
        let h = harness();
        let patient = h.patient.to_string();
        let req = multipart_request(
            "hospital-token",
            &[("patient_id", patient.as_str()), ("type", "LAB_REPORT"), ("title", " "), ("description", "x")],
            None,
        );
        let (status, body) = send(&h.app, req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

        let req = multipart_request("hospital-token", &[("type", "X_RAY")], None);
        let (status, _) = send(&h.app, req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let req = multipart_request("patient-token", &[("patient_id", patient.as_str())], None);
        let (status, body) = send(&h.app, req).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"]["code"], "FORBIDDEN");
    }

    #[tokio::test]
    async fn approve_once_then_conflict() {
        let h = harness();
        let record = create_record(&h).await;
        let uri = format!("/api/records/{}/status", record["id"].as_str().unwrap());

        let (status, body) = send(&h.app, request("POST", &uri, Some("patient-token"), Some(json!({"status": "APPROVED"})))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "APPROVED");

        let (status, body) = send(
            &h.app,
            request("POST", &uri, Some("patient-token"), Some(json!({"status": "REJECTED", "rejection_reason": "late"}))),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["code"], "CONFLICT");
    }

    #[tokio::test]
    async fn malformed_bodies_and_ids() {
        let h = harness();
        let record = create_record(&h).await;
        let uri = format!("/api/records/{}/status", record["id"].as_str().unwrap());

        let (status, body) = send(&h.app, request("POST", &uri, Some("patient-token"), Some(json!({"status": "ARCHIVED"})))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

        let (status, _) = send(&h.app, request("GET", "/api/records/not-a-uuid", Some("admin-token"), None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn edit_and_delete() {
        let h = harness();
        let record = create_record(&h).await;
        let uri = format!("/api/records/{}", record["id"].as_str().unwrap());

        let (status, body) = send(&h.app, request("PATCH", &uri, Some("hospital-token"), Some(json!({"metadata": {"lab": "north"}})))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["metadata"]["ward"], "C");
        assert_eq!(body["metadata"]["lab"], "north");

        let (status, _) = send(&h.app, request("DELETE", &uri, Some("patient-token"), None)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = send(&h.app, request("DELETE", &uri, Some("hospital-token"), None)).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert_eq!(body, Value::Null);

        let (status, _) = send(&h.app, request("GET", &uri, Some("admin-token"), None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    // ── disputes ───────────────────────────────────────

    #[tokio::test]
    async fn dispute_created_and_resolved() {
        let h = harness();
        let record = create_record(&h).await;

        let (status, dispute) = send(
            &h.app,
            request(
                "POST",
                "/api/disputes",
                Some("patient-token"),
                Some(json!({
                    "record_id": record["id"],
                    "reason": "PRIVACY_VIOLATION",
                    "description": "Shared with the wrong clinic",
                })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{dispute}");
        assert_eq!(dispute["priority"], "HIGH");
        assert_eq!(dispute["status"], "PENDING_REVIEW");
        let id = dispute["id"].as_str().unwrap();

        let resolve = format!("/api/disputes/{id}/resolve");
        let (status, _) = send(&h.app, request("POST", &resolve, Some("hospital-token"), Some(json!({"status": "RESOLVED"})))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = send(
            &h.app,
            request("POST", &resolve, Some("admin-token"), Some(json!({"status": "RESOLVED", "note": "Access revoked"}))),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["timeline"].as_array().unwrap().len(), 2);

        let (status, _) = send(&h.app, request("POST", &resolve, Some("admin-token"), Some(json!({"status": "DISMISSED"})))).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (_, list) = send(&h.app, request("GET", "/api/disputes?priority=HIGH", Some("hospital-token"), None)).await;
        assert_eq!(list.as_array().unwrap().len(), 1);
    }

    // ── audit & users ──────────────────────────────────

    #[tokio::test]
    async fn audit_is_admin_only_and_records_requester() {
        let h = harness();
        create_record(&h).await;

        let (status, _) = send(&h.app, request("GET", "/api/audit", Some("hospital-token"), None)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        // The writer is asynchronous; poll until the entry lands.
        let mut entries = Value::Null;
        for _ in 0..50 {
            let (status, body) = send(&h.app, request("GET", "/api/audit?limit=10", Some("admin-token"), None)).await;
            assert_eq!(status, StatusCode::OK);
            if !body.as_array().unwrap().is_empty() {
                entries = body;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        let created = &entries[0];
        assert_eq!(created["action"], "RECORD_CREATED");
        assert_eq!(created["result"], "SUCCESS");
        assert_eq!(created["ip"], "203.0.113.9");
    }

    #[tokio::test]
    async fn users_registered_by_admin() {
        let h = harness();
        let id = Uuid::new_v4();
        let payload = json!({"id": id, "role": "hospital", "name": "Harbor Hospital"});

        let (status, _) = send(&h.app, request("POST", "/api/users", Some("hospital-token"), Some(payload.clone()))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = send(&h.app, request("POST", "/api/users", Some("admin-token"), Some(payload.clone()))).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["name"], "Harbor Hospital");

        let (status, _) = send(&h.app, request("POST", "/api/users", Some("admin-token"), Some(payload))).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (_, list) = send(&h.app, request("GET", "/api/users?role=hospital", Some("admin-token"), None)).await;
        assert_eq!(list.as_array().unwrap().len(), 3);

        let (status, _) = send(&h.app, request("GET", &format!("/api/users/{id}"), Some("patient-token"), None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    // ── files ──────────────────────────────────────────

    #[tokio::test]
    async fn stored_files_served_from_local_store() {
        let dir = tempfile::tempdir().unwrap();
        let blobs = Arc::new(LocalBlobStore::open(dir.path(), "http://localhost:8080").unwrap());
        let state = CoreState::for_tests(blobs as Arc<dyn BlobStore>, Arc::new(StaticInsight::new("n/a")));
        let hospital = register(&state, Role::Hospital, "St. Mary General");
        let patient = register(&state, Role::Patient, "Ada");

        let mut tokens = TokenDirectory::new();
        tokens.insert("hospital-token", hospital.principal);
        let app = api_router(ApiContext::new(Arc::new(state), Arc::new(tokens)));

        let patient_id = patient.id().to_string();
        let req = multipart_request(
            "hospital-token",
            &[
                ("patient_id", patient_id.as_str()),
                ("type", "IMAGING"),
                ("title", "Chest X-ray"),
                ("description", "No acute findings"),
            ],
            Some(("xray.pdf", &b"%PDF-1.4 xray"[..])),
        );
        let (status, record) = send(&app, req).await;
        assert_eq!(status, StatusCode::CREATED);
        let reference = record["files"][0]["reference"].as_str().unwrap();
        let uri = format!("/files/{reference}");

        let (status, _) = send(&app, request("GET", &uri, None, None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let response = app.clone().oneshot(request("GET", &uri, Some("hospital-token"), None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/pdf");
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"%PDF-1.4 xray");
    }

    async fn upload_scan(h: &Harness) -> (String, String) {
        let patient = h.patient.to_string();
        let req = multipart_request(
            "hospital-token",
            &[
                ("patient_id", patient.as_str()),
                ("type", "IMAGING"),
                ("title", "CT abdomen"),
                ("description", "Contrast study"),
            ],
            Some(("scan.pdf", &b"SECRET-SCAN"[..])),
        );
        let (status, record) = send(&h.app, req).await;
        assert_eq!(status, StatusCode::CREATED, "{record}");
        let id = record["id"].as_str().unwrap().to_string();
        let reference = record["files"][0]["reference"].as_str().unwrap().to_string();
        (id, reference)
    }

    #[tokio::test]
    async fn files_hidden_from_strangers() {
        let h = harness();
        let (_, reference) = upload_scan(&h).await;
        let uri = format!("/files/{reference}");

        for token in ["other-patient-token", "other-hospital-token"] {
            let (status, body) = send(&h.app, request("GET", &uri, Some(token), None)).await;
            assert_eq!(status, StatusCode::NOT_FOUND, "{token}");
            assert_eq!(body["error"]["code"], "NOT_FOUND");
        }
        for token in ["patient-token", "hospital-token", "admin-token"] {
            let response = h.app.clone().oneshot(request("GET", &uri, Some(token), None)).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK, "{token}");
            let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
            assert_eq!(&bytes[..], b"SECRET-SCAN");
        }

        let (status, _) = send(&h.app, request("GET", "/files/unknown", Some("admin-token"), None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn files_of_deleted_record_not_found() {
        let h = harness();
        let (id, reference) = upload_scan(&h).await;
        let (status, _) = send(&h.app, request("DELETE", &format!("/api/records/{id}"), Some("hospital-token"), None)).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let uri = format!("/files/{reference}");
        for token in ["patient-token", "hospital-token", "admin-token", "other-patient-token"] {
            let (status, _) = send(&h.app, request("GET", &uri, Some(token), None)).await;
            assert_eq!(status, StatusCode::NOT_FOUND, "{token}");
        }
    }

    // ── audit of rejected input ────────────────────────

    #[tokio::test]
    async fn undecodable_status_change_is_audited() {
        let h = harness();
        let record = create_record(&h).await;
        let uri = format!("/api/records/{}/status", record["id"].as_str().unwrap());
        let before = audit_count(&h.core).await;

        let (status, body) = send(
            &h.app,
            request("POST", &uri, Some("patient-token"), Some(json!({"status": "ARCHIVED"}))),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
        assert_eq!(audit_count(&h.core).await, before + 1);

        let (_, entries) = send(&h.app, request("GET", "/api/audit?limit=1", Some("admin-token"), None)).await;
        let entry = &entries[0];
        assert_eq!(entry["action"], "RECORD_STATUS_CHANGED");
        assert_eq!(entry["result"], "FAILED");
        assert_eq!(entry["target_id"], record["id"]);
    }

    #[tokio::test]
    async fn every_rejected_mutation_leaves_one_entry() {
        let h = harness();
        let record = create_record(&h).await;
        let record_uri = format!("/api/records/{}", record["id"].as_str().unwrap());

        let attempts = vec![
            multipart_request("hospital-token", &[("patient_id", "not-a-uuid")], None),
            multipart_request("hospital-token", &[("type", "HOROSCOPE")], None),
            multipart_request("hospital-token", &[("metadata", "[1, 2]")], None),
            request("PATCH", &record_uri, Some("hospital-token"), Some(json!({"type": "HOROSCOPE"}))),
            request("PATCH", "/api/records/not-a-uuid", Some("hospital-token"), Some(json!({"title": "x"}))),
            request("DELETE", "/api/records/not-a-uuid", Some("hospital-token"), None),
            request("POST", "/api/records/not-a-uuid/status", Some("patient-token"), Some(json!({"status": "APPROVED"}))),
            request("POST", "/api/disputes", Some("patient-token"), Some(json!({"reason": "BORED"}))),
            request("POST", "/api/disputes/not-a-uuid/resolve", Some("admin-token"), Some(json!({"status": "RESOLVED"}))),
            request("POST", "/api/users", Some("admin-token"), Some(json!({"role": "nurse"}))),
        ];

        for (i, req) in attempts.into_iter().enumerate() {
            let before = audit_count(&h.core).await;
            let (status, _) = send(&h.app, req).await;
            assert!(status.is_client_error(), "attempt {i}: {status}");
            assert_eq!(audit_count(&h.core).await, before + 1, "attempt {i}");
        }
    }

    #[tokio::test]
    async fn disabled_insight_fallback_over_http() {
        let h = harness();
        let record = create_record(&h).await;
        let (_, dispute) = send(
            &h.app,
            request(
                "POST",
                "/api/disputes",
                Some("patient-token"),
                Some(json!({"record_id": record["id"], "reason": "OTHER", "description": "Wrong date"})),
            ),
        )
        .await;
        assert_eq!(dispute["priority"], "MEDIUM");
        assert_eq!(dispute["ai_suggestion"], crate::insight::FALLBACK_SUGGESTION);
    }
}
