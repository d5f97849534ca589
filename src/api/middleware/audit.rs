//! Requester capture and access logging.
//!
//! Extracts the client IP (first `X-Forwarded-For` hop, else the socket
//! peer) and `User-Agent`, stores them as `RequestMeta` for the auth
//! layer, and logs method, path and response status.

use std::net::SocketAddr;

use axum::extract::ConnectInfo;
use axum::http::{HeaderMap, Request};
use axum::middleware::Next;
use axum::response::Response;

use crate::audit::RequestMeta;

pub async fn capture_requester(mut req: Request<axum::body::Body>, next: Next) -> Response {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string());
    let meta = requester_meta(req.headers(), peer);
    req.extensions_mut().insert(meta);

    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let response = next.run(req).await;

    tracing::debug!(%method, %path, status = response.status().as_u16(), "API access");
    response
}

pub(crate) fn requester_meta(headers: &HeaderMap, peer: Option<String>) -> RequestMeta {
    let forwarded = headers
        .get("X-Forwarded-For")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|hop| !hop.is_empty())
        .map(str::to_string);

    let user_agent = headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    RequestMeta {
        ip: forwarded.or(peer),
        user_agent,
    }
}
