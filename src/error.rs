//! Error types crossing the HTTP boundary.
//!
//! Everything below the API layer propagates `anyhow::Error`; handlers
//! convert it (or construct `ApiError` directly) into the JSON error body
//! the route modules render, following the ad hoc `(StatusCode, Json(...))`
//! tuples the dashboard route handlers return, centralized into one type.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

#[derive(Debug)]
pub enum ApiError {
    /// Requested address does not resolve to a node in the tree.
    NotFound(String),
    /// Bad request shape, or an explicit index collision.
    BadRequest(String),
    /// The upstream NMS rejected or failed to answer a call we needed to
    /// complete before exposing the new object.
    UpstreamFailure(String),
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::NotFound(m) => write!(f, "not found: {m}"),
            ApiError::BadRequest(m) => write!(f, "bad request: {m}"),
            ApiError::UpstreamFailure(m) => write!(f, "upstream failure: {m}"),
        }
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
            ApiError::UpstreamFailure(m) => (StatusCode::BAD_GATEWAY, m.clone()),
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}
