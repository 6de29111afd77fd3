//! Mapping from the error taxonomy to HTTP responses.

use axum::body::Body;
use axum::http::{StatusCode, header};
use axum::response::Response;
use serde::Serialize;

use attic_core::StoreError;

pub fn status_for(err: &StoreError) -> StatusCode {
    match err {
        StoreError::BadRequest(_)
        | StoreError::UnsupportedHash(_)
        | StoreError::CorruptBlob { .. } => StatusCode::BAD_REQUEST,
        StoreError::Unauthorized => StatusCode::UNAUTHORIZED,
        StoreError::NotFound => StatusCode::NOT_FOUND,
        StoreError::Io(_) | StoreError::Conflict | StoreError::Cancelled => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// A short one-line error body; detail stays in the logs.
pub fn error_response(err: &StoreError) -> Response {
    Response::builder()
        .status(status_for(err))
        .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(Body::from(format!("{err}\n")))
        .unwrap_or_default()
}

pub fn unauthorized_response(realm: &str) -> Response {
    Response::builder()
        .status(StatusCode::UNAUTHORIZED)
        .header(
            header::WWW_AUTHENTICATE,
            format!("Basic realm=\"{realm}\""),
        )
        .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(Body::from("unauthorized\n"))
        .unwrap_or_default()
}

/// Serializes `value` pretty-printed with two-space indentation.
pub fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Response {
    match serde_json::to_string_pretty(value) {
        Ok(mut body) => {
            body.push('\n');
            Response::builder()
                .status(status)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body))
                .unwrap_or_default()
        }
        Err(err) => error_response(&StoreError::other(format!("encoding response: {err}"))),
    }
}
