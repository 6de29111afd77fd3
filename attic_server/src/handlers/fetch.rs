//! Blob reads: `GET`/`HEAD /camli/<blobref>`, owner- or share-gated,
//! with single-range support.

use std::time::{Duration, SystemTime};

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, Method, StatusCode, header};
use axum::response::Response;
use serde::Deserialize;

use attic_core::{BlobRef, StoreError};

use crate::AppState;
use crate::error::{error_response, unauthorized_response};
use crate::share;

#[derive(Debug, Deserialize)]
pub struct FetchParams {
    /// Comma-separated share chain authorizing a non-owner read.
    pub via: Option<String>,
    /// Token-mode credential carried in the query string.
    pub auth: Option<String>,
}

pub async fn handle(
    State(state): State<AppState>,
    method: Method,
    Path(raw_ref): Path<String>,
    Query(params): Query<FetchParams>,
    headers: HeaderMap,
) -> Response {
    let blob_ref = match BlobRef::parse(&raw_ref) {
        Ok(r) => r,
        Err(err) => return error_response(&err),
    };

    if !state.auth.is_authorized(&headers, params.auth.as_deref()) {
        let Some(via) = &params.via else {
            return delayed_unauthorized(&state).await;
        };
        match share::verify_chain(state.storage.as_ref(), via, &blob_ref).await {
            Ok(()) => {}
            Err(err @ StoreError::UnsupportedHash(_)) => return error_response(&err),
            Err(_) => return delayed_unauthorized(&state).await,
        }
    }

    if !blob_ref.is_supported() {
        return error_response(&StoreError::UnsupportedHash(blob_ref.hash_name().to_owned()));
    }
    let meta = match state.storage.stat_meta(&blob_ref).await {
        Ok(meta) => meta,
        Err(err) => return error_response(&err),
    };

    if method == Method::HEAD {
        let mut builder = Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .header(header::CONTENT_LENGTH, meta.size);
        if let Some(modified) = meta.modified {
            builder = builder.header(header::LAST_MODIFIED, http_date(modified));
        }
        return builder.body(Body::empty()).unwrap_or_default();
    }

    let range = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .map(|v| parse_range(v, meta.size));
    match range {
        None => {
            let stream = match state.storage.open_read(&blob_ref, 0, None).await {
                Ok(s) => s,
                Err(err) => return error_response(&err),
            };
            Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, "application/octet-stream")
                .header(header::CONTENT_LENGTH, meta.size)
                .body(Body::from_stream(stream))
                .unwrap_or_default()
        }
        Some(Some((start, end))) => {
            let len = end - start + 1;
            let stream = match state.storage.open_read(&blob_ref, start, Some(len)).await {
                Ok(s) => s,
                Err(err) => return error_response(&err),
            };
            Response::builder()
                .status(StatusCode::PARTIAL_CONTENT)
                .header(header::CONTENT_TYPE, "application/octet-stream")
                .header(header::CONTENT_LENGTH, len)
                .header(
                    header::CONTENT_RANGE,
                    format!("bytes {start}-{end}/{}", meta.size),
                )
                .body(Body::from_stream(stream))
                .unwrap_or_default()
        }
        Some(None) => Response::builder()
            .status(StatusCode::RANGE_NOT_SATISFIABLE)
            .header(header::CONTENT_RANGE, format!("bytes */{}", meta.size))
            .body(Body::empty())
            .unwrap_or_default(),
    }
}

/// Failed authorization answers slowly and with jitter, so probing for
/// blob existence through share URLs stays expensive.
async fn delayed_unauthorized(state: &AppState) -> Response {
    let jitter = u64::from(rand::random::<u8>());
    tokio::time::sleep(Duration::from_millis(200 + jitter)).await;
    unauthorized_response(&state.config.realm)
}

/// Parses a single `bytes=<start>-<end?>` range against a blob of
/// `total` bytes, returning the inclusive byte bounds.
fn parse_range(value: &str, total: u64) -> Option<(u64, u64)> {
    let spec = value.strip_prefix("bytes=")?;
    if spec.contains(',') {
        return None;
    }
    let (start_s, end_s) = spec.split_once('-')?;
    let start: u64 = start_s.trim().parse().ok()?;
    let end = match end_s.trim() {
        "" => total.checked_sub(1)?,
        s => s.parse::<u64>().ok()?.min(total.saturating_sub(1)),
    };
    if start > end || start >= total {
        return None;
    }
    Some((start, end))
}

fn http_date(time: SystemTime) -> String {
    chrono::DateTime::<chrono::Utc>::from(time)
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_parsing() {
        assert_eq!(parse_range("bytes=6-10", 11), Some((6, 10)));
        assert_eq!(parse_range("bytes=6-", 11), Some((6, 10)));
        assert_eq!(parse_range("bytes=0-0", 11), Some((0, 0)));
        // end clamps to the blob
        assert_eq!(parse_range("bytes=6-9999", 11), Some((6, 10)));
        // defects
        assert_eq!(parse_range("bytes=11-12", 11), None);
        assert_eq!(parse_range("bytes=5-4", 11), None);
        assert_eq!(parse_range("bytes=0-1,3-4", 11), None);
        assert_eq!(parse_range("bites=0-1", 11), None);
        assert_eq!(parse_range("bytes=-5", 11), None);
        assert_eq!(parse_range("bytes=0-", 0), None);
    }

    #[test]
    fn http_date_formats_like_rfc1123() {
        let t = SystemTime::UNIX_EPOCH + Duration::from_secs(784111777);
        assert_eq!(http_date(t), "Sun, 06 Nov 1994 08:49:37 GMT");
    }
}
