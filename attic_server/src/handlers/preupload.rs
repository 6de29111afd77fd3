//! Preupload: clients list candidate blobrefs as `blob1`, `blob2`, ...
//! form fields; the response names the subset already stored so the
//! client can skip re-uploading them.

use axum::Form;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;

use attic_core::protocol::{PreuploadResponse, UPLOAD_URL_EXPIRATION_SECONDS};
use attic_core::{BlobRef, SizedBlobRef, StoreError};

use crate::AppState;
use crate::error::{error_response, json_response};
use crate::handlers::{blob_fields, upload_url};

pub async fn handle(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(fields): Form<Vec<(String, String)>>,
) -> Response {
    let mut already_have: Vec<SizedBlobRef> = Vec::new();
    for value in blob_fields(&fields) {
        let blob_ref = match BlobRef::parse(value) {
            Ok(r) => r,
            Err(err) => return error_response(&err),
        };
        if !blob_ref.is_supported() {
            // can't be stored here, so it's trivially not already present
            continue;
        }
        match state.storage.stat(&blob_ref).await {
            Ok(size) => already_have.push(SizedBlobRef::new(blob_ref, size)),
            Err(StoreError::NotFound) => {}
            Err(err) => return error_response(&err),
        }
    }

    let resp = PreuploadResponse {
        already_have,
        max_upload_size: state.config.max_upload_size,
        upload_url: upload_url(&headers),
        upload_url_expiration_seconds: UPLOAD_URL_EXPIRATION_SECONDS,
    };
    json_response(StatusCode::OK, &resp)
}
