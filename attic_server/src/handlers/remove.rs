//! Blob deletion from the default partition. Non-existent blobs are not
//! errors; the response is `{}` unless the whole batch failed.

use axum::Form;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Response;

use attic_core::protocol::RemoveResponse;
use attic_core::{BlobRef, Partition};

use crate::AppState;
use crate::error::{json_response, status_for};
use crate::handlers::blob_fields;

pub async fn handle(
    State(state): State<AppState>,
    Form(fields): Form<Vec<(String, String)>>,
) -> Response {
    let mut refs = Vec::new();
    for value in blob_fields(&fields) {
        match BlobRef::parse(value) {
            Ok(r) => refs.push(r),
            Err(err) => {
                return json_response(
                    StatusCode::BAD_REQUEST,
                    &RemoveResponse {
                        error: Some(err.to_string()),
                    },
                );
            }
        }
    }

    match state
        .storage
        .remove(&Partition::default_partition(), &refs)
        .await
    {
        Ok(()) => {
            tracing::debug!(count = refs.len(), "removed blobs");
            json_response(StatusCode::OK, &RemoveResponse::default())
        }
        Err(err) => json_response(
            status_for(&err),
            &RemoveResponse {
                error: Some(err.to_string()),
            },
        ),
    }
}
