//! Paginated, ordered blob listing.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use futures::StreamExt;
use serde::Deserialize;

use attic_core::protocol::EnumerateResponse;
use attic_core::{BlobRef, Partition, SizedBlobRef};

use crate::AppState;
use crate::error::{error_response, json_response};

pub const DEFAULT_LIMIT: u64 = 1000;
pub const MAX_LIMIT: u64 = 10000;

#[derive(Debug, Deserialize)]
pub struct EnumerateParams {
    pub partition: Option<String>,
    pub after: Option<String>,
    pub limit: Option<u64>,
}

pub async fn handle(State(state): State<AppState>, Query(params): Query<EnumerateParams>) -> Response {
    let partition = match Partition::parse(params.partition.as_deref().unwrap_or_default()) {
        Ok(p) => p,
        Err(err) => return error_response(&err),
    };
    let after = match params.after.as_deref().map(BlobRef::parse).transpose() {
        Ok(a) => a,
        Err(err) => return error_response(&err),
    };
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);

    // ask for one extra entry to learn whether the listing was truncated
    let mut stream = match state
        .storage
        .enumerate(&partition, after, limit + 1, state.shutdown.child_token())
        .await
    {
        Ok(s) => s,
        Err(err) => return error_response(&err),
    };

    let mut blobs: Vec<SizedBlobRef> = Vec::new();
    while let Some(item) = stream.next().await {
        match item {
            Ok(sized) => blobs.push(sized),
            Err(err) => return error_response(&err),
        }
    }

    let truncated = blobs.len() as u64 > limit;
    if truncated {
        blobs.truncate(limit as usize);
    }
    let after = truncated.then(|| blobs[blobs.len() - 1].blob_ref.clone());

    json_response(
        StatusCode::OK,
        &EnumerateResponse {
            blobs,
            can_long_poll: state.storage.capabilities().long_poll,
            after,
        },
    )
}
