//! Multipart upload: each part's form name is the declared blobref, its
//! body the blob bytes. Parts fail or succeed individually; the response
//! always reports per-part outcomes.

use std::io;

use axum::extract::multipart::Field;
use axum::extract::{Multipart, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use attic_core::protocol::{UPLOAD_URL_EXPIRATION_SECONDS, UploadResponse};
use attic_core::{BlobRef, SizedBlobRef, StoreError, StoreResult, Storage};

use crate::AppState;
use crate::error::{error_response, json_response};
use crate::handlers::upload_url;

/// Chunks in flight between the multipart reader and the store.
const PART_CHANNEL_CAPACITY: usize = 8;

pub async fn handle(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Response {
    let mut received: Vec<SizedBlobRef> = Vec::new();
    let mut errors: Vec<String> = Vec::new();

    loop {
        if state.shutdown.is_cancelled() {
            return error_response(&StoreError::Cancelled);
        }
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(err) => {
                return error_response(&StoreError::bad_request(format!(
                    "malformed multipart body: {err}"
                )));
            }
        };

        let Some(name) = field.name().map(str::to_owned) else {
            errors.push("form part without a name".to_owned());
            continue;
        };
        let blob_ref = match BlobRef::parse(&name) {
            Ok(r) => r,
            Err(err) => {
                errors.push(format!("{name}: {err}"));
                continue;
            }
        };
        if !blob_ref.is_supported() {
            errors.push(format!(
                "{name}: {}",
                StoreError::UnsupportedHash(blob_ref.hash_name().to_owned())
            ));
            continue;
        }
        if field.content_type().is_none() {
            errors.push(format!("{name}: form part is missing a Content-Type"));
            continue;
        }

        match receive_field(state.storage.as_ref(), &blob_ref, field).await {
            Ok(sized) => {
                tracing::debug!(blob = %sized.blob_ref, size = sized.size, "received blob");
                received.push(sized);
            }
            Err(err) => errors.push(format!("{name}: {err}")),
        }
    }

    let resp = UploadResponse {
        max_upload_size: state.config.max_upload_size,
        upload_url_expiration_seconds: UPLOAD_URL_EXPIRATION_SECONDS,
        upload_url: upload_url(&headers),
        received,
        error_text: (!errors.is_empty()).then(|| errors.join("\n")),
    };
    json_response(StatusCode::OK, &resp)
}

/// Streams one part into the store through a bounded channel, so a slow
/// disk applies backpressure to the client connection.
async fn receive_field(
    storage: &dyn Storage,
    blob_ref: &BlobRef,
    mut field: Field<'_>,
) -> StoreResult<SizedBlobRef> {
    let (tx, rx) = mpsc::channel::<io::Result<Bytes>>(PART_CHANNEL_CAPACITY);
    let receive = storage.receive(blob_ref, Box::new(ReceiverStream::new(rx)));
    let feed = async move {
        loop {
            match field.chunk().await {
                Ok(Some(chunk)) => {
                    if tx.send(Ok(chunk)).await.is_err() {
                        // store bailed first; its error wins
                        break Ok(());
                    }
                }
                Ok(None) => break Ok(()),
                Err(err) => {
                    let msg = format!("reading form part: {err}");
                    let _ = tx.send(Err(io::Error::other(msg.clone()))).await;
                    break Err(StoreError::bad_request(msg));
                }
            }
        }
    };
    let (receive_res, feed_res) = tokio::join!(receive, feed);
    feed_res?;
    receive_res
}
