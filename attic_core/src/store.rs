use std::io;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt, stream};
use tokio_util::sync::CancellationToken;

use crate::blobref::{BlobRef, SizedBlobRef};
use crate::error::{StoreError, StoreResult};
use crate::partition::Partition;

/// A stream of blob bytes.
pub type ByteStream = Box<dyn Stream<Item = io::Result<Bytes>> + Send + Unpin + 'static>;

/// A finite, non-restartable stream of enumeration results.
pub type RefStream = Box<dyn Stream<Item = StoreResult<SizedBlobRef>> + Send + Unpin + 'static>;

/// Capability set advertised by a [`Storage`] implementation.
///
/// Handlers require only the capabilities they use; server wiring refuses
/// to start when a required capability is missing.
#[derive(Debug, Clone, Copy, Default)]
pub struct Capabilities {
    pub fetch: bool,
    pub receive: bool,
    pub enumerate: bool,
    pub remove: bool,
    pub stat: bool,
    /// Whether enumerations can be long-polled for new blobs.
    pub long_poll: bool,
}

impl Capabilities {
    /// Everything a full blob server needs.
    pub fn full() -> Self {
        Self {
            fetch: true,
            receive: true,
            enumerate: true,
            remove: true,
            stat: true,
            long_poll: false,
        }
    }
}

/// Size and (where the backend knows it) modification time of a stored blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobMeta {
    pub size: u64,
    pub modified: Option<std::time::SystemTime>,
}

/// The polymorphic storage contract consumed by HTTP handlers and the sync
/// engine. Implemented by the local disk store, the in-memory test double
/// and the remote HTTP proxy.
#[async_trait]
pub trait Storage: std::fmt::Debug + Send + Sync + 'static {
    fn capabilities(&self) -> Capabilities;

    /// Streams `stream` into the store, verifying that its digest equals
    /// `expected`. Idempotent: re-receiving an existing blob succeeds
    /// without rewriting. Fails with `CorruptBlob` on digest mismatch and
    /// leaves no partial state behind on any failure path.
    async fn receive(&self, expected: &BlobRef, stream: ByteStream) -> StoreResult<SizedBlobRef>;

    /// Opens a reader over `[offset, offset + max_len)` of the blob.
    /// A fetch either sees no blob or the complete, verified blob.
    async fn open_read(
        &self,
        blob_ref: &BlobRef,
        offset: u64,
        max_len: Option<u64>,
    ) -> StoreResult<ByteStream>;

    async fn stat(&self, blob_ref: &BlobRef) -> StoreResult<u64>;

    /// Like [`Storage::stat`], with the modification time when the backend
    /// tracks one.
    async fn stat_meta(&self, blob_ref: &BlobRef) -> StoreResult<BlobMeta> {
        Ok(BlobMeta {
            size: self.stat(blob_ref).await?,
            modified: None,
        })
    }

    /// Enumerates up to `limit` blobs of `partition` in strictly ascending
    /// canonical order, strictly after `after`. Receivers observe
    /// `StoreError::Cancelled` if `cancel` fires mid-stream.
    async fn enumerate(
        &self,
        partition: &Partition,
        after: Option<BlobRef>,
        limit: u64,
        cancel: CancellationToken,
    ) -> StoreResult<RefStream>;

    /// Removes blobs from `partition`. Entries that do not exist are not
    /// errors; the first failing removal of an existing entry is fatal for
    /// the call. Removal from a queue partition deletes only the link,
    /// never the canonical blob.
    async fn remove(&self, partition: &Partition, refs: &[BlobRef]) -> StoreResult<()>;

    /// Whole-blob read: the blob's size plus a reader over all of it.
    async fn fetch(&self, blob_ref: &BlobRef) -> StoreResult<(ByteStream, u64)> {
        let size = self.stat(blob_ref).await?;
        let stream = self.open_read(blob_ref, 0, None).await?;
        Ok((stream, size))
    }
}

/// Wraps an in-memory buffer as a [`ByteStream`].
pub fn bytes_stream(bytes: Bytes) -> ByteStream {
    let future = Box::pin(async move { Ok(bytes) });
    Box::new(stream::once(future))
}

/// Collects a byte stream into memory, failing with `BadRequest` if it
/// exceeds `max_len` bytes.
pub async fn collect_bytes(mut stream: ByteStream, max_len: u64) -> StoreResult<Bytes> {
    let mut buf = Vec::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if buf.len() as u64 + chunk.len() as u64 > max_len {
            return Err(StoreError::bad_request(format!(
                "stream exceeds {max_len} bytes"
            )));
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(Bytes::from(buf))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn collect_bytes_roundtrip() {
        let out = collect_bytes(bytes_stream(Bytes::from_static(b"abc")), 1024)
            .await
            .unwrap();
        assert_eq!(&out[..], b"abc");
    }

    #[tokio::test]
    async fn collect_bytes_enforces_cap() {
        let err = collect_bytes(bytes_stream(Bytes::from(vec![0u8; 100])), 99)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::BadRequest(_)));
    }
}
