//! Sink store backing `--dest=stdout`.

use async_trait::async_trait;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use attic_core::{
    BlobRef, ByteStream, Capabilities, Partition, RefStream, SizedBlobRef, StoreError, StoreResult,
    Storage,
};

/// Prints `<blobref> <size>` for every blob "copied" into it.
///
/// It holds nothing and enumerates as empty, so every pass writes each
/// source blob once. Digests are still verified; a corrupt source stream
/// is reported, not printed.
#[derive(Debug, Default)]
pub struct StdoutSink;

#[async_trait]
impl Storage for StdoutSink {
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            receive: true,
            enumerate: true,
            ..Capabilities::default()
        }
    }

    async fn receive(&self, expected: &BlobRef, mut stream: ByteStream) -> StoreResult<SizedBlobRef> {
        let mut digester = expected.digester()?;
        let mut size = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            digester.update(&chunk);
            size += chunk.len() as u64;
        }
        let computed = digester.finalize_hex();
        if computed != expected.digest() {
            return Err(StoreError::CorruptBlob {
                declared: expected.digest().to_owned(),
                computed,
            });
        }
        println!("{expected} {size}");
        Ok(SizedBlobRef::new(expected.clone(), size))
    }

    async fn open_read(
        &self,
        _blob_ref: &BlobRef,
        _offset: u64,
        _max_len: Option<u64>,
    ) -> StoreResult<ByteStream> {
        Err(StoreError::NotFound)
    }

    async fn stat(&self, _blob_ref: &BlobRef) -> StoreResult<u64> {
        Err(StoreError::NotFound)
    }

    async fn enumerate(
        &self,
        _partition: &Partition,
        _after: Option<BlobRef>,
        _limit: u64,
        _cancel: CancellationToken,
    ) -> StoreResult<RefStream> {
        Ok(Box::new(futures::stream::empty()))
    }

    async fn remove(&self, _partition: &Partition, _refs: &[BlobRef]) -> StoreResult<()> {
        Ok(())
    }
}
