//! In-memory `Storage` implementation.
//!
//! Used as a test double and as a lightweight sync destination. Queue
//! partitions hold `Bytes` clones of the canonical blob, which mirrors the
//! hard-link semantics of the disk store: removing the canonical entry
//! leaves queue replicas readable.

use std::collections::BTreeMap;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use futures::{StreamExt, stream};
use tokio_util::sync::CancellationToken;

use attic_core::{
    BlobRef, ByteStream, Capabilities, Partition, RefStream, SizedBlobRef, StoreError, StoreResult,
    Storage,
};

#[derive(Debug, Default)]
pub struct MemoryStore {
    blobs: DashMap<String, Bytes>,
    queue_partitions: Vec<Partition>,
    queues: DashMap<String, BTreeMap<String, Bytes>>,
}

impl MemoryStore {
    /// Creates a new, empty `MemoryStore`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store that fans received blobs out to `queues`.
    pub fn with_queue_partitions(queues: Vec<Partition>) -> Self {
        Self {
            queue_partitions: queues,
            ..Self::default()
        }
    }

    fn get(&self, partition: &Partition, blob_ref: &BlobRef) -> StoreResult<Bytes> {
        if !blob_ref.is_supported() {
            return Err(StoreError::UnsupportedHash(blob_ref.hash_name().to_owned()));
        }
        let found = if partition.is_default() {
            self.blobs.get(blob_ref.as_str()).map(|e| e.value().clone())
        } else {
            self.queues
                .get(partition.name())
                .and_then(|q| q.get(blob_ref.as_str()).cloned())
        };
        found.ok_or(StoreError::NotFound)
    }

    fn listing(&self, partition: &Partition) -> Vec<SizedBlobRef> {
        let mut pairs: Vec<(String, u64)> = if partition.is_default() {
            self.blobs
                .iter()
                .map(|e| (e.key().clone(), e.value().len() as u64))
                .collect()
        } else {
            self.queues
                .get(partition.name())
                .map(|q| {
                    q.iter()
                        .map(|(k, v)| (k.clone(), v.len() as u64))
                        .collect()
                })
                .unwrap_or_default()
        };
        pairs.sort();
        pairs
            .into_iter()
            .filter_map(|(canonical, size)| {
                BlobRef::parse(&canonical)
                    .ok()
                    .map(|r| SizedBlobRef::new(r, size))
            })
            .collect()
    }
}

#[async_trait]
impl Storage for MemoryStore {
    fn capabilities(&self) -> Capabilities {
        Capabilities::full()
    }

    async fn receive(&self, expected: &BlobRef, stream: ByteStream) -> StoreResult<SizedBlobRef> {
        let mut digester = expected.digester()?;
        let bytes = attic_core::store::collect_bytes(stream, u64::MAX).await?;
        digester.update(&bytes);
        let computed = digester.finalize_hex();
        if computed != expected.digest() {
            return Err(StoreError::CorruptBlob {
                declared: expected.digest().to_owned(),
                computed,
            });
        }
        let size = bytes.len() as u64;
        for partition in &self.queue_partitions {
            self.queues
                .entry(partition.name().to_owned())
                .or_default()
                .insert(expected.as_str().to_owned(), bytes.clone());
        }
        self.blobs.insert(expected.as_str().to_owned(), bytes);
        Ok(SizedBlobRef::new(expected.clone(), size))
    }

    async fn open_read(
        &self,
        blob_ref: &BlobRef,
        offset: u64,
        max_len: Option<u64>,
    ) -> StoreResult<ByteStream> {
        let bytes = self.get(&Partition::default_partition(), blob_ref)?;
        let len = bytes.len() as u64;
        let start = offset.min(len);
        let end = match max_len {
            Some(max) => (start + max).min(len),
            None => len,
        };
        let slice = bytes.slice(start as usize..end as usize);
        let future = Box::pin(async move { Ok(slice) });
        Ok(Box::new(stream::once(future)))
    }

    async fn stat(&self, blob_ref: &BlobRef) -> StoreResult<u64> {
        Ok(self.get(&Partition::default_partition(), blob_ref)?.len() as u64)
    }

    async fn enumerate(
        &self,
        partition: &Partition,
        after: Option<BlobRef>,
        limit: u64,
        cancel: CancellationToken,
    ) -> StoreResult<RefStream> {
        let items: Vec<SizedBlobRef> = self
            .listing(partition)
            .into_iter()
            .filter(|s| after.as_ref().is_none_or(|a| s.blob_ref > *a))
            .take(usize::try_from(limit).unwrap_or(usize::MAX))
            .collect();
        let stream = stream::iter(items).map(move |item| {
            if cancel.is_cancelled() {
                Err(StoreError::Cancelled)
            } else {
                Ok(item)
            }
        });
        Ok(Box::new(stream))
    }

    async fn remove(&self, partition: &Partition, refs: &[BlobRef]) -> StoreResult<()> {
        for blob_ref in refs {
            if partition.is_default() {
                self.blobs.remove(blob_ref.as_str());
            } else if let Some(mut q) = self.queues.get_mut(partition.name()) {
                q.remove(blob_ref.as_str());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use attic_core::store::{bytes_stream, collect_bytes};
    use attic_core::testutil::StorageTests;
    use futures::StreamExt;

    #[tokio::test]
    async fn contract() {
        let store = MemoryStore::new();
        StorageTests::new(&store).run_all().await;
    }

    #[tokio::test]
    async fn queue_replicas_survive_canonical_removal() {
        let idx = Partition::parse("idx").unwrap();
        let store = MemoryStore::with_queue_partitions(vec![idx.clone()]);
        let data = Bytes::from_static(b"queued");
        let r = BlobRef::from_bytes(&data);
        store.receive(&r, bytes_stream(data.clone())).await.unwrap();

        store
            .remove(&Partition::default_partition(), &[r.clone()])
            .await
            .unwrap();
        assert!(matches!(store.stat(&r).await, Err(StoreError::NotFound)));

        let mut listing = store
            .enumerate(&idx, None, u64::MAX, CancellationToken::new())
            .await
            .unwrap();
        let only = listing.next().await.unwrap().unwrap();
        assert_eq!(only, SizedBlobRef::new(r, data.len() as u64));
    }

    #[tokio::test]
    async fn range_reads_clamp_to_blob_size() {
        let store = MemoryStore::new();
        let data = Bytes::from_static(b"hello world");
        let r = BlobRef::from_bytes(&data);
        store.receive(&r, bytes_stream(data)).await.unwrap();

        let slice = store.open_read(&r, 6, Some(100)).await.unwrap();
        let got = collect_bytes(slice, u64::MAX).await.unwrap();
        assert_eq!(&got[..], b"world");

        let empty = store.open_read(&r, 100, None).await.unwrap();
        let got = collect_bytes(empty, u64::MAX).await.unwrap();
        assert!(got.is_empty());
    }
}
