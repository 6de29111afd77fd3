//! Contract tests for `Storage` implementations.
//!
//! This module provides a test suite that can be run against any
//! [`Storage`] implementation to verify the parts of the contract that do
//! not depend on the backend: digest verification, idempotency, enumeration
//! order and removal semantics.
//!
//! # Usage
//!
//! In your store crate's `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! attic_core = { workspace = true, features = ["testutil"] }
//! ```
//!
//! In your test file:
//!
//! ```ignore
//! use attic_core::testutil::StorageTests;
//!
//! #[tokio::test]
//! async fn contract() {
//!     let store = MyStore::new(...);
//!     StorageTests::new(&store).run_all().await;
//! }
//! ```

use bytes::Bytes;
use futures::StreamExt;
use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::blobref::{BlobRef, SizedBlobRef};
use crate::error::StoreError;
use crate::partition::Partition;
use crate::store::{Storage, bytes_stream, collect_bytes};

/// Test suite for [`Storage`] implementations.
pub struct StorageTests<'a, S> {
    store: &'a S,
}

impl<'a, S: Storage> StorageTests<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Runs every contract test against the store.
    pub async fn run_all(&self) {
        self.receive_roundtrip().await;
        self.receive_is_idempotent().await;
        self.corrupt_blob_rejected().await;
        self.unsupported_hash_rejected().await;
        self.enumerate_ordered_with_cursor().await;
        self.remove_semantics().await;
        self.cancelled_enumerate().await;
    }

    fn payload(&self, len: usize) -> Bytes {
        let mut rng = rand::rng();
        let buf: Vec<u8> = (0..len).map(|_| rng.random::<u8>()).collect();
        Bytes::from(buf)
    }

    async fn put(&self, data: Bytes) -> SizedBlobRef {
        let r = BlobRef::from_bytes(&data);
        self.store
            .receive(&r, bytes_stream(data))
            .await
            .expect("receive failed")
    }

    pub async fn receive_roundtrip(&self) {
        let data = self.payload(256 * 1024 + 17);
        let sized = self.put(data.clone()).await;
        assert_eq!(sized.size, data.len() as u64);

        let size = self.store.stat(&sized.blob_ref).await.expect("stat failed");
        assert_eq!(size, data.len() as u64);

        let (stream, size) = self.store.fetch(&sized.blob_ref).await.expect("fetch");
        assert_eq!(size, data.len() as u64);
        let back = collect_bytes(stream, u64::MAX).await.expect("read back");
        assert_eq!(back, data);

        // ranged read
        let slice = self
            .store
            .open_read(&sized.blob_ref, 6, Some(5))
            .await
            .expect("open_read");
        let back = collect_bytes(slice, u64::MAX).await.expect("read slice");
        assert_eq!(back, data.slice(6..11));
    }

    pub async fn receive_is_idempotent(&self) {
        let data = self.payload(1024);
        let first = self.put(data.clone()).await;
        let second = self.put(data).await;
        assert_eq!(first, second);
    }

    pub async fn corrupt_blob_rejected(&self) {
        let declared = BlobRef::from_bytes(b"the declared content");
        let err = self
            .store
            .receive(&declared, bytes_stream(Bytes::from_static(b"other bytes")))
            .await
            .expect_err("corrupt receive accepted");
        assert!(
            matches!(err, StoreError::CorruptBlob { .. }),
            "wrong error: {err}"
        );
        // nothing must exist for the declared ref
        assert!(matches!(
            self.store.stat(&declared).await,
            Err(StoreError::NotFound)
        ));
    }

    pub async fn unsupported_hash_rejected(&self) {
        let r = BlobRef::parse("zz9-00ff00ff").unwrap();
        let err = self
            .store
            .receive(&r, bytes_stream(Bytes::from_static(b"x")))
            .await
            .expect_err("unsupported receive accepted");
        assert!(matches!(err, StoreError::UnsupportedHash(_)));
        let err = self.store.open_read(&r, 0, None).await.err();
        assert!(matches!(err, Some(StoreError::UnsupportedHash(_))));
    }

    pub async fn enumerate_ordered_with_cursor(&self) {
        let mut want: Vec<SizedBlobRef> = Vec::new();
        for i in 0..20u32 {
            let data = Bytes::from(format!("enumerate payload {i}"));
            want.push(self.put(data).await);
        }
        want.sort();

        let all = self.collect_enumeration(None, u64::MAX).await;
        // other tests may have inserted blobs; ours must appear in order
        let ours: Vec<_> = all
            .iter()
            .filter(|s| want.contains(s))
            .cloned()
            .collect();
        assert_eq!(ours, want);

        // strictly ascending, no duplicates
        for pair in all.windows(2) {
            assert!(pair[0].blob_ref < pair[1].blob_ref);
        }

        // `after` is a strict lower bound
        let mid = want[9].blob_ref.clone();
        let rest = self.collect_enumeration(Some(mid.clone()), u64::MAX).await;
        assert!(rest.iter().all(|s| s.blob_ref > mid));
        assert!(rest.iter().any(|s| s.blob_ref == want[10].blob_ref));

        // limit caps the result count
        let two = self.collect_enumeration(None, 2).await;
        assert_eq!(two.len(), 2);
        assert_eq!(two, all[..2]);
    }

    pub async fn remove_semantics(&self) {
        let sized = self.put(Bytes::from_static(b"to be removed")).await;
        let missing = BlobRef::from_bytes(b"never stored");
        self.store
            .remove(
                &Partition::default_partition(),
                &[sized.blob_ref.clone(), missing],
            )
            .await
            .expect("remove failed");
        assert!(matches!(
            self.store.stat(&sized.blob_ref).await,
            Err(StoreError::NotFound)
        ));
    }

    pub async fn cancelled_enumerate(&self) {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut stream = self
            .store
            .enumerate(&Partition::default_partition(), None, u64::MAX, cancel)
            .await
            .expect("enumerate failed");
        match stream.next().await {
            None => {}
            Some(Err(StoreError::Cancelled)) => {}
            Some(other) => panic!("expected cancellation, got {other:?}"),
        }
    }

    async fn collect_enumeration(&self, after: Option<BlobRef>, limit: u64) -> Vec<SizedBlobRef> {
        let mut stream = self
            .store
            .enumerate(
                &Partition::default_partition(),
                after,
                limit,
                CancellationToken::new(),
            )
            .await
            .expect("enumerate failed");
        let mut out = Vec::new();
        while let Some(item) = stream.next().await {
            out.push(item.expect("enumeration item failed"));
        }
        out
    }
}
