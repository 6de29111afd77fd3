//! Contract between the store and the external garbage collector.
//!
//! The GC algorithm itself lives elsewhere; the store participates as the
//! [`World`] being quiesced, the [`Sweeper`] producing deletion candidates
//! and the [`Deleter`] applying decisions. Enumerations push items through
//! bounded channels so the collector controls backpressure.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::blobref::BlobRef;
use crate::error::StoreResult;

/// Quiesce handle for the store: `start` blocks new writes until `stop`.
#[async_trait]
pub trait World: Send + Sync {
    async fn start(&self) -> StoreResult<()>;
    async fn stop(&self) -> StoreResult<()>;
}

/// Produces the root set the collector marks from.
#[async_trait]
pub trait Roots: Send + Sync {
    async fn enumerate(
        &self,
        cancel: CancellationToken,
        out: mpsc::Sender<BlobRef>,
    ) -> StoreResult<()>;
}

/// Produces the candidate set the collector sweeps over.
#[async_trait]
pub trait Sweeper: Send + Sync {
    async fn enumerate(
        &self,
        cancel: CancellationToken,
        out: mpsc::Sender<BlobRef>,
    ) -> StoreResult<()>;
}

/// Expands one item into the items it references.
#[async_trait]
pub trait ItemEnumerator: Send + Sync {
    async fn enumerate_item(
        &self,
        cancel: CancellationToken,
        item: &BlobRef,
        out: mpsc::Sender<BlobRef>,
    ) -> StoreResult<()>;
}

/// Mark-phase bookkeeping owned by the collector.
pub trait Marker: Send + Sync {
    fn mark(&self, item: &BlobRef);
    fn is_marked(&self, item: &BlobRef) -> bool;
}

/// Applies a sweep decision.
#[async_trait]
pub trait Deleter: Send + Sync {
    async fn delete(&self, item: &BlobRef) -> StoreResult<()>;
}
