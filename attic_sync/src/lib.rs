//! The sync engine: drains a source store into a destination store with
//! at-least-once semantics.
//!
//! A pass enumerates both stores concurrently, diffs the two sorted
//! streams with a streaming merge, and copies everything missing at the
//! destination with bounded parallelism. Individual copy failures are
//! counted and retried implicitly on the next pass; only a failed
//! enumeration aborts a pass.

pub mod stdout;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use attic_core::{Partition, RefStream, SizedBlobRef, StoreError, StoreResult, Storage};

/// Concurrent copies per pass.
pub const DEFAULT_COPY_CONCURRENCY: usize = 8;

/// Idle back-off bounds for `--loop` mode.
pub const IDLE_BACKOFF_FLOOR: Duration = Duration::from_secs(1);
pub const IDLE_BACKOFF_CEILING: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone)]
pub struct SyncOpts {
    /// Source partition to drain; the destination always receives into
    /// its default partition.
    pub partition: Partition,
    /// Remove each blob from the source partition once the destination
    /// has durably stored it.
    pub remove_source: bool,
    pub concurrency: usize,
}

impl Default for SyncOpts {
    fn default() -> Self {
        Self {
            partition: Partition::default_partition(),
            remove_source: false,
            concurrency: DEFAULT_COPY_CONCURRENCY,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub blobs_copied: u64,
    pub bytes_copied: u64,
    pub error_count: u64,
}

impl SyncStats {
    pub fn merge(&mut self, other: SyncStats) {
        self.blobs_copied += other.blobs_copied;
        self.bytes_copied += other.bytes_copied;
        self.error_count += other.error_count;
    }
}

/// Runs one complete source-to-destination pass.
///
/// Fatal only when either enumeration fails or `cancel` fires; per-blob
/// failures land in `error_count` and leave the blob at the source.
pub async fn sync_pass(
    src: Arc<dyn Storage>,
    dst: Arc<dyn Storage>,
    opts: &SyncOpts,
    cancel: CancellationToken,
) -> StoreResult<SyncStats> {
    let default_partition = Partition::default_partition();
    let (mut src_stream, mut dst_stream) = tokio::try_join!(
        src.enumerate(&opts.partition, None, u64::MAX, cancel.clone()),
        dst.enumerate(
            &default_partition,
            None,
            u64::MAX,
            cancel.clone()
        ),
    )?;

    let semaphore = Arc::new(Semaphore::new(opts.concurrency.max(1)));
    let stats = Arc::new(Mutex::new(SyncStats::default()));
    let mut copies = JoinSet::new();

    let mut dst_next = next_entry(&mut dst_stream).await?;
    while let Some(item) = src_stream.next().await {
        let entry = item?;
        // advance the destination cursor past everything smaller
        while let Some(d) = &dst_next {
            if d.blob_ref < entry.blob_ref {
                dst_next = next_entry(&mut dst_stream).await?;
            } else {
                break;
            }
        }
        if matches!(&dst_next, Some(d) if d.blob_ref == entry.blob_ref) {
            // already durable downstream; a draining pass still removes it
            if opts.remove_source
                && let Err(err) = src
                    .remove(&opts.partition, std::slice::from_ref(&entry.blob_ref))
                    .await
            {
                tracing::warn!(blob = %entry.blob_ref, error = %err, "source removal failed");
                stats.lock().unwrap().error_count += 1;
            }
            continue;
        }

        let permit = semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| StoreError::Cancelled)?;
        let src = src.clone();
        let dst = dst.clone();
        let stats = stats.clone();
        let partition = opts.partition.clone();
        let remove_source = opts.remove_source;
        copies.spawn(async move {
            let _permit = permit;
            match copy_blob(
                src.as_ref(),
                dst.as_ref(),
                &entry,
                &partition,
                remove_source,
            )
            .await
            {
                Ok(bytes) => {
                    let mut s = stats.lock().unwrap();
                    s.blobs_copied += 1;
                    s.bytes_copied += bytes;
                }
                Err(err) => {
                    tracing::warn!(blob = %entry.blob_ref, error = %err, "copy failed");
                    stats.lock().unwrap().error_count += 1;
                }
            }
        });
    }

    while copies.join_next().await.is_some() {}
    if cancel.is_cancelled() {
        return Err(StoreError::Cancelled);
    }
    let stats = *stats.lock().unwrap();
    Ok(stats)
}

async fn next_entry(stream: &mut RefStream) -> StoreResult<Option<SizedBlobRef>> {
    stream.next().await.transpose()
}

async fn copy_blob(
    src: &dyn Storage,
    dst: &dyn Storage,
    entry: &SizedBlobRef,
    partition: &Partition,
    remove_source: bool,
) -> StoreResult<u64> {
    let (stream, size) = src.fetch(&entry.blob_ref).await?;
    if size != entry.size {
        return Err(StoreError::other(format!(
            "size changed under sync: enumerated {}, fetched {size}",
            entry.size
        )));
    }
    let stored = dst.receive(&entry.blob_ref, stream).await?;
    if remove_source {
        src.remove(partition, std::slice::from_ref(&entry.blob_ref))
            .await?;
    }
    Ok(stored.size)
}

/// Next sleep interval for `--loop` mode: doubles while idle up to the
/// ceiling, snaps back to the floor on any progress.
pub fn next_backoff(current: Duration, made_progress: bool) -> Duration {
    if made_progress || current.is_zero() {
        IDLE_BACKOFF_FLOOR
    } else {
        (current * 2).min(IDLE_BACKOFF_CEILING)
    }
}

/// Runs passes until cancelled (loop mode) or once (single-shot).
pub async fn run(
    src: Arc<dyn Storage>,
    dst: Arc<dyn Storage>,
    opts: SyncOpts,
    loop_forever: bool,
    cancel: CancellationToken,
) -> StoreResult<SyncStats> {
    if loop_forever && !opts.remove_source {
        return Err(StoreError::bad_request(
            "continuous sync drains a queue: --loop requires --removesrc",
        ));
    }
    let mut total = SyncStats::default();
    let mut backoff = Duration::ZERO;
    loop {
        let stats = sync_pass(src.clone(), dst.clone(), &opts, cancel.clone()).await?;
        tracing::info!(
            copied = stats.blobs_copied,
            bytes = stats.bytes_copied,
            errors = stats.error_count,
            "sync pass complete"
        );
        total.merge(stats);
        if !loop_forever {
            return Ok(total);
        }
        let progress = stats.blobs_copied > 0 || stats.error_count > 0;
        backoff = next_backoff(backoff, progress);
        tokio::select! {
            _ = cancel.cancelled() => return Err(StoreError::Cancelled),
            _ = tokio::time::sleep(backoff) => {}
        }
    }
}
