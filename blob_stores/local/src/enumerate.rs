//! Ordered directory walk backing `LocalStore::enumerate`.
//!
//! The on-disk fan-out sorts the same way canonical blobrefs do, so a
//! depth-first walk over sorted directory entries yields ascending order
//! without buffering the whole listing. Results flow through a bounded
//! channel; a slow consumer stalls the walk rather than growing memory.

use std::path::{Path, PathBuf};

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use attic_core::{BlobRef, RefStream, SizedBlobRef, StoreError, StoreResult};

/// Capacity of the walker-to-consumer channel.
const CHANNEL_CAPACITY: usize = 100;

pub(crate) fn spawn_walker(
    root: PathBuf,
    after: Option<BlobRef>,
    limit: u64,
    cancel: CancellationToken,
) -> RefStream {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    tokio::task::spawn_blocking(move || {
        let mut walker = Walker {
            after,
            cancel,
            tx,
            remaining: limit,
        };
        if let Err(err) = walker.walk_root(&root) {
            let _ = walker.tx.blocking_send(Err(err));
        }
    });
    Box::new(ReceiverStream::new(rx))
}

struct Walker {
    after: Option<BlobRef>,
    cancel: CancellationToken,
    tx: mpsc::Sender<StoreResult<SizedBlobRef>>,
    remaining: u64,
}

impl Walker {
    fn walk_root(&mut self, root: &Path) -> StoreResult<()> {
        if self.remaining == 0 || !root.is_dir() {
            return Ok(());
        }
        // The `after` digest prefix lets whole fan-out directories be
        // skipped. Padded prefixes only sort consistently when the digest
        // covers all six characters, so short digests disable pruning.
        let prune = self.after.clone().filter(|a| a.digest().len() >= 6);
        for (hash_name, hash_dir) in sorted_dirs(root)? {
            if hash_name == "partition" {
                continue;
            }
            if let Some(a) = &prune
                && hash_name.as_str() < a.hash_name()
            {
                continue;
            }
            let same_hash = prune.as_ref().is_some_and(|a| a.hash_name() == hash_name);
            for (d1, dir1) in sorted_dirs(&hash_dir)? {
                if same_hash
                    && let Some(a) = &prune
                    && d1.as_str() < &a.digest()[0..3]
                {
                    continue;
                }
                for (d2, dir2) in sorted_dirs(&dir1)? {
                    if same_hash
                        && let Some(a) = &prune
                        && d1.as_str() == &a.digest()[0..3]
                        && d2.as_str() < &a.digest()[3..6]
                    {
                        continue;
                    }
                    if !self.emit_files(&dir2)? {
                        return Ok(());
                    }
                }
            }
        }
        Ok(())
    }

    /// Emits the blob files of one leaf directory. Returns false once the
    /// limit is reached or the consumer went away.
    fn emit_files(&mut self, dir: &Path) -> StoreResult<bool> {
        for (name, path) in sorted_files(dir)? {
            if self.cancel.is_cancelled() {
                let _ = self.tx.blocking_send(Err(StoreError::Cancelled));
                return Ok(false);
            }
            let Some(canonical) = name.strip_suffix(".dat") else {
                continue;
            };
            let Ok(blob_ref) = BlobRef::parse(canonical) else {
                continue;
            };
            if let Some(a) = &self.after
                && blob_ref <= *a
            {
                continue;
            }
            let size = std::fs::metadata(&path)?.len();
            if self
                .tx
                .blocking_send(Ok(SizedBlobRef::new(blob_ref, size)))
                .is_err()
            {
                return Ok(false);
            }
            self.remaining -= 1;
            if self.remaining == 0 {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

fn sorted_dirs(dir: &Path) -> StoreResult<Vec<(String, PathBuf)>> {
    sorted_entries(dir, true)
}

fn sorted_files(dir: &Path) -> StoreResult<Vec<(String, PathBuf)>> {
    sorted_entries(dir, false)
}

fn sorted_entries(dir: &Path, want_dirs: bool) -> StoreResult<Vec<(String, PathBuf)>> {
    let mut out = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() != want_dirs {
            continue;
        }
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        out.push((name, entry.path()));
    }
    out.sort();
    Ok(out)
}
