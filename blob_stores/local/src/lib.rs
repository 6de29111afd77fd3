//! The default on-disk blob store.
//!
//! Blobs live under a root directory at
//! `<root>/<hashName>/<d0d1d2>/<d3d4d5>/<canonical>.dat`, where the `d`
//! components are the first six hex characters of the digest (padded with
//! `_` if shorter). Queue partitions replicate blobs as hard links under
//! `<root>/partition/<name>/...`; the default partition owns the bytes.

mod enumerate;

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::sync::{Mutex, OwnedRwLockWriteGuard, RwLock};
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;

use attic_core::gc::{Deleter, Sweeper, World};
use attic_core::store::BlobMeta;
use attic_core::{
    BlobRef, ByteStream, Capabilities, Digester, Partition, RefStream, SizedBlobRef, StoreError,
    StoreResult, Storage,
};

/// File extension of stored blobs.
const BLOB_EXT: &str = "dat";

/// Marker embedded in temp-file names; the startup sweep keys off it.
const TMP_MARKER: &str = ".tmp-";

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct LocalStoreConfig {
    pub base_path: String,
    /// Queue partitions to fan received blobs out to, via hard links.
    #[serde(default)]
    pub queue_partitions: Vec<Partition>,
}

#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
    queue_partitions: Vec<Partition>,
    // Receives hold this shared; the GC quiesce holds it exclusive.
    write_gate: Arc<RwLock<()>>,
    quiesce: Arc<Mutex<Option<OwnedRwLockWriteGuard<()>>>>,
}

impl LocalStore {
    /// Opens (creating if needed) a store rooted at `config.base_path` and
    /// sweeps temp files orphaned by an earlier crash.
    pub fn create(config: LocalStoreConfig) -> StoreResult<Self> {
        if config.queue_partitions.iter().any(Partition::is_default) {
            return Err(StoreError::bad_request(
                "the default partition cannot be a queue",
            ));
        }
        let root = PathBuf::from(config.base_path);
        std::fs::create_dir_all(&root)?;
        let swept = sweep_temp_files(&root)?;
        if swept > 0 {
            tracing::debug!(count = swept, root = %root.display(), "removed orphan temp files");
        }
        Ok(Self {
            root,
            queue_partitions: config.queue_partitions,
            write_gate: Arc::new(RwLock::new(())),
            quiesce: Arc::new(Mutex::new(None)),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn partition_root(&self, partition: &Partition) -> PathBuf {
        if partition.is_default() {
            self.root.clone()
        } else {
            self.root.join("partition").join(partition.name())
        }
    }

    /// Canonical path of a blob inside `partition`.
    pub fn blob_path(&self, partition: &Partition, blob_ref: &BlobRef) -> PathBuf {
        let (d1, d2) = digest_fanout(blob_ref.digest());
        self.partition_root(partition)
            .join(blob_ref.hash_name())
            .join(d1)
            .join(d2)
            .join(format!("{}.{BLOB_EXT}", blob_ref.as_str()))
    }

    async fn write_and_commit(
        &self,
        expected: &BlobRef,
        mut digester: Digester,
        mut stream: ByteStream,
        final_path: &Path,
        tmp_path: &Path,
    ) -> StoreResult<SizedBlobRef> {
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(tmp_path)
            .await?;
        let mut size = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            digester.update(&chunk);
            size += chunk.len() as u64;
            file.write_all(&chunk).await?;
        }
        file.sync_all().await?;
        drop(file);

        let computed = digester.finalize_hex();
        if computed != expected.digest() {
            return Err(StoreError::CorruptBlob {
                declared: expected.digest().to_owned(),
                computed,
            });
        }

        match tokio::fs::metadata(final_path).await {
            // Already present and complete: a concurrent or earlier receive
            // won the rename. Idempotent success.
            Ok(meta) if meta.len() == size => {
                tokio::fs::remove_file(tmp_path).await?;
            }
            _ => {
                tokio::fs::rename(tmp_path, final_path).await?;
                if let Some(dir) = final_path.parent() {
                    sync_dir(dir).await?;
                }
            }
        }

        self.link_into_queues(expected, final_path).await?;
        Ok(SizedBlobRef::new(expected.clone(), size))
    }

    /// Creates one hard link per configured queue partition. If any link
    /// fails, the links created so far are removed again and the receive
    /// fails; the canonical blob stays in place for a retry.
    async fn link_into_queues(&self, blob_ref: &BlobRef, canonical: &Path) -> StoreResult<()> {
        let mut created: Vec<PathBuf> = Vec::new();
        for partition in &self.queue_partitions {
            let link_path = self.blob_path(partition, blob_ref);
            let result = async {
                if let Some(dir) = link_path.parent() {
                    tokio::fs::create_dir_all(dir).await?;
                }
                match tokio::fs::hard_link(canonical, &link_path).await {
                    Ok(()) => {
                        if let Some(dir) = link_path.parent() {
                            sync_dir(dir).await?;
                        }
                        Ok(true)
                    }
                    Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(false),
                    Err(e) => Err(e),
                }
            }
            .await;
            match result {
                Ok(true) => created.push(link_path),
                Ok(false) => {}
                Err(err) => {
                    for path in &created {
                        let _ = tokio::fs::remove_file(path).await;
                    }
                    return Err(err.into());
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Storage for LocalStore {
    fn capabilities(&self) -> Capabilities {
        Capabilities::full()
    }

    async fn receive(&self, expected: &BlobRef, stream: ByteStream) -> StoreResult<SizedBlobRef> {
        let digester = expected.digester()?;
        let _gate = self.write_gate.read().await;

        let final_path = self.blob_path(&Partition::default_partition(), expected);
        let dir = final_path
            .parent()
            .ok_or_else(|| StoreError::other("blob path has no parent"))?;
        tokio::fs::create_dir_all(dir).await?;

        let tmp_path = dir.join(format!(
            "{}.{BLOB_EXT}{TMP_MARKER}{:08x}",
            expected.as_str(),
            rand::random::<u32>()
        ));

        let result = self
            .write_and_commit(expected, digester, stream, &final_path, &tmp_path)
            .await;
        if result.is_err() {
            let _ = tokio::fs::remove_file(&tmp_path).await;
        }
        result
    }

    async fn open_read(
        &self,
        blob_ref: &BlobRef,
        offset: u64,
        max_len: Option<u64>,
    ) -> StoreResult<ByteStream> {
        if !blob_ref.is_supported() {
            return Err(StoreError::UnsupportedHash(blob_ref.hash_name().to_owned()));
        }
        let path = self.blob_path(&Partition::default_partition(), blob_ref);
        let mut file = tokio::fs::File::open(&path).await.map_err(not_found)?;
        if offset > 0 {
            file.seek(io::SeekFrom::Start(offset)).await?;
        }
        let stream: ByteStream = match max_len {
            Some(len) => Box::new(ReaderStream::new(file.take(len))),
            None => Box::new(ReaderStream::new(file)),
        };
        Ok(stream)
    }

    async fn stat(&self, blob_ref: &BlobRef) -> StoreResult<u64> {
        Ok(self.stat_meta(blob_ref).await?.size)
    }

    async fn stat_meta(&self, blob_ref: &BlobRef) -> StoreResult<BlobMeta> {
        if !blob_ref.is_supported() {
            return Err(StoreError::UnsupportedHash(blob_ref.hash_name().to_owned()));
        }
        let path = self.blob_path(&Partition::default_partition(), blob_ref);
        let meta = tokio::fs::metadata(&path).await.map_err(not_found)?;
        Ok(BlobMeta {
            size: meta.len(),
            modified: meta.modified().ok(),
        })
    }

    async fn enumerate(
        &self,
        partition: &Partition,
        after: Option<BlobRef>,
        limit: u64,
        cancel: CancellationToken,
    ) -> StoreResult<RefStream> {
        Ok(enumerate::spawn_walker(
            self.partition_root(partition),
            after,
            limit,
            cancel,
        ))
    }

    async fn remove(&self, partition: &Partition, refs: &[BlobRef]) -> StoreResult<()> {
        for blob_ref in refs {
            let path = self.blob_path(partition, blob_ref);
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

#[async_trait]
impl World for LocalStore {
    async fn start(&self) -> StoreResult<()> {
        let guard = self.write_gate.clone().write_owned().await;
        *self.quiesce.lock().await = Some(guard);
        Ok(())
    }

    async fn stop(&self) -> StoreResult<()> {
        self.quiesce.lock().await.take();
        Ok(())
    }
}

#[async_trait]
impl Sweeper for LocalStore {
    async fn enumerate(
        &self,
        cancel: CancellationToken,
        out: mpsc::Sender<BlobRef>,
    ) -> StoreResult<()> {
        let mut stream = Storage::enumerate(
            self,
            &Partition::default_partition(),
            None,
            u64::MAX,
            cancel,
        )
        .await?;
        while let Some(item) = stream.next().await {
            let sized = item?;
            if out.send(sized.blob_ref).await.is_err() {
                return Err(StoreError::Cancelled);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Deleter for LocalStore {
    async fn delete(&self, item: &BlobRef) -> StoreResult<()> {
        self.remove(&Partition::default_partition(), std::slice::from_ref(item))
            .await
    }
}

/// Splits a digest into the two fan-out directory names: the first six hex
/// characters, padded with `_` when the digest is shorter.
fn digest_fanout(digest: &str) -> (String, String) {
    let padded: String = digest.chars().chain(std::iter::repeat('_')).take(6).collect();
    (padded[0..3].to_owned(), padded[3..6].to_owned())
}

fn not_found(err: io::Error) -> StoreError {
    if err.kind() == io::ErrorKind::NotFound {
        StoreError::NotFound
    } else {
        StoreError::Io(err)
    }
}

async fn sync_dir(dir: &Path) -> io::Result<()> {
    let dir = dir.to_path_buf();
    tokio::task::spawn_blocking(move || std::fs::File::open(&dir)?.sync_all())
        .await
        .map_err(io::Error::other)?
}

/// Removes files left behind by receives that crashed before commit.
fn sweep_temp_files(root: &Path) -> io::Result<u64> {
    let mut swept = 0;
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                stack.push(entry.path());
            } else if entry.file_name().to_string_lossy().contains(TMP_MARKER) {
                std::fs::remove_file(entry.path())?;
                swept += 1;
            }
        }
    }
    Ok(swept)
}

#[cfg(test)]
mod tests {
    use super::*;
    use attic_core::store::bytes_stream;
    use attic_core::testutil::StorageTests;
    use std::os::unix::fs::MetadataExt;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn store_at(dir: &TempDir, queues: &[&str]) -> LocalStore {
        LocalStore::create(LocalStoreConfig {
            base_path: dir.path().to_string_lossy().into_owned(),
            queue_partitions: queues.iter().map(|q| Partition::parse(q).unwrap()).collect(),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn contract() {
        let dir = TempDir::new().unwrap();
        let store = store_at(&dir, &[]);
        StorageTests::new(&store).run_all().await;
    }

    #[tokio::test]
    async fn canonical_layout_and_mode() {
        let dir = TempDir::new().unwrap();
        let store = store_at(&dir, &[]);
        let data = Bytes::from_static(b"hello world");
        let r = BlobRef::from_bytes(&data);
        store.receive(&r, bytes_stream(data)).await.unwrap();

        let path = dir
            .path()
            .join("sha1")
            .join("2aa")
            .join("e6c")
            .join("sha1-2aae6c35c94fcfb415dbe95f408b9ce91ee846ed.dat");
        let meta = std::fs::metadata(&path).unwrap();
        assert_eq!(meta.len(), 11);
        assert_eq!(meta.permissions().mode() & 0o111, 0, "blob is executable");
    }

    #[test]
    fn fanout_pads_short_digests() {
        assert_eq!(
            digest_fanout("2aae6c35c94f"),
            ("2aa".to_owned(), "e6c".to_owned())
        );
        assert_eq!(digest_fanout("ab"), ("ab_".to_owned(), "___".to_owned()));
    }

    #[tokio::test]
    async fn queue_partitions_share_an_inode() {
        let dir = TempDir::new().unwrap();
        let store = store_at(&dir, &["idx"]);
        let data = Bytes::from_static(b"fan me out");
        let r = BlobRef::from_bytes(&data);
        store.receive(&r, bytes_stream(data)).await.unwrap();

        let canonical = store.blob_path(&Partition::default_partition(), &r);
        let linked = store.blob_path(&Partition::parse("idx").unwrap(), &r);
        let a = std::fs::metadata(&canonical).unwrap();
        let b = std::fs::metadata(&linked).unwrap();
        assert_eq!(a.ino(), b.ino());
        assert_eq!(a.nlink(), 2);
    }

    #[tokio::test]
    async fn queue_removal_keeps_canonical_blob() {
        let dir = TempDir::new().unwrap();
        let store = store_at(&dir, &["idx"]);
        let data = Bytes::from_static(b"drain the queue");
        let r = BlobRef::from_bytes(&data);
        store.receive(&r, bytes_stream(data.clone())).await.unwrap();

        let idx = Partition::parse("idx").unwrap();
        store.remove(&idx, &[r.clone()]).await.unwrap();
        assert!(!store.blob_path(&idx, &r).exists());
        assert_eq!(store.stat(&r).await.unwrap(), data.len() as u64);
    }

    #[tokio::test]
    async fn corrupt_receive_leaves_no_artifacts() {
        let dir = TempDir::new().unwrap();
        let store = store_at(&dir, &[]);
        let declared = BlobRef::from_bytes(b"declared");
        let err = store
            .receive(&declared, bytes_stream(Bytes::from_static(b"actual")))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::CorruptBlob { .. }));
        assert_eq!(sweep_temp_files(dir.path()).unwrap(), 0);
    }

    #[tokio::test]
    async fn startup_sweep_removes_orphan_temps() {
        let dir = TempDir::new().unwrap();
        let orphan_dir = dir.path().join("sha1").join("2aa").join("e6c");
        std::fs::create_dir_all(&orphan_dir).unwrap();
        let orphan = orphan_dir.join("sha1-2aae6c35c94fcfb415dbe95f408b9ce91ee846ed.dat.tmp-deadbeef");
        std::fs::write(&orphan, b"partial").unwrap();

        let _store = store_at(&dir, &[]);
        assert!(!orphan.exists());
    }

    #[tokio::test]
    async fn concurrent_receives_of_one_blob_both_succeed() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(store_at(&dir, &[]));
        let data = Bytes::from(vec![7u8; 512 * 1024]);
        let r = BlobRef::from_bytes(&data);

        let mut handles = Vec::new();
        for _ in 0..4 {
            let store = store.clone();
            let r = r.clone();
            let data = data.clone();
            handles.push(tokio::spawn(async move {
                store.receive(&r, bytes_stream(data)).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(store.stat(&r).await.unwrap(), data.len() as u64);
        assert_eq!(sweep_temp_files(dir.path()).unwrap(), 0);
    }

    #[tokio::test]
    async fn quiesce_blocks_receives_until_stop() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(store_at(&dir, &[]));
        World::start(store.as_ref()).await.unwrap();

        let blocked = {
            let store = store.clone();
            tokio::spawn(async move {
                let data = Bytes::from_static(b"blocked write");
                let r = BlobRef::from_bytes(&data);
                store.receive(&r, bytes_stream(data)).await
            })
        };
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!blocked.is_finished());

        World::stop(store.as_ref()).await.unwrap();
        blocked.await.unwrap().unwrap();
    }
}
