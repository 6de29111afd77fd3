//! Share-chain traversal: lets non-owners read a blob when they can prove
//! a path from a share blob to it.
//!
//! The first element of the `via` chain must be a JSON share blob whose
//! `target` is the next element (or the requested blob for a chain of
//! one). Every later element must contain the canonical string of its
//! successor byte-for-byte, the last one referencing the requested blob.

use attic_core::protocol::{AUTH_TYPE_HAVEREF, CAMLI_TYPE_SHARE, ShareBlob};
use attic_core::{BlobRef, StoreError, StoreResult, Storage, store};

/// Longest accepted `via` chain.
pub const MAX_CHAIN_DEPTH: usize = 10;

/// Largest blob the validator will fetch while walking a chain.
pub const MAX_SHARE_BLOB_SIZE: u64 = 64 * 1024;

/// Validates a `via` chain authorizing a read of `target`.
///
/// Returns `Unauthorized` for any defect in the chain itself; the caller
/// is expected to delay before answering so existence probing stays slow.
/// `UnsupportedHash` is reported as such.
pub async fn verify_chain(
    storage: &dyn Storage,
    via: &str,
    target: &BlobRef,
) -> StoreResult<()> {
    let chain = parse_chain(via)?;

    let share_bytes = fetch_bounded(storage, &chain[0]).await?;
    let share: ShareBlob =
        serde_json::from_slice(&share_bytes).map_err(|_| StoreError::Unauthorized)?;
    if share.camli_type != CAMLI_TYPE_SHARE || share.auth_type != AUTH_TYPE_HAVEREF {
        return Err(StoreError::Unauthorized);
    }
    let first_target = chain.get(1).unwrap_or(target);
    if share.target != *first_target {
        return Err(StoreError::Unauthorized);
    }

    // Each remaining link must provably reference its successor; the
    // last one must reference the requested blob.
    for (i, link) in chain.iter().enumerate().skip(1) {
        let next = chain.get(i + 1).unwrap_or(target);
        let payload = fetch_bounded(storage, link).await?;
        if !contains(&payload, next.as_str().as_bytes()) {
            return Err(StoreError::Unauthorized);
        }
    }
    Ok(())
}

fn parse_chain(via: &str) -> StoreResult<Vec<BlobRef>> {
    let mut chain = Vec::new();
    for part in via.split(',') {
        let link = BlobRef::parse(part).map_err(|_| StoreError::Unauthorized)?;
        if !link.is_supported() {
            return Err(StoreError::UnsupportedHash(link.hash_name().to_owned()));
        }
        chain.push(link);
    }
    if chain.is_empty() || chain.len() > MAX_CHAIN_DEPTH {
        return Err(StoreError::Unauthorized);
    }
    Ok(chain)
}

async fn fetch_bounded(storage: &dyn Storage, blob_ref: &BlobRef) -> StoreResult<bytes::Bytes> {
    let size = match storage.stat(blob_ref).await {
        Ok(size) => size,
        Err(err @ StoreError::UnsupportedHash(_)) => return Err(err),
        Err(_) => return Err(StoreError::Unauthorized),
    };
    if size > MAX_SHARE_BLOB_SIZE {
        return Err(StoreError::Unauthorized);
    }
    let stream = storage
        .open_read(blob_ref, 0, Some(MAX_SHARE_BLOB_SIZE))
        .await
        .map_err(|_| StoreError::Unauthorized)?;
    store::collect_bytes(stream, MAX_SHARE_BLOB_SIZE)
        .await
        .map_err(|_| StoreError::Unauthorized)
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    !needle.is_empty() && haystack.windows(needle.len()).any(|w| w == needle)
}
