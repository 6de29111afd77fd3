//! Blob references: the canonical `<hashName>-<hexDigest>` names of blobs.

use std::fmt;
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::digest::{Digester, HashFn};
use crate::error::{StoreError, StoreResult};

/// An immutable reference to a blob, e.g. `sha1-2aae6c35c94fcfb415dbe95f408b9ce91ee846ed`.
///
/// Equality, ordering and hashing are all by the canonical string, so
/// blobrefs are safe to share by value and to use as map keys. A blobref
/// whose hash function is structurally valid but not registered in
/// [`HashFn`] still parses; callers must check [`BlobRef::is_supported`]
/// before trusting its digest.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlobRef {
    canonical: Box<str>,
    dash: usize,
}

impl BlobRef {
    /// Parses a canonical blobref string.
    ///
    /// The string must match `^[a-z][a-z0-9]*-[0-9a-f]+$`. For a registered
    /// hash function the digest length must also be exact; unknown functions
    /// accept any non-empty hex digest and parse as unsupported.
    pub fn parse(s: &str) -> StoreResult<Self> {
        let dash = s
            .find('-')
            .ok_or_else(|| StoreError::bad_request(format!("invalid blobref {s:?}")))?;
        let (name, digest) = (&s[..dash], &s[dash + 1..]);

        let mut chars = name.chars();
        let head_ok = chars.next().is_some_and(|c| c.is_ascii_lowercase());
        let tail_ok = chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit());
        if !head_ok || !tail_ok {
            return Err(StoreError::bad_request(format!(
                "invalid hash name in blobref {s:?}"
            )));
        }

        let hex_ok = !digest.is_empty()
            && digest
                .chars()
                .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c));
        if !hex_ok {
            return Err(StoreError::bad_request(format!(
                "invalid digest in blobref {s:?}"
            )));
        }

        if let Some(func) = HashFn::by_name(name)
            && digest.len() != func.hex_len()
        {
            return Err(StoreError::bad_request(format!(
                "wrong digest length for {name}: got {}, want {}",
                digest.len(),
                func.hex_len()
            )));
        }

        Ok(Self {
            canonical: s.into(),
            dash,
        })
    }

    /// Hashes an in-memory byte slice with the default function.
    pub fn from_bytes(bytes: impl AsRef<[u8]>) -> Self {
        let mut digester = HashFn::Sha1.digester();
        digester.update(bytes.as_ref());
        Self::from_parts(HashFn::Sha1.name(), &digester.finalize_hex())
    }

    /// Streams a reader to completion, hashing with the default function.
    /// Returns the resulting blobref and the number of bytes consumed.
    pub async fn from_reader<R>(mut reader: R) -> StoreResult<(Self, u64)>
    where
        R: AsyncRead + Unpin,
    {
        let mut digester = HashFn::Sha1.digester();
        let mut size = 0u64;
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            digester.update(&buf[..n]);
            size += n as u64;
        }
        let r = Self::from_parts(HashFn::Sha1.name(), &digester.finalize_hex());
        Ok((r, size))
    }

    fn from_parts(name: &str, digest: &str) -> Self {
        Self {
            canonical: format!("{name}-{digest}").into(),
            dash: name.len(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.canonical
    }

    pub fn hash_name(&self) -> &str {
        &self.canonical[..self.dash]
    }

    /// The lowercase hex digest half of the reference.
    pub fn digest(&self) -> &str {
        &self.canonical[self.dash + 1..]
    }

    /// The registered hash function, if any.
    pub fn hash_fn(&self) -> Option<HashFn> {
        HashFn::by_name(self.hash_name())
    }

    pub fn is_supported(&self) -> bool {
        self.hash_fn().is_some()
    }

    /// Fresh digest state for this reference's hash function, or
    /// `UnsupportedHash` if the function is not registered.
    pub fn digester(&self) -> StoreResult<Digester> {
        self.hash_fn()
            .map(HashFn::digester)
            .ok_or_else(|| StoreError::UnsupportedHash(self.hash_name().to_owned()))
    }

    /// True if the finalized digest state equals this reference's digest.
    pub fn hash_matches(&self, digester: Digester) -> bool {
        digester.finalize_hex() == self.digest()
    }
}

impl fmt::Display for BlobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical)
    }
}

impl fmt::Debug for BlobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("BlobRef").field(&self.canonical).finish()
    }
}

impl FromStr for BlobRef {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BlobRef::parse(s)
    }
}

impl Serialize for BlobRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for BlobRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        BlobRef::parse(&s).map_err(D::Error::custom)
    }
}

/// A blobref paired with the blob's size in bytes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SizedBlobRef {
    #[serde(rename = "blobRef")]
    pub blob_ref: BlobRef,
    pub size: u64,
}

impl SizedBlobRef {
    pub fn new(blob_ref: BlobRef, size: u64) -> Self {
        Self { blob_ref, size }
    }
}

impl fmt::Display for SizedBlobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.blob_ref, self.size)
    }
}
