//! Registry of hash functions the store can compute.
//!
//! Blobrefs name their hash function by a lowercase ASCII identifier. The
//! registry is deliberately open: a blobref whose function is absent here
//! still parses, but any attempt to read or verify its bytes fails with
//! `StoreError::UnsupportedHash`.

use sha1::{Digest, Sha1};

/// A hash function the store knows how to compute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashFn {
    Sha1,
}

impl HashFn {
    /// Looks up a function by its blobref name, e.g. `"sha1"`.
    pub fn by_name(name: &str) -> Option<Self> {
        match name {
            "sha1" => Some(Self::Sha1),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Sha1 => "sha1",
        }
    }

    /// Length of the lowercase hex digest this function produces.
    pub fn hex_len(self) -> usize {
        match self {
            Self::Sha1 => 40,
        }
    }

    /// Fresh incremental digest state.
    pub fn digester(self) -> Digester {
        match self {
            Self::Sha1 => Digester::Sha1(Sha1::new()),
        }
    }
}

/// Incremental digest state for a supported hash function.
pub enum Digester {
    Sha1(Sha1),
}

impl Digester {
    pub fn update(&mut self, bytes: &[u8]) {
        match self {
            Self::Sha1(h) => h.update(bytes),
        }
    }

    /// Consumes the state and returns the lowercase hex digest.
    pub fn finalize_hex(self) -> String {
        match self {
            Self::Sha1(h) => hex::encode(h.finalize()),
        }
    }
}
