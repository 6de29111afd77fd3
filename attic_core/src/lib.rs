//! Core attic protocol types and traits.
//!
//! This crate defines the shared types and traits used by all attic crates.
//!
//! ## Protocol types (wire-stable)
//!
//! The following modules define on-the-wire formats that are intended to be
//! stable:
//!
//! - Blob references (`blobref::BlobRef`, `blobref::SizedBlobRef`)
//! - Partition names (`partition::Partition`)
//! - JSON bodies of the blob-server protocol (`protocol`)
//!
//! These types are used directly in network protocols and on-disk layouts;
//! changes to them are considered protocol changes.
//!
//! ## Convenience APIs (non-wire)
//!
//! In addition, this crate exposes abstractions that build on the protocol
//! types but are not themselves part of the on-the-wire format:
//!
//! - The storage contract (`store::Storage`, `store::Capabilities`)
//! - The error taxonomy (`error::StoreError`)
//! - The garbage-collector collaborator contract (`gc`)
//!
//! These are provided for ergonomics and may evolve more freely without
//! affecting the wire protocol.

pub mod blobref;
pub mod digest;
pub mod error;
pub mod gc;
pub mod partition;
pub mod protocol;
pub mod store;

#[cfg(feature = "testutil")]
pub mod testutil;

// --- Core Public Surface ---

// Blob references
pub use blobref::{BlobRef, SizedBlobRef};

// Hash registry
pub use digest::{Digester, HashFn};

// Errors
pub use error::{StoreError, StoreResult};

// Partitions
pub use partition::Partition;

// Storage contract
pub use store::{ByteStream, Capabilities, RefStream, Storage};
