use std::fmt;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{StoreError, StoreResult};

/// A named sub-namespace of the store.
///
/// The empty name is the default partition, where a blob's ground truth
/// lives. Every other partition is a queue of hard-linked replicas for
/// downstream processing; its name must match `[a-z0-9_]{1,50}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Partition(Box<str>);

impl Partition {
    pub const MAX_NAME_LEN: usize = 50;

    /// The default (main) partition.
    pub fn default_partition() -> Self {
        Self::default()
    }

    pub fn parse(name: &str) -> StoreResult<Self> {
        if name.is_empty() {
            return Ok(Self::default());
        }
        if name.len() > Self::MAX_NAME_LEN
            || !name
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        {
            return Err(StoreError::bad_request(format!(
                "invalid partition name {name:?}"
            )));
        }
        Ok(Self(name.into()))
    }

    pub fn name(&self) -> &str {
        &self.0
    }

    pub fn is_default(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_default() {
            f.write_str("<default>")
        } else {
            f.write_str(&self.0)
        }
    }
}

impl Serialize for Partition {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for Partition {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Partition::parse(&s).map_err(D::Error::custom)
    }
}
