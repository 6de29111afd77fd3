use std::io;

pub type StoreResult<T, E = StoreError> = std::result::Result<T, E>;

/// Failure taxonomy shared by every storage implementation and handler.
///
/// Batch operations report per-item failures inline and never abort sibling
/// items; only whole-request failures surface as a bare `StoreError`.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("blob not found")]
    NotFound,

    #[error("unsupported hash function: {0}")]
    UnsupportedHash(String),

    #[error("corrupt blob: declared digest {declared}, computed {computed}")]
    CorruptBlob { declared: String, computed: String },

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("operation cancelled")]
    Cancelled,

    // Reserved: blobs are immutable, so this should not occur in practice.
    #[error("conflict")]
    Conflict,
}

impl StoreError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn other(msg: impl Into<String>) -> Self {
        Self::Io(io::Error::other(msg.into()))
    }

    /// True for failures a sync pass may retry on its next iteration.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_) | Self::NotFound)
    }
}

impl From<StoreError> for io::Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Io(e) => e,
            StoreError::Cancelled => io::Error::new(io::ErrorKind::Interrupted, err.to_string()),
            StoreError::NotFound => io::Error::new(io::ErrorKind::NotFound, err.to_string()),
            other => io::Error::other(other.to_string()),
        }
    }
}
