//! Error types for the storage layer.

use thiserror::Error;

/// A result type using `StoreError`.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested record was not found.
    #[error("record not found")]
    NotFound,

    /// The underlying database failed or is unavailable.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Encoding or decoding a stored record failed.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    /// True when the operation may succeed if simply retried later.
    ///
    /// Operators sleep until their next iteration on these instead of
    /// surfacing a failure.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}
