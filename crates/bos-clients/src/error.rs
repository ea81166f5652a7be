//! Error types for the external-client layer.

use thiserror::Error;

/// A result type using `ClientError`.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors surfaced by external-service clients.
///
/// Per-component failures embedded in batch responses are not errors at
/// this level; those come back as data so operators can record them on
/// the affected components and keep going.
#[derive(Debug, Error)]
pub enum ClientError {
    /// A list-taking call was made with no components.
    #[error("{0} called with an empty component list")]
    EmptyComponentList(&'static str),

    /// Connectivity failure or 5xx that survived the retry budget.
    #[error("transient failure talking to {service}: {message}")]
    Transient {
        /// Which service failed.
        service: &'static str,
        /// Underlying failure text.
        message: String,
    },

    /// Terminal HTTP error (4xx other than 404-as-miss).
    #[error("{service} returned status {status}: {message}")]
    Status {
        /// Which service responded.
        service: &'static str,
        /// HTTP status code.
        status: u16,
        /// Response body or status text.
        message: String,
    },

    /// A response exceeded the configured size cap.
    #[error("{service} response exceeded {limit} bytes")]
    ResponseTooLarge {
        /// Which service responded.
        service: &'static str,
        /// The configured cap.
        limit: usize,
    },

    /// A response could not be decoded.
    #[error("failed to decode {service} response: {message}")]
    Decode {
        /// Which service responded.
        service: &'static str,
        /// Decode failure text.
        message: String,
    },
}

impl ClientError {
    /// True when retrying the call later may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}
