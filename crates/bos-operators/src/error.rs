//! Error types for the operator layer.

use thiserror::Error;

/// A result type using `OperatorError`.
pub type Result<T> = std::result::Result<T, OperatorError>;

/// Errors an operator pass can surface.
///
/// These abort the current pass only; the driver logs them and runs the
/// next pass after the usual sleep. Per-component failures never become
/// an `OperatorError` — they are written to the component's `error`
/// field instead.
#[derive(Debug, Error)]
pub enum OperatorError {
    /// The store failed mid-pass.
    #[error(transparent)]
    Store(#[from] bos_store::StoreError),

    /// An external service failed beyond its retry budget.
    #[error(transparent)]
    Client(#[from] bos_clients::ClientError),
}
