//! Transient-failure retry with capped exponential backoff.

use std::future::Future;
use std::time::Duration;

use backoff::future::retry_notify;
use backoff::ExponentialBackoffBuilder;

use crate::error::{ClientError, Result};

/// Backoff policy for external-service calls: quick first retry, capped
/// interval, bounded total time so an outage surfaces within an operator
/// iteration rather than stalling it.
fn retry_policy() -> backoff::ExponentialBackoff {
    ExponentialBackoffBuilder::new()
        .with_initial_interval(Duration::from_millis(250))
        .with_multiplier(2.0)
        .with_max_interval(Duration::from_secs(10))
        .with_max_elapsed_time(Some(Duration::from_secs(30)))
        .build()
}

/// Run `call` until it succeeds, returns a non-transient error, or the
/// retry budget is spent.
pub(crate) async fn retry_transient<T, F, Fut>(operation: &'static str, mut call: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    retry_notify(
        retry_policy(),
        || {
            let attempt = call();
            async move {
                attempt.await.map_err(|e| {
                    if e.is_transient() {
                        backoff::Error::transient(e)
                    } else {
                        backoff::Error::permanent(e)
                    }
                })
            }
        },
        |err, delay| {
            tracing::warn!(
                operation,
                error = %err,
                retry_in = ?delay,
                "transient failure, will retry"
            );
        },
    )
    .await
}

/// Classify a `reqwest` send error as transient.
pub(crate) fn transport_error(service: &'static str, err: &reqwest::Error) -> ClientError {
    ClientError::Transient {
        service,
        message: err.to_string(),
    }
}

/// Map a non-success response to an error: 5xx are transient, everything
/// else is terminal.
pub(crate) async fn status_error(
    service: &'static str,
    response: reqwest::Response,
) -> ClientError {
    let status = response.status();
    let message = response.text().await.unwrap_or_else(|_| status.to_string());
    if status.is_server_error() {
        ClientError::Transient { service, message }
    } else {
        ClientError::Status {
            service,
            status: status.as_u16(),
            message,
        }
    }
}
