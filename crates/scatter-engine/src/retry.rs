//! Retry with linear backoff, raced against cancellation.

use std::future::Future;

use scatter_codec::FormatError;
use scatter_uploader::UploaderError;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::settings::TransferSettings;

/// Errors that know whether another attempt can help.
pub(crate) trait Retryable: std::fmt::Display {
    fn is_retryable(&self) -> bool;
}

impl Retryable for UploaderError {
    fn is_retryable(&self) -> bool {
        UploaderError::is_retryable(self)
    }
}

/// A failed fetch: either the backend call or unsealing what it returned.
#[derive(Debug)]
pub(crate) enum FetchError {
    Backend(UploaderError),
    Format(FormatError),
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Backend(e) => e.fmt(f),
            Self::Format(e) => e.fmt(f),
        }
    }
}

impl Retryable for FetchError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Backend(e) => e.is_retryable(),
            // A truncated or mangled body is worth fetching again.
            Self::Format(e) => matches!(e, FormatError::Corrupt | FormatError::BlobTooShort { .. }),
        }
    }
}

/// Why [`retry`] gave up.
#[derive(Debug)]
pub(crate) enum RetryError<E> {
    Cancelled,
    Failed(E),
}

/// Run `op` until it succeeds, fails permanently, or has been retried
/// `request_retry_count` times. Sleeps `retry_delay * attempt` between
/// attempts. Cancellation interrupts both the call and the sleep.
pub(crate) async fn retry<T, E, F, Fut>(
    settings: &TransferSettings,
    cancel: &CancellationToken,
    what: &str,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    E: Retryable,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt: u32 = 0;
    loop {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RetryError::Cancelled),
            r = op() => r,
        };

        let error = match result {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        attempt += 1;
        let budget = settings.request_retry_count();
        if !error.is_retryable() || attempt > budget {
            return Err(RetryError::Failed(error));
        }

        warn!(what, attempt, budget, error = %error, "backend call failed, retrying");
        let delay = settings.retry_delay() * attempt;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RetryError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
