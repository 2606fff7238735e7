//! Error types for uploader backends.

/// Errors returned by an [`Uploader`](crate::Uploader).
#[derive(Debug, thiserror::Error)]
pub enum UploaderError {
    /// A failure that may succeed on a later attempt (timeouts, 5xx, throttling).
    #[error("transient backend failure: {0}")]
    Transient(String),

    /// The backend refused the blob and will keep refusing it.
    #[error("backend rejected blob: {0}")]
    Rejected(String),

    /// No blob exists under the given locator.
    #[error("blob not found: {0}")]
    NotFound(String),

    /// An I/O error occurred.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// An HTTP-level failure that is neither clearly transient nor a rejection.
    #[error("http error: {0}")]
    Http(String),
}

impl UploaderError {
    /// Whether retrying the same call can help.
    ///
    /// Everything except [`UploaderError::Rejected`] is retried; a missing
    /// blob on a freshly written host is often only a propagation delay.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Rejected(_))
    }
}
