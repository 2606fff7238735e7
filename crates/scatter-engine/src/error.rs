//! Error types for the transfer engine.

use scatter_codec::FormatError;
use scatter_uploader::UploaderError;

/// Errors returned by uploads and downloads.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    /// Malformed manifest or share code.
    #[error(transparent)]
    Format(#[from] FormatError),

    /// The upload could not be completed.
    #[error("upload failed: {0}")]
    Upload(#[from] UploadError),

    /// The download could not be completed.
    #[error("download failed: {0}")]
    Download(#[from] DownloadError),

    /// The transfer was cancelled before it finished.
    #[error("transfer cancelled")]
    Cancelled,

    /// A chunk worker panicked or was torn down unexpectedly.
    #[error("transfer worker failed: {0}")]
    Internal(String),
}

/// Upload-side failures.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    /// A chunk store failed permanently or ran out of retries.
    #[error("chunk {index} could not be stored: {source}")]
    ChunkFailed {
        index: usize,
        source: UploaderError,
    },

    /// The backend could not produce a blob head.
    #[error("blob head unavailable: {0}")]
    Head(#[source] UploaderError),

    /// The manifest blob could not be stored.
    #[error("manifest could not be stored: {0}")]
    ManifestFailed(#[source] UploaderError),

    /// Some chunks never got a locator.
    #[error("{missing} chunks were never stored")]
    Incomplete { missing: usize },

    /// The source did not yield the declared number of bytes.
    #[error("source yielded {actual} bytes, expected {expected}")]
    SizeMismatch { expected: u64, actual: u64 },

    /// Reading the source failed.
    #[error("failed reading source: {0}")]
    Read(#[from] std::io::Error),
}

/// Download-side failures.
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    /// The manifest blob could not be fetched.
    #[error("manifest could not be fetched: {0}")]
    ManifestFailed(#[source] UploaderError),

    /// A chunk could not be fetched within the retry budget.
    #[error("chunk {index} could not be fetched: {source}")]
    ChunkFailed {
        index: usize,
        source: UploaderError,
    },

    /// A blob was fetched but did not unseal to the expected bytes.
    #[error("{what} is corrupt: {source}")]
    Corrupt { what: String, source: FormatError },

    /// The manifest disagrees with the share code about the file size.
    #[error("manifest describes {actual} bytes, share code says {expected}")]
    SizeMismatch { expected: u64, actual: u64 },

    /// The requested range does not fit in the file.
    #[error("range {start}-{end} not satisfiable for {size} bytes")]
    RangeNotSatisfiable { start: u64, end: u64, size: u64 },

    /// Writing downloaded bytes to their destination failed.
    #[error("failed writing output: {0}")]
    Write(#[source] std::io::Error),
}

impl TransferError {
    /// Whether this error means the transfer was cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
