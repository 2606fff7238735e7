//! Error types for manifest, share code and blob decoding.

/// Errors produced when bytes or text do not decode into a valid value.
///
/// None of these are retryable: the same input always fails the same way.
#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The input was cut short.
    #[error("truncated {0}")]
    Truncated(&'static str),

    /// The input declares a format version this build cannot read.
    #[error("unsupported format version {found}, this build supports version {supported}")]
    UnsupportedVersion {
        /// Version found in the input.
        found: u8,
        /// Version this build supports.
        supported: u8,
    },

    /// A decoded manifest violates its own invariants.
    #[error("inconsistent manifest: {0}")]
    Inconsistent(String),

    /// No share code could be found in the input text.
    #[error("unrecognized share code")]
    UnrecognizedShareCode,

    /// A share code field is missing or malformed.
    #[error("invalid share code field `{field}`: {reason}")]
    InvalidField {
        /// Field name.
        field: &'static str,
        /// What was wrong with it.
        reason: String,
    },

    /// The compact share code checksum does not match its body.
    #[error("share code checksum mismatch")]
    Checksum,

    /// A stored blob is too short to contain its head and sealed payload.
    #[error("blob too short: need at least {needed} bytes, got {actual}")]
    BlobTooShort {
        /// Minimum length for the given head size.
        needed: usize,
        /// Actual blob length.
        actual: usize,
    },

    /// A blob failed authentication (wrong key or corrupted bytes).
    #[error("blob failed authentication")]
    Corrupt,
}
