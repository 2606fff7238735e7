//! Shared types for Scatter.
//!
//! This crate defines the values that flow between the codec, the uploader
//! backends, the transfer engine and the gateway:
//! the chunk [`Manifest`], the externally exchanged [`ShareDescriptor`] and
//! its [`ShareKey`], transfer [`Progress`] and requested [`ByteRange`]s.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Current manifest format version.
pub const MANIFEST_VERSION: u8 = 1;

/// Current share code format version.
pub const SHARE_CODE_VERSION: u8 = 1;

/// Length of a [`ShareKey`] in bytes.
pub const KEY_LEN: usize = 32;

/// Default chunk size: 1 MiB.
pub const DEFAULT_CHUNK_SIZE: u32 = 1_048_576;

// ---------------------------------------------------------------------------
// Keys
// ---------------------------------------------------------------------------

/// Symmetric key used to seal every chunk (and the manifest) of one upload.
///
/// A fresh key is generated per upload and travels inside the share code.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShareKey([u8; KEY_LEN]);

impl ShareKey {
    /// Generate a random key.
    pub fn random() -> Self {
        use rand::RngCore;
        let mut bytes = [0u8; KEY_LEN];
        rand::rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Return the raw key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    /// Parse a key from a byte slice. Returns `None` on a length mismatch.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; KEY_LEN] = bytes.try_into().ok()?;
        Some(Self(arr))
    }
}

impl From<[u8; KEY_LEN]> for ShareKey {
    fn from(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for ShareKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

// Keys end up in logs through `?descriptor`; never print the material.
impl fmt::Debug for ShareKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ShareKey({}..)", &hex::encode(&self.0[..2]))
    }
}

// ---------------------------------------------------------------------------
// Manifest
// ---------------------------------------------------------------------------

/// Ordered list of chunk locators plus the metadata needed to reassemble
/// a file.
///
/// Invariant: `locators.len() == chunk_count(file_size, chunk_size)` and no
/// locator is empty. The manifest is itself sealed and stored as one more
/// blob through the uploader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    /// Format version the manifest was decoded from (or will be encoded as).
    pub version: u8,
    /// Size of every chunk except possibly the last.
    pub chunk_size: u32,
    /// Total size of the original file in bytes.
    pub file_size: u64,
    /// Chunk locators in index order.
    pub locators: Vec<String>,
}

impl Manifest {
    /// Length in bytes of the chunk at `index`.
    pub fn chunk_len(&self, index: usize) -> u64 {
        let start = index as u64 * self.chunk_size as u64;
        self.file_size
            .saturating_sub(start)
            .min(self.chunk_size as u64)
    }
}

/// Number of chunks a file of `file_size` bytes splits into.
///
/// Zero-length files have zero chunks.
pub fn chunk_count(file_size: u64, chunk_size: u32) -> usize {
    if chunk_size == 0 {
        return 0;
    }
    file_size.div_ceil(chunk_size as u64) as usize
}

// ---------------------------------------------------------------------------
// Share descriptor
// ---------------------------------------------------------------------------

/// Everything needed to locate and unseal a shared file.
///
/// This is the only value exchanged between users; its textual form is the
/// share code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareDescriptor {
    /// Original file name.
    pub file_name: String,
    /// Original file size in bytes.
    pub file_size: u64,
    /// Size of the decoy head prepended to every stored blob.
    pub head_size: u32,
    /// Locator of the stored manifest blob.
    pub url: String,
    /// Key that seals every blob of this file.
    pub key: ShareKey,
    /// Referer hint the backend expects on reads.
    pub referer: String,
}

// ---------------------------------------------------------------------------
// Progress and ranges
// ---------------------------------------------------------------------------

/// Bytes transferred so far out of a known total.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    /// Bytes completed.
    pub done: u64,
    /// Total bytes expected.
    pub total: u64,
}

impl Progress {
    /// Fraction complete in `[0.0, 1.0]`. An empty transfer counts as done.
    pub fn ratio(&self) -> f64 {
        if self.total == 0 {
            return 1.0;
        }
        self.done as f64 / self.total as f64
    }
}

/// Half-open byte range `[start, end)` within a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    /// First byte included.
    pub start: u64,
    /// First byte excluded.
    pub end: u64,
}

impl ByteRange {
    /// The whole of a file of `size` bytes.
    pub fn full(size: u64) -> Self {
        Self { start: 0, end: size }
    }

    /// Number of bytes covered.
    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    /// Whether the range covers no bytes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
