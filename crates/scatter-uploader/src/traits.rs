//! Core trait for blob-hosting backends.

use bytes::Bytes;

use crate::error::UploaderError;

/// Smallest valid GIF (1x1, transparent). Prepended to every blob by default
/// so hosts that sniff content see an image.
pub static DEFAULT_HEAD: [u8; 43] = [
    0x47, 0x49, 0x46, 0x38, 0x39, 0x61, 0x01, 0x00, 0x01, 0x00, 0x80, 0x00, 0x00, 0x00, 0x00, 0x00,
    0xFF, 0xFF, 0xFF, 0x21, 0xF9, 0x04, 0x01, 0x00, 0x00, 0x00, 0x00, 0x2C, 0x00, 0x00, 0x00, 0x00,
    0x01, 0x00, 0x01, 0x00, 0x00, 0x02, 0x02, 0x44, 0x01, 0x00, 0x3B,
];

/// A third-party host that stores opaque blobs and hands back a locator.
///
/// All implementations must be `Send + Sync` for use across chunk tasks.
/// Locators are opaque to the engine: whatever `store` returns, `read` must
/// accept.
#[async_trait::async_trait]
pub trait Uploader: Send + Sync {
    /// Short backend name for logs and task listings.
    fn name(&self) -> &str;

    /// Referer the host expects on reads. Empty when none is needed.
    fn referer(&self) -> &str;

    /// Chunk size uploads through this backend should use.
    fn chunk_size(&self) -> u32;

    /// Produce the decoy head prepended to every stored blob.
    async fn gen_head(&self) -> Result<Bytes, UploaderError> {
        Ok(Bytes::from_static(&DEFAULT_HEAD))
    }

    /// Store a blob and return its locator.
    async fn store(&self, data: Bytes) -> Result<String, UploaderError>;

    /// Fetch the blob behind a locator.
    async fn read(&self, locator: &str) -> Result<Bytes, UploaderError>;
}
