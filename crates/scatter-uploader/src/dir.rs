//! Directory-backed uploader.
//!
//! Stores one file per blob with a 2-level fan-out directory structure:
//! `{base_dir}/{hex[0..2]}/{hex[2..4]}/{hex}`, where `hex` is the BLAKE3 hash
//! of the blob and doubles as its locator.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use tracing::{debug, error};

use crate::error::UploaderError;
use crate::traits::Uploader;

/// Content-addressed uploader writing blobs under a local directory.
///
/// Writes are atomic: data goes to a temporary file first, then is renamed
/// into place, so a crash never leaves a half-written blob behind a locator.
pub struct DirUploader {
    base_dir: PathBuf,
    chunk_size: u32,
}

impl DirUploader {
    /// Create an uploader rooted at the given directory.
    ///
    /// The directory is created if it does not exist.
    pub fn new(base_dir: impl AsRef<Path>, chunk_size: u32) -> Result<Self, UploaderError> {
        let base_dir = base_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&base_dir)?;
        Ok(Self {
            base_dir,
            chunk_size,
        })
    }

    /// Root directory blobs are written under.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Full file path for a locator. `None` if the locator is not a blob hash,
    /// which also keeps foreign locators from escaping the base directory.
    fn blob_path(&self, locator: &str) -> Option<PathBuf> {
        if locator.len() != 64 || !locator.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        Some(
            self.base_dir
                .join(&locator[0..2])
                .join(&locator[2..4])
                .join(locator),
        )
    }
}

#[async_trait::async_trait]
impl Uploader for DirUploader {
    fn name(&self) -> &str {
        "dir"
    }

    fn referer(&self) -> &str {
        ""
    }

    fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    async fn store(&self, data: Bytes) -> Result<String, UploaderError> {
        let locator = blake3::hash(&data).to_hex().to_string();
        let path = self
            .blob_path(&locator)
            .ok_or_else(|| UploaderError::Rejected(locator.clone()))?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Concurrent stores of identical content must not share a temp file.
        let tmp_path = path.with_extension(format!("tmp{:08x}", rand::random::<u32>()));
        tokio::fs::write(&tmp_path, &data).await?;
        tokio::fs::rename(&tmp_path, &path).await?;

        debug!(%locator, path = %path.display(), size = data.len(), "stored blob to file");
        Ok(locator)
    }

    async fn read(&self, locator: &str) -> Result<Bytes, UploaderError> {
        let path = self
            .blob_path(locator)
            .ok_or_else(|| UploaderError::NotFound(locator.to_string()))?;
        match tokio::fs::read(&path).await {
            Ok(data) => {
                // Verify-on-read: the locator is the content hash.
                let actual = blake3::hash(&data).to_hex();
                if actual.as_str() != locator {
                    error!(expected = %locator, %actual, "blob corruption detected on read");
                    return Err(UploaderError::Io(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        format!("blob {locator} does not match its hash"),
                    )));
                }
                Ok(Bytes::from(data))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(UploaderError::NotFound(locator.to_string()))
            }
            Err(e) => Err(UploaderError::Io(e)),
        }
    }
}
