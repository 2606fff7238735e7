//! In-memory uploader backend.

use std::collections::HashMap;
use std::sync::RwLock;

use bytes::Bytes;
use tracing::debug;

use crate::error::UploaderError;
use crate::traits::Uploader;

const LOCATOR_PREFIX: &str = "mem://";

/// In-process uploader backed by a `RwLock<HashMap>`.
///
/// Used by tests and by `serve --memory`. Blobs are content-addressed, so
/// storing the same bytes twice yields the same locator. Tracks total bytes
/// stored against an optional capacity and rejects blobs above an optional
/// per-blob limit.
pub struct MemoryUploader {
    blobs: RwLock<HashMap<String, Bytes>>,
    chunk_size: u32,
    referer: String,
    max_bytes: Option<u64>,
    max_blob_size: Option<usize>,
}

impl MemoryUploader {
    /// Create an unbounded in-memory uploader using `chunk_size` chunks.
    pub fn new(chunk_size: u32) -> Self {
        Self {
            blobs: RwLock::new(HashMap::new()),
            chunk_size,
            referer: String::new(),
            max_bytes: None,
            max_blob_size: None,
        }
    }

    /// Reject stores that would take the total above `max_bytes`.
    pub fn with_capacity(mut self, max_bytes: u64) -> Self {
        self.max_bytes = Some(max_bytes);
        self
    }

    /// Reject individual blobs larger than `max_blob_size`.
    pub fn with_max_blob_size(mut self, max_blob_size: usize) -> Self {
        self.max_blob_size = Some(max_blob_size);
        self
    }

    /// Set the referer reported to downloaders.
    pub fn with_referer(mut self, referer: impl Into<String>) -> Self {
        self.referer = referer.into();
        self
    }

    /// Number of blobs currently held.
    pub fn len(&self) -> usize {
        self.blobs.read().expect("lock poisoned").len()
    }

    /// Whether no blobs are held.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total bytes currently held.
    pub fn used_bytes(&self) -> u64 {
        Self::used_bytes_unlocked(&self.blobs.read().expect("lock poisoned"))
    }

    /// Whether a blob exists under `locator`.
    pub fn contains(&self, locator: &str) -> bool {
        self.blobs
            .read()
            .expect("lock poisoned")
            .contains_key(locator)
    }

    /// Drop the blob under `locator`, simulating a host losing data.
    pub fn remove(&self, locator: &str) -> Option<Bytes> {
        self.blobs.write().expect("lock poisoned").remove(locator)
    }

    /// Overwrite the blob under `locator` in place.
    pub fn replace(&self, locator: &str, data: Bytes) {
        self.blobs
            .write()
            .expect("lock poisoned")
            .insert(locator.to_string(), data);
    }

    /// Snapshot of every locator held.
    pub fn locators(&self) -> Vec<String> {
        self.blobs
            .read()
            .expect("lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    fn used_bytes_unlocked(map: &HashMap<String, Bytes>) -> u64 {
        map.values().map(|v| v.len() as u64).sum()
    }
}

#[async_trait::async_trait]
impl Uploader for MemoryUploader {
    fn name(&self) -> &str {
        "memory"
    }

    fn referer(&self) -> &str {
        &self.referer
    }

    fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    async fn store(&self, data: Bytes) -> Result<String, UploaderError> {
        if let Some(limit) = self.max_blob_size
            && data.len() > limit
        {
            return Err(UploaderError::Rejected(format!(
                "blob of {} bytes exceeds the {limit}-byte limit",
                data.len()
            )));
        }

        let locator = format!("{LOCATOR_PREFIX}{}", blake3::hash(&data).to_hex());
        let mut map = self.blobs.write().expect("lock poisoned");

        if let Some(max_bytes) = self.max_bytes {
            let used = Self::used_bytes_unlocked(&map);
            // Re-storing identical content takes no extra space.
            let existing_len = map.get(&locator).map_or(0, |v| v.len() as u64);
            let net_increase = (data.len() as u64).saturating_sub(existing_len);
            if used + net_increase > max_bytes {
                return Err(UploaderError::Rejected(format!(
                    "capacity exceeded: need {net_increase} bytes, only {} available",
                    max_bytes.saturating_sub(used)
                )));
            }
        }

        debug!(%locator, size = data.len(), "storing blob in memory");
        map.insert(locator.clone(), data);
        Ok(locator)
    }

    async fn read(&self, locator: &str) -> Result<Bytes, UploaderError> {
        let map = self.blobs.read().expect("lock poisoned");
        map.get(locator)
            .cloned()
            .ok_or_else(|| UploaderError::NotFound(locator.to_string()))
    }
}
