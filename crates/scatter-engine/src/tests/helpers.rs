//! Shared test utilities for scatter-engine tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use scatter_codec::{decode_manifest, unseal};
use scatter_types::{Manifest, ShareDescriptor};
use scatter_uploader::{MemoryUploader, Uploader, UploaderError};

use crate::settings::{SettingsSnapshot, TransferSettings};
use crate::task::{TaskKind, TransferTask};

/// Generate deterministic, non-repeating test data.
pub fn test_data(size: usize) -> Vec<u8> {
    let mut data = Vec::with_capacity(size);
    let mut state: u32 = 0xDEAD_BEEF;
    for _ in 0..size {
        state = state.wrapping_mul(1103515245).wrapping_add(12345);
        data.push((state >> 16) as u8);
    }
    data
}

/// Settings with fast retries.
pub fn settings(upload: usize, download: usize, retries: u32) -> Arc<TransferSettings> {
    Arc::new(TransferSettings::from_snapshot(SettingsSnapshot {
        upload_task_count: upload,
        download_task_count: download,
        request_retry_count: retries,
        retry_delay_ms: 1,
    }))
}

pub fn upload_task(size: u64) -> Arc<TransferTask> {
    TransferTask::detached(TaskKind::Upload, "test.bin", size)
}

pub fn download_task(size: u64) -> Arc<TransferTask> {
    TransferTask::detached(TaskKind::Download, "test.bin", size)
}

/// Fetch and decode the manifest behind a descriptor, bypassing the engine.
pub async fn read_manifest(uploader: &dyn Uploader, d: &ShareDescriptor) -> Manifest {
    let blob = uploader.read(&d.url).await.unwrap();
    let plain = unseal(&blob, d.head_size as usize, &d.key).unwrap();
    decode_manifest(&plain).unwrap()
}

/// Poll `cond` every few milliseconds until it holds or five seconds pass.
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Memory-backed uploader with scripted misbehaviour and call accounting.
pub struct ScriptedUploader {
    pub inner: MemoryUploader,
    store_calls: AtomicUsize,
    read_calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    reject_store: Option<usize>,
    hold_stores_from: Option<usize>,
    store_delay: Duration,
    read_delay: Duration,
}

struct Flight<'a>(&'a AtomicUsize);

impl Drop for Flight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ScriptedUploader {
    pub fn new(chunk_size: u32) -> Self {
        Self {
            inner: MemoryUploader::new(chunk_size),
            store_calls: AtomicUsize::new(0),
            read_calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            reject_store: None,
            hold_stores_from: None,
            store_delay: Duration::ZERO,
            read_delay: Duration::ZERO,
        }
    }

    /// Permanently reject the store call with this 0-based number.
    pub fn reject_store(mut self, call: usize) -> Self {
        self.reject_store = Some(call);
        self
    }

    /// Store calls from this 0-based number on never complete.
    pub fn hold_stores_from(mut self, call: usize) -> Self {
        self.hold_stores_from = Some(call);
        self
    }

    pub fn store_delay(mut self, ms: u64) -> Self {
        self.store_delay = Duration::from_millis(ms);
        self
    }

    pub fn read_delay(mut self, ms: u64) -> Self {
        self.read_delay = Duration::from_millis(ms);
        self
    }

    pub fn store_calls(&self) -> usize {
        self.store_calls.load(Ordering::SeqCst)
    }

    pub fn read_calls(&self) -> usize {
        self.read_calls.load(Ordering::SeqCst)
    }

    /// Highest number of calls that were in progress at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn reset_max_in_flight(&self) {
        self.max_in_flight.store(0, Ordering::SeqCst);
    }

    fn enter(&self) -> Flight<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        Flight(&self.in_flight)
    }
}

#[async_trait::async_trait]
impl Uploader for ScriptedUploader {
    fn name(&self) -> &str {
        "scripted"
    }

    fn referer(&self) -> &str {
        "https://scripted.example/"
    }

    fn chunk_size(&self) -> u32 {
        self.inner.chunk_size()
    }

    async fn store(&self, data: Bytes) -> Result<String, UploaderError> {
        let call = self.store_calls.fetch_add(1, Ordering::SeqCst);
        let _flight = self.enter();

        if self.reject_store == Some(call) {
            return Err(UploaderError::Rejected(format!("store call {call} refused")));
        }
        if let Some(from) = self.hold_stores_from
            && call >= from
        {
            std::future::pending::<()>().await;
        }
        if !self.store_delay.is_zero() {
            tokio::time::sleep(self.store_delay).await;
        }
        self.inner.store(data).await
    }

    async fn read(&self, locator: &str) -> Result<Bytes, UploaderError> {
        self.read_calls.fetch_add(1, Ordering::SeqCst);
        let _flight = self.enter();

        if !self.read_delay.is_zero() {
            tokio::time::sleep(self.read_delay).await;
        }
        self.inner.read(locator).await
    }
}
