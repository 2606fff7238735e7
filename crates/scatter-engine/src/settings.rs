//! Live-tunable transfer settings.
//!
//! One [`TransferSettings`] is shared by every transfer of a process. Values
//! are read each time a chunk is scheduled, so a change takes effect for
//! chunks scheduled after it, including those of transfers already running.

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

/// Default concurrent chunk stores per upload.
pub const DEFAULT_UPLOAD_TASK_COUNT: usize = 10;

/// Default concurrent chunk fetches per download.
pub const DEFAULT_DOWNLOAD_TASK_COUNT: usize = 5;

/// Default retries per backend call.
pub const DEFAULT_REQUEST_RETRY_COUNT: u32 = 10;

/// Default base delay between retries.
pub const DEFAULT_RETRY_DELAY_MS: u64 = 100;

/// Concurrency and retry knobs shared by all transfers.
pub struct TransferSettings {
    upload_task_count: AtomicUsize,
    download_task_count: AtomicUsize,
    request_retry_count: AtomicU32,
    retry_delay_ms: AtomicU64,
    changed: Notify,
}

/// Plain copy of the settings, as exchanged with config and the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsSnapshot {
    pub upload_task_count: usize,
    pub download_task_count: usize,
    pub request_retry_count: u32,
    pub retry_delay_ms: u64,
}

/// Partial update; absent fields keep their current value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsUpdate {
    pub upload_task_count: Option<usize>,
    pub download_task_count: Option<usize>,
    pub request_retry_count: Option<u32>,
    pub retry_delay_ms: Option<u64>,
}

impl Default for SettingsSnapshot {
    fn default() -> Self {
        Self {
            upload_task_count: DEFAULT_UPLOAD_TASK_COUNT,
            download_task_count: DEFAULT_DOWNLOAD_TASK_COUNT,
            request_retry_count: DEFAULT_REQUEST_RETRY_COUNT,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
        }
    }
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self::from_snapshot(SettingsSnapshot::default())
    }
}

impl TransferSettings {
    /// Build settings from plain values. Task counts below 1 are raised to 1.
    pub fn from_snapshot(s: SettingsSnapshot) -> Self {
        Self {
            upload_task_count: AtomicUsize::new(s.upload_task_count.max(1)),
            download_task_count: AtomicUsize::new(s.download_task_count.max(1)),
            request_retry_count: AtomicU32::new(s.request_retry_count),
            retry_delay_ms: AtomicU64::new(s.retry_delay_ms),
            changed: Notify::new(),
        }
    }

    pub fn upload_task_count(&self) -> usize {
        self.upload_task_count.load(Ordering::Relaxed)
    }

    pub fn download_task_count(&self) -> usize {
        self.download_task_count.load(Ordering::Relaxed)
    }

    pub fn request_retry_count(&self) -> u32 {
        self.request_retry_count.load(Ordering::Relaxed)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms.load(Ordering::Relaxed))
    }

    pub fn set_upload_task_count(&self, n: usize) {
        self.upload_task_count.store(n.max(1), Ordering::Relaxed);
        self.changed.notify_waiters();
    }

    pub fn set_download_task_count(&self, n: usize) {
        self.download_task_count.store(n.max(1), Ordering::Relaxed);
        self.changed.notify_waiters();
    }

    pub fn set_request_retry_count(&self, n: u32) {
        self.request_retry_count.store(n, Ordering::Relaxed);
    }

    pub fn set_retry_delay(&self, delay: Duration) {
        self.retry_delay_ms
            .store(delay.as_millis() as u64, Ordering::Relaxed);
    }

    /// Apply a partial update.
    pub fn apply(&self, update: &SettingsUpdate) {
        if let Some(n) = update.upload_task_count {
            self.set_upload_task_count(n);
        }
        if let Some(n) = update.download_task_count {
            self.set_download_task_count(n);
        }
        if let Some(n) = update.request_retry_count {
            self.set_request_retry_count(n);
        }
        if let Some(ms) = update.retry_delay_ms {
            self.set_retry_delay(Duration::from_millis(ms));
        }
    }

    /// Current values.
    pub fn snapshot(&self) -> SettingsSnapshot {
        SettingsSnapshot {
            upload_task_count: self.upload_task_count(),
            download_task_count: self.download_task_count(),
            request_retry_count: self.request_retry_count(),
            retry_delay_ms: self.retry_delay_ms.load(Ordering::Relaxed),
        }
    }

    /// Wakes gates waiting on a task count when a count changes.
    pub(crate) fn changed(&self) -> &Notify {
        &self.changed
    }
}
