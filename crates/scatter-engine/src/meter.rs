//! Traffic accounting.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Receives the number of bytes physically moved to or from a backend.
pub trait TrafficMeter: Send + Sync {
    fn record_upload(&self, bytes: u64);
    fn record_download(&self, bytes: u64);
}

/// Atomic running totals.
#[derive(Debug, Default)]
pub struct TrafficCounter {
    uploaded: AtomicU64,
    downloaded: AtomicU64,
}

/// Point-in-time copy of a [`TrafficCounter`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TrafficTotals {
    pub uploaded: u64,
    pub downloaded: u64,
}

impl TrafficCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn totals(&self) -> TrafficTotals {
        TrafficTotals {
            uploaded: self.uploaded.load(Ordering::Relaxed),
            downloaded: self.downloaded.load(Ordering::Relaxed),
        }
    }
}

impl TrafficMeter for TrafficCounter {
    fn record_upload(&self, bytes: u64) {
        self.uploaded.fetch_add(bytes, Ordering::Relaxed);
    }

    fn record_download(&self, bytes: u64) {
        self.downloaded.fetch_add(bytes, Ordering::Relaxed);
    }
}
