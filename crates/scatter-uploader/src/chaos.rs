//! An [`Uploader`] wrapper that injects random latency and transient failures.
//!
//! `ChaosUploader` wraps any `Arc<dyn Uploader>`, sleeps for a random
//! duration before each store or read, and fails a configurable fraction of
//! calls with [`UploaderError::Transient`]. The RNG is seeded for
//! deterministic, reproducible behaviour across test runs.
//!
//! # Example
//!
//! ```ignore
//! let chaos = ChaosUploader::new(inner)
//!     .read_latency(5, 20)      // 5–20 ms per read
//!     .store_latency(10, 30)    // 10–30 ms per store
//!     .failure_rate(0.1)        // 10% of calls fail transiently
//!     .seed(42);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::trace;

use crate::error::UploaderError;
use crate::traits::Uploader;

/// An [`Uploader`] wrapper that injects latency and transient failures.
///
/// Random latency reorders completions of concurrent calls, which surfaces
/// ordering bugs an instant in-memory backend hides.
pub struct ChaosUploader {
    inner: Arc<dyn Uploader>,
    store_latency_ms: (u64, u64),
    read_latency_ms: (u64, u64),
    store_failure_rate: f64,
    read_failure_rate: f64,
    rng: Mutex<StdRng>,
    store_calls: AtomicU64,
    read_calls: AtomicU64,
    injected_failures: AtomicU64,
}

impl ChaosUploader {
    /// Wrap an existing uploader as a pass-through by default.
    pub fn new(inner: Arc<dyn Uploader>) -> Self {
        Self {
            inner,
            store_latency_ms: (0, 0),
            read_latency_ms: (0, 0),
            store_failure_rate: 0.0,
            read_failure_rate: 0.0,
            rng: Mutex::new(StdRng::seed_from_u64(0)),
            store_calls: AtomicU64::new(0),
            read_calls: AtomicU64::new(0),
            injected_failures: AtomicU64::new(0),
        }
    }

    /// Set the store latency range in milliseconds (uniform random).
    pub fn store_latency(mut self, min_ms: u64, max_ms: u64) -> Self {
        self.store_latency_ms = (min_ms, max_ms);
        self
    }

    /// Set the read latency range in milliseconds (uniform random).
    pub fn read_latency(mut self, min_ms: u64, max_ms: u64) -> Self {
        self.read_latency_ms = (min_ms, max_ms);
        self
    }

    /// Fail this fraction of both stores and reads.
    pub fn failure_rate(self, rate: f64) -> Self {
        self.store_failure_rate(rate).read_failure_rate(rate)
    }

    /// Fail this fraction of stores.
    pub fn store_failure_rate(mut self, rate: f64) -> Self {
        self.store_failure_rate = rate.clamp(0.0, 1.0);
        self
    }

    /// Fail this fraction of reads.
    pub fn read_failure_rate(mut self, rate: f64) -> Self {
        self.read_failure_rate = rate.clamp(0.0, 1.0);
        self
    }

    /// Set the RNG seed for deterministic behaviour.
    pub fn seed(self, seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            ..self
        }
    }

    /// Number of `store` calls received, including failed ones.
    pub fn store_calls(&self) -> u64 {
        self.store_calls.load(Ordering::Relaxed)
    }

    /// Number of `read` calls received, including failed ones.
    pub fn read_calls(&self) -> u64 {
        self.read_calls.load(Ordering::Relaxed)
    }

    /// Number of calls failed on purpose.
    pub fn injected_failures(&self) -> u64 {
        self.injected_failures.load(Ordering::Relaxed)
    }

    /// Draw a latency in `[min, max]` and whether this call should fail.
    fn roll(&self, range: (u64, u64), failure_rate: f64) -> (u64, bool) {
        let (min, max) = range;
        let mut rng = self.rng.lock().expect("lock poisoned");
        let ms = if max == 0 || min >= max {
            min.min(max)
        } else {
            rng.random_range(min..=max)
        };
        let fail = failure_rate > 0.0 && rng.random_bool(failure_rate);
        (ms, fail)
    }

    async fn disturb(
        &self,
        range: (u64, u64),
        failure_rate: f64,
        op: &str,
    ) -> Result<(), UploaderError> {
        let (ms, fail) = self.roll(range, failure_rate);
        if ms > 0 {
            tokio::time::sleep(tokio::time::Duration::from_millis(ms)).await;
        }
        if fail {
            self.injected_failures.fetch_add(1, Ordering::Relaxed);
            trace!(op, "injecting transient failure");
            return Err(UploaderError::Transient(format!("injected {op} failure")));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Uploader for ChaosUploader {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn referer(&self) -> &str {
        self.inner.referer()
    }

    fn chunk_size(&self) -> u32 {
        self.inner.chunk_size()
    }

    async fn gen_head(&self) -> Result<Bytes, UploaderError> {
        self.inner.gen_head().await
    }

    async fn store(&self, data: Bytes) -> Result<String, UploaderError> {
        self.store_calls.fetch_add(1, Ordering::Relaxed);
        self.disturb(self.store_latency_ms, self.store_failure_rate, "store")
            .await?;
        self.inner.store(data).await
    }

    async fn read(&self, locator: &str) -> Result<Bytes, UploaderError> {
        self.read_calls.fetch_add(1, Ordering::Relaxed);
        self.disturb(self.read_latency_ms, self.read_failure_rate, "read")
            .await?;
        self.inner.read(locator).await
    }
}
