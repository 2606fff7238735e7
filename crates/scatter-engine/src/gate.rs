//! Concurrency gate whose capacity follows [`TransferSettings`].
//!
//! A plain semaphore fixes its permit count at creation. The gate instead
//! re-reads the configured task count every time a permit is requested, so
//! lowering or raising the count mid-transfer affects the next chunk that is
//! scheduled. Permits already handed out are never revoked.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Notify;

use crate::settings::TransferSettings;

/// Which task count bounds a gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Upload,
    Download,
}

/// Per-transfer concurrency gate.
pub struct Gate {
    settings: Arc<TransferSettings>,
    direction: Direction,
    in_flight: AtomicUsize,
    released: Notify,
}

/// A slot in a [`Gate`]. Released on drop.
pub struct GatePermit {
    gate: Arc<Gate>,
}

impl Gate {
    pub fn new(settings: Arc<TransferSettings>, direction: Direction) -> Arc<Self> {
        Arc::new(Self {
            settings,
            direction,
            in_flight: AtomicUsize::new(0),
            released: Notify::new(),
        })
    }

    /// Current capacity, read from the settings.
    pub fn capacity(&self) -> usize {
        match self.direction {
            Direction::Upload => self.settings.upload_task_count(),
            Direction::Download => self.settings.download_task_count(),
        }
    }

    /// Permits currently held.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Wait for a free slot.
    pub async fn acquire(self: &Arc<Self>) -> GatePermit {
        loop {
            // Register interest before checking, so a release or settings
            // change between the check and the await is not missed.
            let released = self.released.notified();
            let changed = self.settings.changed().notified();
            tokio::pin!(released);
            tokio::pin!(changed);
            released.as_mut().enable();
            changed.as_mut().enable();

            let current = self.in_flight.load(Ordering::SeqCst);
            if current < self.capacity() {
                if self
                    .in_flight
                    .compare_exchange(current, current + 1, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
                {
                    return GatePermit { gate: self.clone() };
                }
                continue;
            }

            tokio::select! {
                _ = &mut released => {}
                _ = &mut changed => {}
            }
        }
    }
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        self.gate.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.gate.released.notify_waiters();
    }
}
