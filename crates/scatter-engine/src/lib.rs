//! Chunked transfer engine for Scatter.
//!
//! The [`TransferEngine`] owns the active [`Uploader`], the live
//! [`TransferSettings`], the [`TaskRegistry`] and traffic totals, and exposes
//! the two pipelines:
//!
//! - [`Uploads`]: split, seal and store chunks concurrently, then publish a
//!   manifest and return the [`ShareDescriptor`](scatter_types::ShareDescriptor).
//! - [`Downloads`]: resolve a descriptor to its manifest and stream the
//!   file back in order with bounded read-ahead.
//!
//! Front ends (the HTTP gateway, the CLI) only talk to this crate.

pub mod download;
pub mod error;
pub mod gate;
pub mod meter;
mod retry;
pub mod settings;
pub mod task;
pub mod upload;

use std::sync::Arc;

use scatter_uploader::Uploader;

pub use download::{ChunkStream, Downloads, resolve};
pub use error::{DownloadError, TransferError, UploadError};
pub use gate::{Direction, Gate, GatePermit};
pub use meter::{TrafficCounter, TrafficMeter, TrafficTotals};
pub use settings::{SettingsSnapshot, SettingsUpdate, TransferSettings};
pub use task::{
    FINISHED_TASK_LIMIT, TaskKind, TaskOutcome, TaskRegistry, TaskRemoval, TaskSnapshot,
    TransferTask,
};
pub use upload::Uploads;

/// Everything a front end needs to run transfers against one backend.
pub struct TransferEngine {
    uploader: Arc<dyn Uploader>,
    settings: Arc<TransferSettings>,
    tasks: Arc<TaskRegistry>,
    traffic: Arc<TrafficCounter>,
    uploads: Uploads,
    downloads: Downloads,
}

impl TransferEngine {
    pub fn new(uploader: Arc<dyn Uploader>, settings: Arc<TransferSettings>) -> Self {
        let traffic = Arc::new(TrafficCounter::new());
        let meter: Arc<dyn TrafficMeter> = traffic.clone();
        Self {
            uploads: Uploads::new(uploader.clone(), settings.clone(), meter.clone()),
            downloads: Downloads::new(uploader.clone(), settings.clone(), meter),
            uploader,
            settings,
            tasks: Arc::new(TaskRegistry::new()),
            traffic,
        }
    }

    pub fn uploads(&self) -> &Uploads {
        &self.uploads
    }

    pub fn downloads(&self) -> &Downloads {
        &self.downloads
    }

    pub fn uploader(&self) -> &Arc<dyn Uploader> {
        &self.uploader
    }

    pub fn settings(&self) -> &Arc<TransferSettings> {
        &self.settings
    }

    pub fn tasks(&self) -> &Arc<TaskRegistry> {
        &self.tasks
    }

    /// Bytes moved to and from the backend so far.
    pub fn traffic(&self) -> TrafficTotals {
        self.traffic.totals()
    }
}

#[cfg(test)]
mod tests;
