//! Upload history.
//!
//! Every gateway upload made with `add=true` is recorded as a
//! [`HistoryEntry`]. The newest [`HISTORY_LIMIT`] entries are kept, and when
//! a path is configured the list is rewritten as JSON after each addition
//! (temp file then rename, so a crash never leaves a half-written file).

use std::collections::VecDeque;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Maximum number of entries kept.
pub const HISTORY_LIMIT: usize = 1000;

/// One uploaded file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    /// Share code of the file.
    pub share_info_data: String,
    pub name: String,
    pub size: u64,
}

/// Bounded, optionally persisted list of uploads, oldest first.
pub struct History {
    entries: RwLock<VecDeque<HistoryEntry>>,
    path: Option<PathBuf>,
    write_lock: Mutex<()>,
}

impl History {
    /// A history that lives only as long as the process.
    pub fn in_memory() -> Self {
        Self {
            entries: RwLock::new(VecDeque::new()),
            path: None,
            write_lock: Mutex::new(()),
        }
    }

    /// Load the history stored at `path`. A missing file starts empty.
    pub async fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let mut entries = match tokio::fs::read(&path).await {
            Ok(raw) => serde_json::from_slice::<VecDeque<HistoryEntry>>(&raw)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => VecDeque::new(),
            Err(e) => return Err(e),
        };
        while entries.len() > HISTORY_LIMIT {
            entries.pop_front();
        }
        info!(path = %path.display(), entries = entries.len(), "loaded upload history");

        Ok(Self {
            entries: RwLock::new(entries),
            path: Some(path),
            write_lock: Mutex::new(()),
        })
    }

    /// Record an upload, evicting the oldest entry past the limit.
    pub async fn add(&self, entry: HistoryEntry) -> io::Result<()> {
        // Held across the write so files land in the order entries were added.
        let _write = self.write_lock.lock().await;
        let snapshot = {
            let mut entries = self.entries.write().expect("lock poisoned");
            entries.push_back(entry);
            while entries.len() > HISTORY_LIMIT {
                entries.pop_front();
            }
            self.path.as_ref().map(|_| entries.clone())
        };

        if let (Some(path), Some(entries)) = (&self.path, snapshot) {
            persist(path, &entries).await?;
            debug!(path = %path.display(), entries = entries.len(), "saved upload history");
        }
        Ok(())
    }

    /// All entries, newest first.
    pub fn list(&self) -> Vec<HistoryEntry> {
        self.entries
            .read()
            .expect("lock poisoned")
            .iter()
            .rev()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

async fn persist(path: &Path, entries: &VecDeque<HistoryEntry>) -> io::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent).await?;
    }
    let json = serde_json::to_vec(entries).map_err(io::Error::other)?;
    let tmp_path = path.with_extension("tmp");
    tokio::fs::write(&tmp_path, &json).await?;
    tokio::fs::rename(&tmp_path, path).await
}
