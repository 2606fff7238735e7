//! TOML configuration for the Scatter daemon.
//!
//! Every section is optional; missing values fall back to the defaults
//! documented on each field.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use scatter_engine::SettingsSnapshot;
use scatter_types::DEFAULT_CHUNK_SIZE;
use scatter_uploader::{
    DirUploader, HttpMethod, HttpUploader, HttpUploaderConfig, MemoryUploader, Uploader,
};
use serde::Deserialize;

/// Top-level configuration, parsed from TOML.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Gateway address and access key.
    pub server: ServerSection,
    /// Live-tunable transfer settings (initial values).
    pub transfer: TransferSection,
    /// Blob hosting backend.
    pub uploader: UploaderSection,
    /// Share code rendering.
    pub share: ShareSection,
    /// Upload history persistence.
    pub history: HistorySection,
    /// Logging configuration.
    pub log: LogSection,
}

/// `[server]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// Address for the HTTP gateway.
    pub listen_addr: String,
    /// Required `accessKey` query value. Empty disables the check.
    pub access_key: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:4719".to_string(),
            access_key: String::new(),
        }
    }
}

/// `[transfer]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct TransferSection {
    /// Chunks stored concurrently per upload.
    pub upload_task_count: usize,
    /// Chunks fetched ahead per download.
    pub download_task_count: usize,
    /// Extra attempts per backend call before giving up.
    pub request_retry_count: u32,
    /// Base delay between attempts; attempt `n` waits `n` times this.
    pub retry_delay_ms: u64,
}

impl Default for TransferSection {
    fn default() -> Self {
        let defaults = SettingsSnapshot::default();
        Self {
            upload_task_count: defaults.upload_task_count,
            download_task_count: defaults.download_task_count,
            request_retry_count: defaults.request_retry_count,
            retry_delay_ms: defaults.retry_delay_ms,
        }
    }
}

impl TransferSection {
    pub fn snapshot(&self) -> SettingsSnapshot {
        SettingsSnapshot {
            upload_task_count: self.upload_task_count,
            download_task_count: self.download_task_count,
            request_retry_count: self.request_retry_count,
            retry_delay_ms: self.retry_delay_ms,
        }
    }
}

/// `[uploader]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct UploaderSection {
    /// Backend type: `"memory"` (default), `"dir"` or `"http"`.
    pub kind: String,
    /// Chunk size in bytes. Defaults to 1 MiB.
    pub chunk_size: Option<u32>,
    /// Referer sent on reads and recorded in share codes.
    pub referer: String,
    /// Blob directory for the `dir` backend.
    pub dir: PathBuf,
    /// Upload endpoint for the `http` backend.
    pub upload_url: String,
    /// `POST` or `PUT`.
    pub method: String,
    /// JSON pointer to the locator in the upload response. Empty means the
    /// whole body is the locator.
    pub locator_pointer: String,
    /// Largest blob the host accepts. 0 means unlimited.
    pub max_blob_size: usize,
    /// Per-request timeout for the `http` backend, in seconds.
    pub timeout_secs: u64,
}

impl Default for UploaderSection {
    fn default() -> Self {
        let dir = dirs::home_dir()
            .map(|h| h.join(".scatter").join("blobs"))
            .unwrap_or_else(|| PathBuf::from(".scatter/blobs"));
        Self {
            kind: "memory".to_string(),
            chunk_size: None,
            referer: String::new(),
            dir,
            upload_url: String::new(),
            method: "POST".to_string(),
            locator_pointer: String::new(),
            max_blob_size: 0,
            timeout_secs: 60,
        }
    }
}

/// `[share]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ShareSection {
    /// Emit compact `sc:` codes instead of the verbose URL form.
    pub compact: bool,
}

impl Default for ShareSection {
    fn default() -> Self {
        Self { compact: true }
    }
}

/// `[history]` section.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct HistorySection {
    /// JSON file the upload history is kept in. Unset keeps it in memory.
    pub path: Option<PathBuf>,
}

/// `[log]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LogSection {
    /// Log level filter (e.g. `"info"`, `"debug"`, `"warn"`).
    pub level: String,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl CliConfig {
    /// Load config from a TOML file, or use defaults if no path given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(p) => {
                let content = std::fs::read_to_string(p)
                    .with_context(|| format!("failed to read {}", p.display()))?;
                let config: CliConfig = toml::from_str(&content)?;
                Ok(config)
            }
            None => Ok(Self::default()),
        }
    }

    /// Parse config from a TOML string (used in tests).
    #[cfg(test)]
    pub fn from_toml(s: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(s)?)
    }

    /// Effective chunk size (config value or 1 MiB default).
    pub fn chunk_size(&self) -> u32 {
        self.uploader.chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE)
    }

    /// History file, if persistence is configured.
    pub fn history_path(&self) -> Option<&Path> {
        self.history
            .path
            .as_deref()
            .filter(|p| !p.as_os_str().is_empty())
    }

    /// Whether blobs vanish when the process exits.
    pub fn is_ephemeral(&self) -> bool {
        self.uploader.kind == "memory"
    }

    /// Build the configured backend.
    pub fn build_uploader(&self) -> anyhow::Result<Arc<dyn Uploader>> {
        let section = &self.uploader;
        let chunk_size = self.chunk_size();
        if chunk_size == 0 {
            bail!("uploader chunk_size must be positive");
        }
        let max_blob_size = (section.max_blob_size > 0).then_some(section.max_blob_size);

        let uploader: Arc<dyn Uploader> = match section.kind.as_str() {
            "memory" => {
                let mut memory = MemoryUploader::new(chunk_size).with_referer(&section.referer);
                if let Some(max) = max_blob_size {
                    memory = memory.with_max_blob_size(max);
                }
                Arc::new(memory)
            }
            "dir" => Arc::new(
                DirUploader::new(&section.dir, chunk_size).with_context(|| {
                    format!("failed to open blob directory {}", section.dir.display())
                })?,
            ),
            "http" => {
                let method: HttpMethod = section.method.parse().map_err(anyhow::Error::msg)?;
                Arc::new(
                    HttpUploader::new(HttpUploaderConfig {
                        upload_url: section.upload_url.clone(),
                        method,
                        locator_pointer: section.locator_pointer.clone(),
                        referer: section.referer.clone(),
                        chunk_size,
                        max_blob_size,
                        timeout: Duration::from_secs(section.timeout_secs.max(1)),
                    })
                    .context("invalid http uploader settings")?,
                )
            }
            other => bail!("unknown uploader kind: {other} (expected memory, dir or http)"),
        };
        Ok(uploader)
    }
}
