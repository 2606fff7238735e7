//! Upload engine.
//!
//! Reads the source one chunk window at a time, seals each window behind the
//! backend's head and stores it through the [`Uploader`] with up to
//! `upload_task_count` stores in flight. Once every chunk has a locator the
//! manifest is sealed and stored the same way, and its locator becomes the
//! share descriptor's url.

use std::sync::Arc;

use bytes::Bytes;
use scatter_codec::{Chunk, ChunkReader, encode_manifest, seal};
use scatter_types::{MANIFEST_VERSION, ShareDescriptor, ShareKey, chunk_count};
use scatter_uploader::Uploader;
use tokio::io::AsyncRead;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{TransferError, UploadError};
use crate::gate::{Direction, Gate};
use crate::meter::TrafficMeter;
use crate::retry::{RetryError, retry};
use crate::settings::TransferSettings;
use crate::task::TransferTask;

/// Uploads files through one backend.
#[derive(Clone)]
pub struct Uploads {
    uploader: Arc<dyn Uploader>,
    settings: Arc<TransferSettings>,
    meter: Arc<dyn TrafficMeter>,
}

/// Everything a chunk worker needs, shared by all workers of one upload.
struct StoreContext {
    uploader: Arc<dyn Uploader>,
    settings: Arc<TransferSettings>,
    meter: Arc<dyn TrafficMeter>,
    head: Bytes,
    key: ShareKey,
}

struct StoredChunk {
    index: usize,
    len: u64,
    locator: String,
}

impl Uploads {
    pub fn new(
        uploader: Arc<dyn Uploader>,
        settings: Arc<TransferSettings>,
        meter: Arc<dyn TrafficMeter>,
    ) -> Self {
        Self {
            uploader,
            settings,
            meter,
        }
    }

    /// Upload `file_size` bytes read from `source`.
    ///
    /// Progress is published on `task` after every stored chunk. On failure
    /// or cancellation the task is marked accordingly; on success the caller
    /// marks it completed once it has rendered the share code.
    pub async fn upload<R>(
        &self,
        source: R,
        file_name: &str,
        file_size: u64,
        task: &TransferTask,
    ) -> Result<ShareDescriptor, TransferError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let result = self.run(source, file_name, file_size, task).await;
        if let Err(e) = &result {
            warn!(file = file_name, error = %e, "upload failed");
            task.fail(e);
        }
        result
    }

    /// Upload an in-memory buffer.
    pub async fn upload_bytes(
        &self,
        data: Bytes,
        file_name: &str,
        task: &TransferTask,
    ) -> Result<ShareDescriptor, TransferError> {
        let size = data.len() as u64;
        self.upload(std::io::Cursor::new(data), file_name, size, task)
            .await
    }

    async fn run<R>(
        &self,
        source: R,
        file_name: &str,
        file_size: u64,
        task: &TransferTask,
    ) -> Result<ShareDescriptor, TransferError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let cancel = task.cancellation_token().clone();
        let head = self.uploader.gen_head().await.map_err(UploadError::Head)?;
        let chunk_size = self.uploader.chunk_size();
        let expected = chunk_count(file_size, chunk_size);

        info!(
            file = file_name,
            file_size,
            chunk_size,
            chunks = expected,
            backend = self.uploader.name(),
            "upload: starting"
        );

        let ctx = Arc::new(StoreContext {
            uploader: self.uploader.clone(),
            settings: self.settings.clone(),
            meter: self.meter.clone(),
            head,
            key: ShareKey::random(),
        });
        let gate = Gate::new(self.settings.clone(), Direction::Upload);
        let mut reader = ChunkReader::new(source, chunk_size);
        // Sized by what the source yields, never by the declared size.
        let mut slots: Vec<Option<String>> = Vec::new();
        // Dropping the set on any early return aborts every chunk in flight.
        let mut workers: JoinSet<Result<StoredChunk, TransferError>> = JoinSet::new();
        let mut done: u64 = 0;

        loop {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(TransferError::Cancelled),
                permit = gate.acquire() => permit,
            };

            // Fail fast: a worker that just freed this slot may have failed.
            while let Some(joined) = workers.try_join_next() {
                done += settle(joined, &mut slots)?;
                task.set_progress(done);
            }

            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(TransferError::Cancelled),
                chunk = reader.next_chunk() => chunk.map_err(UploadError::Read)?,
            };
            let Some(chunk) = chunk else {
                break;
            };

            if reader.offset() > file_size {
                return Err(UploadError::SizeMismatch {
                    expected: file_size,
                    actual: reader.offset(),
                }
                .into());
            }

            slots.push(None);
            let ctx = ctx.clone();
            let cancel = cancel.clone();
            workers.spawn(async move {
                let _permit = permit;
                store_chunk(&ctx, &cancel, chunk).await
            });
        }

        loop {
            let joined = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(TransferError::Cancelled),
                joined = workers.join_next() => joined,
            };
            let Some(joined) = joined else {
                break;
            };
            done += settle(joined, &mut slots)?;
            task.set_progress(done);
        }

        let missing = slots.iter().filter(|s| s.is_none()).count()
            + expected.saturating_sub(slots.len());
        if missing > 0 {
            return Err(UploadError::Incomplete { missing }.into());
        }
        if reader.offset() != file_size {
            return Err(UploadError::SizeMismatch {
                expected: file_size,
                actual: reader.offset(),
            }
            .into());
        }

        let locators: Vec<String> = slots.into_iter().flatten().collect();
        let manifest = encode_manifest(chunk_size, MANIFEST_VERSION, &locators, file_size)?;
        let blob = seal(&ctx.head, &ctx.key, &manifest)?;

        let uploader = &self.uploader;
        let sealed = &blob;
        let url = retry(&self.settings, &cancel, "store manifest", move || {
            uploader.store(sealed.clone())
        })
        .await
        .map_err(|e| match e {
            RetryError::Cancelled => TransferError::Cancelled,
            RetryError::Failed(source) => UploadError::ManifestFailed(source).into(),
        })?;
        self.meter.record_upload(blob.len() as u64);

        info!(file = file_name, %url, chunks = locators.len(), "upload: complete");

        Ok(ShareDescriptor {
            file_name: file_name.to_string(),
            file_size,
            head_size: ctx.head.len() as u32,
            url,
            key: ctx.key,
            referer: self.uploader.referer().to_string(),
        })
    }
}

/// Record a finished worker in its slot. Returns the plain bytes it stored.
fn settle(
    joined: Result<Result<StoredChunk, TransferError>, JoinError>,
    slots: &mut [Option<String>],
) -> Result<u64, TransferError> {
    let stored = joined.map_err(|e| TransferError::Internal(e.to_string()))??;
    let slot = slots
        .get_mut(stored.index)
        .ok_or_else(|| TransferError::Internal(format!("chunk index {} out of range", stored.index)))?;
    *slot = Some(stored.locator);
    Ok(stored.len)
}

async fn store_chunk(
    ctx: &StoreContext,
    cancel: &CancellationToken,
    chunk: Chunk,
) -> Result<StoredChunk, TransferError> {
    let blob = seal(&ctx.head, &ctx.key, &chunk.data)?;
    let uploader = &ctx.uploader;
    let sealed = &blob;
    let locator = retry(&ctx.settings, cancel, "store chunk", move || {
        uploader.store(sealed.clone())
    })
    .await
    .map_err(|e| match e {
        RetryError::Cancelled => TransferError::Cancelled,
        RetryError::Failed(source) => UploadError::ChunkFailed {
            index: chunk.index,
            source,
        }
        .into(),
    })?;

    ctx.meter.record_upload(blob.len() as u64);
    debug!(index = chunk.index, size = chunk.data.len(), %locator, "stored chunk");

    Ok(StoredChunk {
        index: chunk.index,
        len: chunk.data.len() as u64,
        locator,
    })
}
