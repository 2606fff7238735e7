//! Download engine.
//!
//! Resolves a share descriptor to its manifest, then streams the file back in
//! index order. A background scheduler keeps up to `download_task_count`
//! chunk fetches ahead of the consumer; a fetched chunk keeps its slot until
//! the consumer has taken it, so read-ahead is bounded by the task count
//! rather than by how fast the backend answers.

use std::ops::Range;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use futures::stream::{BoxStream, Stream, StreamExt};
use scatter_codec::{FormatError, decode_manifest, decode_share, unseal};
use scatter_types::{ByteRange, Manifest, ShareDescriptor, ShareKey};
use scatter_uploader::Uploader;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};
use tokio_util::task::AbortOnDropHandle;
use tracing::{debug, info, warn};

use crate::error::{DownloadError, TransferError};
use crate::gate::{Direction, Gate, GatePermit};
use crate::meter::TrafficMeter;
use crate::retry::{FetchError, RetryError, retry};
use crate::settings::TransferSettings;
use crate::task::TransferTask;

/// Parse a share code, verbose or compact, possibly embedded in other text.
pub fn resolve(share_code: &str) -> Result<ShareDescriptor, FormatError> {
    decode_share(share_code)
}

/// Downloads files through one backend.
#[derive(Clone)]
pub struct Downloads {
    uploader: Arc<dyn Uploader>,
    settings: Arc<TransferSettings>,
    meter: Arc<dyn TrafficMeter>,
}

/// Shared by the scheduler and every fetch of one download.
struct FetchContext {
    uploader: Arc<dyn Uploader>,
    settings: Arc<TransferSettings>,
    meter: Arc<dyn TrafficMeter>,
    key: ShareKey,
    head_size: usize,
    manifest: Manifest,
}

/// A fetch handed from the scheduler to the consumer, with its gate slot.
struct PendingChunk {
    index: usize,
    fetch: AbortOnDropHandle<Result<Bytes, TransferError>>,
    permit: GatePermit,
}

impl Downloads {
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

    /// Fetch, unseal and decode the manifest a descriptor points at.
    pub async fn fetch_manifest(
        &self,
        descriptor: &ShareDescriptor,
        cancel: &CancellationToken,
    ) -> Result<Manifest, TransferError> {
        let uploader = &self.uploader;
        let meter = &self.meter;
        let url = descriptor.url.as_str();
        let key = &descriptor.key;
        let head_size = descriptor.head_size as usize;

        let plain = retry(&self.settings, cancel, "fetch manifest", move || async move {
            let blob = uploader.read(url).await.map_err(FetchError::Backend)?;
            meter.record_download(blob.len() as u64);
            unseal(&blob, head_size, key).map_err(FetchError::Format)
        })
        .await
        .map_err(|e| match e {
            RetryError::Cancelled => TransferError::Cancelled,
            RetryError::Failed(FetchError::Backend(source)) => {
                DownloadError::ManifestFailed(source).into()
            }
            RetryError::Failed(FetchError::Format(source)) => DownloadError::Corrupt {
                what: "manifest".into(),
                source,
            }
            .into(),
        })?;

        Ok(decode_manifest(&plain)?)
    }

    /// Open an ordered stream over the file, or over `range` of it.
    ///
    /// `task` should have been created with the number of bytes the stream
    /// will yield as its total. The task is marked completed when the stream
    /// has yielded every byte, and failed or cancelled when it ends early.
    /// Dropping the stream stops all fetches.
    pub async fn open(
        &self,
        descriptor: &ShareDescriptor,
        range: Option<ByteRange>,
        task: Arc<TransferTask>,
    ) -> Result<ChunkStream, TransferError> {
        let result = self.start(descriptor, range, task.clone()).await;
        if let Err(e) = &result {
            warn!(file = %descriptor.file_name, error = %e, "download failed to start");
            task.fail(e);
        }
        result
    }

    async fn start(
        &self,
        descriptor: &ShareDescriptor,
        range: Option<ByteRange>,
        task: Arc<TransferTask>,
    ) -> Result<ChunkStream, TransferError> {
        // A child token, so dropping the stream stops this download without
        // marking the task itself cancelled.
        let cancel = task.cancellation_token().child_token();
        let manifest = self.fetch_manifest(descriptor, &cancel).await?;

        if manifest.file_size != descriptor.file_size {
            return Err(DownloadError::SizeMismatch {
                expected: descriptor.file_size,
                actual: manifest.file_size,
            }
            .into());
        }

        let file_size = manifest.file_size;
        let range = range.unwrap_or(ByteRange::full(file_size));
        if range.start > range.end || range.end > file_size {
            return Err(DownloadError::RangeNotSatisfiable {
                start: range.start,
                end: range.end,
                size: file_size,
            }
            .into());
        }

        let chunk_size = manifest.chunk_size as u64;
        let indices = if range.is_empty() {
            0..0
        } else {
            (range.start / chunk_size) as usize..range.end.div_ceil(chunk_size) as usize
        };

        info!(
            file = %descriptor.file_name,
            file_size,
            start = range.start,
            end = range.end,
            chunks = indices.len(),
            "download: starting"
        );

        let ctx = Arc::new(FetchContext {
            uploader: self.uploader.clone(),
            settings: self.settings.clone(),
            meter: self.meter.clone(),
            key: descriptor.key,
            head_size: descriptor.head_size as usize,
            manifest,
        });
        let gate = Gate::new(self.settings.clone(), Direction::Download);
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(schedule(ctx, gate, indices, tx, cancel.clone()));

        let consumer = Consumer {
            rx,
            task,
            _guard: cancel.clone().drop_guard(),
            cancel,
            range,
            chunk_size,
            delivered: 0,
            finished: false,
        };
        let inner = futures::stream::unfold(consumer, |mut c| async move {
            let item = c.next_piece().await?;
            Some((item, c))
        })
        .boxed();

        Ok(ChunkStream {
            inner,
            range,
            file_size,
        })
    }

    /// Download a whole file into memory.
    pub async fn read_all(
        &self,
        descriptor: &ShareDescriptor,
        task: Arc<TransferTask>,
    ) -> Result<Bytes, TransferError> {
        let mut stream = self.open(descriptor, None, task).await?;
        let mut out = BytesMut::with_capacity(descriptor.file_size.min(1 << 26) as usize);
        while let Some(piece) = stream.next().await {
            out.extend_from_slice(&piece?);
        }
        Ok(out.freeze())
    }

    /// Download a file, or a range of it, into `writer`. Returns bytes written.
    pub async fn download_to<W>(
        &self,
        descriptor: &ShareDescriptor,
        range: Option<ByteRange>,
        writer: &mut W,
        task: Arc<TransferTask>,
    ) -> Result<u64, TransferError>
    where
        W: AsyncWrite + Unpin,
    {
        let mut stream = self.open(descriptor, range, task.clone()).await?;
        let mut written = 0u64;
        while let Some(piece) = stream.next().await {
            let piece = piece?;
            if let Err(e) = writer.write_all(&piece).await {
                let err = TransferError::from(DownloadError::Write(e));
                task.fail(&err);
                return Err(err);
            }
            written += piece.len() as u64;
        }
        if let Err(e) = writer.flush().await {
            let err = TransferError::from(DownloadError::Write(e));
            task.fail(&err);
            return Err(err);
        }
        Ok(written)
    }
}

/// Keep fetches flowing ahead of the consumer, in index order, within the
/// gate's capacity.
async fn schedule(
    ctx: Arc<FetchContext>,
    gate: Arc<Gate>,
    indices: Range<usize>,
    tx: mpsc::UnboundedSender<PendingChunk>,
    cancel: CancellationToken,
) {
    for index in indices {
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            permit = gate.acquire() => permit,
        };

        let fetch = AbortOnDropHandle::new(tokio::spawn(fetch_chunk(
            ctx.clone(),
            index,
            cancel.clone(),
        )));
        debug!(index, in_flight = gate.in_flight(), "scheduled chunk fetch");

        if tx
            .send(PendingChunk {
                index,
                fetch,
                permit,
            })
            .is_err()
        {
            // Consumer gone; the unsent fetch was aborted on drop.
            return;
        }
    }
}

async fn fetch_chunk(
    ctx: Arc<FetchContext>,
    index: usize,
    cancel: CancellationToken,
) -> Result<Bytes, TransferError> {
    let locator = ctx
        .manifest
        .locators
        .get(index)
        .ok_or_else(|| TransferError::Internal(format!("no locator for chunk {index}")))?
        .as_str();
    let expected_len = ctx.manifest.chunk_len(index);
    let c = ctx.as_ref();

    retry(&c.settings, &cancel, "fetch chunk", move || async move {
        let blob = c.uploader.read(locator).await.map_err(FetchError::Backend)?;
        c.meter.record_download(blob.len() as u64);
        let data = unseal(&blob, c.head_size, &c.key).map_err(FetchError::Format)?;
        if data.len() as u64 != expected_len {
            return Err(FetchError::Format(FormatError::Inconsistent(format!(
                "chunk {index} unsealed to {} bytes, expected {expected_len}",
                data.len()
            ))));
        }
        Ok(data)
    })
    .await
    .map_err(|e| match e {
        RetryError::Cancelled => TransferError::Cancelled,
        RetryError::Failed(FetchError::Backend(source)) => {
            DownloadError::ChunkFailed { index, source }.into()
        }
        RetryError::Failed(FetchError::Format(source)) => DownloadError::Corrupt {
            what: format!("chunk {index}"),
            source,
        }
        .into(),
    })
}

/// Consumer side: awaits fetches in index order and trims them to the range.
struct Consumer {
    rx: mpsc::UnboundedReceiver<PendingChunk>,
    task: Arc<TransferTask>,
    cancel: CancellationToken,
    _guard: DropGuard,
    range: ByteRange,
    chunk_size: u64,
    delivered: u64,
    finished: bool,
}

impl Consumer {
    async fn next_piece(&mut self) -> Option<Result<Bytes, TransferError>> {
        if self.finished {
            return None;
        }
        if self.delivered == self.range.len() {
            self.finished = true;
            self.task.complete(None);
            return None;
        }

        let next = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            next = self.rx.recv() => next,
        };
        let Some(PendingChunk {
            index,
            fetch,
            permit,
        }) = next
        else {
            return Some(Err(self.stop(TransferError::Cancelled)));
        };

        let fetched = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(TransferError::Cancelled),
            joined = fetch => match joined {
                Ok(result) => result,
                Err(e) => Err(TransferError::Internal(e.to_string())),
            },
        };

        match fetched {
            Ok(data) => {
                let offset = index as u64 * self.chunk_size;
                let lo = self.range.start.saturating_sub(offset) as usize;
                let hi = (self.range.end - offset).min(data.len() as u64) as usize;
                let piece = data.slice(lo..hi);

                self.delivered += piece.len() as u64;
                self.task.set_progress(self.delivered);
                drop(permit);
                Some(Ok(piece))
            }
            Err(e) => Some(Err(self.stop(e))),
        }
    }

    fn stop(&mut self, error: TransferError) -> TransferError {
        self.finished = true;
        self.cancel.cancel();
        self.task.fail(&error);
        error
    }
}

/// Ordered stream of file bytes returned by [`Downloads::open`].
pub struct ChunkStream {
    inner: BoxStream<'static, Result<Bytes, TransferError>>,
    range: ByteRange,
    file_size: u64,
}

impl ChunkStream {
    /// The byte range this stream yields.
    pub fn range(&self) -> ByteRange {
        self.range
    }

    /// Size of the whole file.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Number of bytes this stream yields.
    pub fn len(&self) -> u64 {
        self.range.len()
    }

    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }
}

impl Stream for ChunkStream {
    type Item = Result<Bytes, TransferError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}
