//! Fixed-size chunking for uploads.

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};

/// One window of the source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Position of this chunk in the file (0-based).
    pub index: usize,
    /// Byte offset within the original file.
    pub offset: u64,
    /// The raw chunk data.
    pub data: Bytes,
}

/// Split data into windows of `chunk_size` bytes.
///
/// The last window may be shorter. Empty input yields no windows. A
/// `chunk_size` of 0 is treated as 1.
pub fn split(data: &[u8], chunk_size: u32) -> std::slice::Chunks<'_, u8> {
    data.chunks((chunk_size as usize).max(1))
}

/// Lazily splits an async reader into fixed-size chunks.
///
/// Only one window is buffered at a time, so arbitrarily large sources can
/// be uploaded without reading them into memory first.
pub struct ChunkReader<R> {
    reader: R,
    chunk_size: usize,
    index: usize,
    offset: u64,
    done: bool,
}

impl<R: AsyncRead + Unpin> ChunkReader<R> {
    /// Create a reader producing chunks of `chunk_size` bytes.
    pub fn new(reader: R, chunk_size: u32) -> Self {
        Self {
            reader,
            chunk_size: (chunk_size as usize).max(1),
            index: 0,
            offset: 0,
            done: false,
        }
    }

    /// Read the next chunk. Returns `None` at end of stream.
    ///
    /// Every chunk except the last is exactly `chunk_size` bytes, even when
    /// the underlying reader returns short reads.
    pub async fn next_chunk(&mut self) -> std::io::Result<Option<Chunk>> {
        if self.done {
            return Ok(None);
        }

        let mut buf = vec![0u8; self.chunk_size];
        let mut filled = 0;

        while filled < self.chunk_size {
            let n = self.reader.read(&mut buf[filled..]).await?;
            if n == 0 {
                self.done = true;
                break;
            }
            filled += n;
        }

        if filled == 0 {
            return Ok(None);
        }

        buf.truncate(filled);
        let chunk = Chunk {
            index: self.index,
            offset: self.offset,
            data: Bytes::from(buf),
        };
        self.index += 1;
        self.offset += filled as u64;
        Ok(Some(chunk))
    }

    /// Total bytes read so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }
}
