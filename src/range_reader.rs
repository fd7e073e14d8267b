use std::future::Future;
use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};

use async_stream::try_stream;
use bytes::{Bytes, BytesMut};
use futures::{Stream, TryStreamExt};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::mpsc;

use crate::crc64::{Crc64, XZ};
use crate::shared_types::{ByteCount, ChunkRange};

const MB_TO_BYTES: usize = 1024 * 1024;
pub const READ_BUFFER_SIZE: usize = 2 * MB_TO_BYTES;

/// Computes the checksum of one byte range of a file.
pub trait RangeHasher: Send + Sync + 'static {
    /// The variant every range is hashed with. Chunk results are folded
    /// with the same one.
    fn crc(&self) -> &'static Crc64;

    fn hash_range(
        &self,
        path: &Path,
        range: ChunkRange,
        s_progress: Option<mpsc::Sender<ByteCount>>,
    ) -> impl Future<Output = io::Result<u64>> + Send;
}

/// Reads the range from disk through its own read-only handle and feeds it
/// through `crc`.
#[derive(Debug, Clone, Copy)]
pub struct FileRangeHasher {
    crc: &'static Crc64,
    buffer_size: usize,
}

impl FileRangeHasher {
    pub fn new(crc: &'static Crc64) -> Self {
        Self {
            crc,
            buffer_size: READ_BUFFER_SIZE,
        }
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size.max(1);
        self
    }
}

impl RangeHasher for FileRangeHasher {
    fn crc(&self) -> &'static Crc64 {
        self.crc
    }

    async fn hash_range(
        &self,
        path: &Path,
        range: ChunkRange,
        s_progress: Option<mpsc::Sender<ByteCount>>,
    ) -> io::Result<u64> {
        let mut digest = self.crc.digest();
        let stream = stream_range(path.to_owned(), range, self.buffer_size);
        futures::pin_mut!(stream);
        while let Some(buffer) = stream.try_next().await? {
            digest.update(&buffer);
            if let Some(s_progress) = &s_progress {
                s_progress.try_send(buffer.len() as ByteCount).ok();
            }
        }
        Ok(digest.finalize())
    }
}

/// CRC-64/XZ of the bytes `start..=end` of the file at `path`.
pub async fn hash_range(path: impl AsRef<Path>, start: u64, end: u64) -> io::Result<u64> {
    if start > end {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("empty range {start}..={end}"),
        ));
    }
    let range = ChunkRange {
        index: 0,
        start,
        end,
    };
    FileRangeHasher::new(&XZ)
        .hash_range(path.as_ref(), range, None)
        .await
}

/// Streams the bytes of `range` in buffers of at most `buffer_size`. Ends
/// with `UnexpectedEof` when the file is shorter than the range.
pub(crate) fn stream_range(
    path: PathBuf,
    range: ChunkRange,
    buffer_size: usize,
) -> impl Stream<Item = io::Result<Bytes>> {
    try_stream! {
        let mut file = File::open(&path).await?;
        file.seek(SeekFrom::Start(range.start)).await?;
        let mut reader = file.take(range.byte_count());
        let mut remaining = range.byte_count();

        while remaining > 0 {
            let capacity = remaining.min(buffer_size as u64) as usize;
            let mut buffer = BytesMut::with_capacity(capacity);
            while buffer.len() < capacity {
                if reader.read_buf(&mut buffer).await? == 0 {
                    break;
                }
            }
            if buffer.is_empty() {
                Err::<(), _>(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!(
                        "{} ended {} bytes before offset {}",
                        path.display(),
                        remaining,
                        range.end + 1
                    ),
                ))?;
            }
            remaining -= buffer.len() as u64;
            yield buffer.freeze();
        }
    }
}
