//! Restartable chunked reads over a local file.

use crate::error::UploadError;
use std::io::{self, SeekFrom};
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// A contiguous byte range of the source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub start_offset: u64,
    /// Exclusive.
    pub end_offset: u64,
    pub payload: Vec<u8>,
}

impl Chunk {
    pub fn len(&self) -> u64 {
        self.end_offset - self.start_offset
    }

    pub fn is_empty(&self) -> bool {
        self.start_offset == self.end_offset
    }

    /// `Content-Range` header value for this chunk of a `total` byte file.
    ///
    /// The end is the exclusive chunk end, which is what the upload service
    /// reads back as the next offset.
    pub fn content_range(&self, total: u64) -> String {
        format!("bytes {}-{}/{}", self.start_offset, self.end_offset, total)
    }
}

/// Exposes a file as a finite sequence of fixed-size chunks.
///
/// The cursor is an offset into the logical file (the configured byte range)
/// and only moves through [`seek`](Self::seek) and
/// [`next_chunk`](Self::next_chunk). Every read seeks the handle first, so
/// nothing else depends on the OS file position. The handle is released when
/// the source is dropped.
#[derive(Debug)]
pub struct ChunkSource {
    file: File,
    chunk_size: u64,
    /// Absolute offset of logical byte 0.
    start: u64,
    /// Absolute exclusive bound of the logical file.
    end: u64,
    cursor: u64,
}

impl ChunkSource {
    /// Opens `path` for chunked reading over the whole file.
    pub async fn open(path: impl AsRef<Path>, chunk_size: u64) -> Result<Self, UploadError> {
        if chunk_size == 0 {
            return Err(UploadError::IoError(io::Error::new(
                io::ErrorKind::InvalidInput,
                "chunk size must be greater than zero",
            )));
        }

        let file = File::open(path.as_ref()).await?;
        let file_size = file.metadata().await?.len();

        Ok(Self {
            file,
            chunk_size,
            start: 0,
            end: file_size,
            cursor: 0,
        })
    }

    /// Restricts the source to the absolute byte range `[start, end)`.
    ///
    /// `end` defaults to the file size. Offsets passed to `seek` and reported
    /// on chunks are relative to `start` afterwards.
    pub async fn with_range(mut self, start: u64, end: Option<u64>) -> Result<Self, UploadError> {
        let file_size = self.file.metadata().await?.len();
        let end = end.unwrap_or(file_size);
        if start > end || end > file_size {
            return Err(UploadError::IoError(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "byte range {}-{} does not fit a {} byte file",
                    start, end, file_size
                ),
            )));
        }

        self.start = start;
        self.end = end;
        self.cursor = 0;
        Ok(self)
    }

    /// Length of the logical file in bytes.
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// Current cursor, relative to the logical start.
    pub fn position(&self) -> u64 {
        self.cursor
    }

    /// Moves the cursor to `offset`; backwards and forwards are both fine.
    ///
    /// Seeking at or past the end makes the next read signal end-of-sequence.
    pub fn seek(&mut self, offset: u64) {
        self.cursor = offset;
    }

    /// Reads the chunk at the cursor and advances past it.
    ///
    /// Returns `Ok(None)` once the cursor has reached the end of the file.
    pub async fn next_chunk(&mut self) -> Result<Option<Chunk>, UploadError> {
        let want = self.len().saturating_sub(self.cursor).min(self.chunk_size);
        if want == 0 {
            return Ok(None);
        }

        let chunk = self.read_range(self.cursor, want).await?;
        self.cursor = chunk.end_offset;
        Ok(Some(chunk))
    }

    /// Reads chunk number `index` without moving the cursor.
    pub async fn chunk_at(&mut self, index: u64) -> Result<Option<Chunk>, UploadError> {
        let offset = match index.checked_mul(self.chunk_size) {
            Some(offset) if offset < self.len() => offset,
            _ => return Ok(None),
        };
        let want = (self.len() - offset).min(self.chunk_size);
        self.read_range(offset, want).await.map(Some)
    }

    /// Reads the whole logical file without moving the cursor.
    pub async fn read_all(&mut self) -> Result<Vec<u8>, UploadError> {
        let len = self.len();
        if len == 0 {
            return Ok(Vec::new());
        }
        Ok(self.read_range(0, len).await?.payload)
    }

    async fn read_range(&mut self, offset: u64, len: u64) -> Result<Chunk, UploadError> {
        self.file.seek(SeekFrom::Start(self.start + offset)).await?;

        let mut payload = vec![0u8; len as usize];
        self.file.read_exact(&mut payload).await.map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!(
                        "file shrank while reading bytes {}-{}",
                        offset,
                        offset + len
                    ),
                )
            } else {
                e
            }
        })?;

        Ok(Chunk {
            start_offset: offset,
            end_offset: offset + len,
            payload,
        })
    }
}
