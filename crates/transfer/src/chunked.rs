use std::io::{Read, Seek, SeekFrom};

use crate::types::{ByteSource, Chunk};
use crate::{CHUNK_TIER_THRESHOLD, LARGE_CHUNK_SIZE, SMALL_CHUNK_SIZE, TransferError};

/// Picks the chunk size for a payload.
///
/// Two fixed tiers, not a continuous function: payloads under
/// [`CHUNK_TIER_THRESHOLD`] use [`SMALL_CHUNK_SIZE`], larger ones use
/// [`LARGE_CHUNK_SIZE`].
pub fn chunk_size_for(len: u64) -> usize {
    if len < CHUNK_TIER_THRESHOLD {
        SMALL_CHUNK_SIZE
    } else {
        LARGE_CHUNK_SIZE
    }
}

/// Number of chunks a payload of `len` bytes splits into.
///
/// Zero-length payloads have zero chunks; callers special-case them with
/// a single bodyless request.
pub fn chunk_count(len: u64, chunk_size: usize) -> usize {
    if len == 0 {
        0
    } else {
        len.div_ceil(chunk_size as u64) as usize
    }
}

/// Sequential chunk iterator over an upload payload.
///
/// File sources keep an open handle and support [`seek_to`](Self::seek_to)
/// for resuming from a server-acknowledged offset; buffer sources slice in
/// place. Chunks within one payload are strictly sequential.
pub struct ChunkSource<'a> {
    inner: Inner<'a>,
    chunk_size: usize,
    offset: u64,
    len: u64,
}

enum Inner<'a> {
    File(std::fs::File),
    Buffer(&'a [u8]),
}

impl<'a> ChunkSource<'a> {
    /// Opens a chunk source over `source`.
    ///
    /// File lengths are taken from the filesystem, not the descriptor, so
    /// a stale size never causes a short or over-long read. Directory
    /// markers have no bytes and are rejected.
    pub fn open(source: &'a ByteSource, chunk_size: usize) -> Result<Self, TransferError> {
        match source {
            ByteSource::Directory => Err(TransferError::DirectorySource),
            ByteSource::File { path, .. } => {
                let file = std::fs::File::open(path)?;
                let len = file.metadata()?.len();
                Ok(Self {
                    inner: Inner::File(file),
                    chunk_size,
                    offset: 0,
                    len,
                })
            }
            ByteSource::Buffer(data) => Ok(Self {
                inner: Inner::Buffer(data),
                chunk_size,
                offset: 0,
                len: data.len() as u64,
            }),
        }
    }

    /// Repositions so the next chunk starts at `offset` (clamped to the
    /// payload length).
    pub fn seek_to(&mut self, offset: u64) -> Result<(), TransferError> {
        let offset = offset.min(self.len);
        if let Inner::File(file) = &mut self.inner {
            file.seek(SeekFrom::Start(offset))?;
        }
        self.offset = offset;
        Ok(())
    }

    /// Reads the next chunk. Returns `None` at end of payload.
    pub fn next_chunk(&mut self) -> Result<Option<Chunk>, TransferError> {
        let remaining = self.len - self.offset;
        if remaining == 0 {
            return Ok(None);
        }

        let want = remaining.min(self.chunk_size as u64) as usize;
        let data = match &mut self.inner {
            Inner::File(file) => {
                let mut buf = vec![0u8; want];
                file.read_exact(&mut buf)?;
                buf
            }
            Inner::Buffer(data) => {
                let start = self.offset as usize;
                data[start..start + want].to_vec()
            }
        };

        let chunk = Chunk {
            index: (self.offset / self.chunk_size as u64) as usize,
            offset: self.offset,
            data,
        };
        self.offset += want as u64;
        Ok(Some(chunk))
    }

    /// Current byte offset.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Total payload length in bytes.
    pub fn total_len(&self) -> u64 {
        self.len
    }

    /// Bytes remaining to read.
    pub fn remaining(&self) -> u64 {
        self.len - self.offset
    }
}
