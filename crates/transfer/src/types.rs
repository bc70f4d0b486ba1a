use std::path::PathBuf;

/// Where an upload's bytes come from.
#[derive(Debug, Clone)]
pub enum ByteSource {
    /// Empty directory marker; carries no bytes.
    Directory,
    /// A file on disk, read in chunks and seekable for resume.
    File { path: PathBuf, size: u64 },
    /// An in-memory payload (e.g. an editor buffer). Buffer-only payloads
    /// are never routed over the resumable protocol.
    Buffer(Vec<u8>),
}

impl ByteSource {
    /// Total byte length (0 for directory markers).
    pub fn len(&self) -> u64 {
        match self {
            Self::Directory => 0,
            Self::File { size, .. } => *size,
            Self::Buffer(data) => data.len() as u64,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `true` for directory markers.
    pub fn is_dir(&self) -> bool {
        matches!(self, Self::Directory)
    }
}

/// One logical unit of upload work.
///
/// Immutable after creation; the id is assigned by the coordinator at
/// enqueue time and is unique within a batch.
#[derive(Debug, Clone)]
pub struct UploadItem {
    pub id: u64,
    /// Destination path, `/`-terminated for directory markers.
    pub path: String,
    pub source: ByteSource,
    /// Replace an existing destination instead of failing with a conflict.
    pub overwrite: bool,
}

/// A contiguous byte range of a payload, transferred as one request.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// 0-based position in the chunk sequence.
    pub index: usize,
    /// Offset of the first byte within the payload.
    pub offset: u64,
    pub data: Vec<u8>,
}
