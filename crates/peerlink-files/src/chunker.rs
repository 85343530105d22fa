//! File chunking.

use crate::hasher::{Checksum, checksum};
use crate::{DEFAULT_CHUNK_SIZE, FilesError, MAX_FILE_NAME_LEN, MAX_FILE_SIZE};
use std::path::Path;

/// Split file contents into fixed-size pieces
#[derive(Debug, Clone, Copy)]
pub struct FileChunker {
    chunk_size: usize,
}

impl FileChunker {
    /// Create a new chunker with default chunk size
    pub fn new() -> Self {
        Self::with_chunk_size(DEFAULT_CHUNK_SIZE)
    }

    /// Create a new chunker with custom chunk size (zero is bumped to one)
    pub fn with_chunk_size(size: usize) -> Self {
        Self {
            chunk_size: size.max(1),
        }
    }

    /// Get chunk size
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Calculate number of chunks for a file
    pub fn chunk_count(&self, file_size: u64) -> u64 {
        file_size.div_ceil(self.chunk_size as u64)
    }

    /// Iterate over the chunks of `data` in order
    pub fn chunks<'a>(self, data: &'a [u8]) -> impl Iterator<Item = &'a [u8]> + 'a {
        data.chunks(self.chunk_size)
    }
}

impl Default for FileChunker {
    fn default() -> Self {
        Self::new()
    }
}

/// A file read fully into memory, ready to be chunked onto a session
#[derive(Debug, Clone)]
pub struct LoadedFile {
    /// Sanitized file name
    pub name: String,
    /// File contents
    pub data: Vec<u8>,
    /// BLAKE3 checksum of `data`
    pub checksum: Checksum,
}

impl LoadedFile {
    /// Build from in-memory contents, enforcing the size cap
    ///
    /// # Errors
    ///
    /// Returns `FilesError::TooLarge` if `data` exceeds `max_size`, or
    /// `FilesError::InvalidName` if the name sanitizes to nothing.
    pub fn from_bytes(name: &str, data: Vec<u8>, max_size: u64) -> Result<Self, FilesError> {
        let size = data.len() as u64;
        if size > max_size {
            return Err(FilesError::TooLarge {
                size,
                max: max_size,
            });
        }
        let name = sanitize_file_name(name).ok_or_else(|| FilesError::InvalidName(name.into()))?;
        let checksum = checksum(&data);
        Ok(Self {
            name,
            data,
            checksum,
        })
    }

    /// Read a file from disk, checking its size before reading any content
    ///
    /// # Errors
    ///
    /// Returns `FilesError::TooLarge` for files over `max_size` and
    /// `FilesError::Io` if the file cannot be read.
    pub async fn load<P: AsRef<Path>>(path: P, max_size: u64) -> Result<Self, FilesError> {
        let path = path.as_ref();
        let metadata = tokio::fs::metadata(path).await?;
        if metadata.len() > max_size {
            return Err(FilesError::TooLarge {
                size: metadata.len(),
                max: max_size,
            });
        }

        let data = tokio::fs::read(path).await?;
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();

        tracing::debug!("Loaded {:?} ({} bytes)", path, data.len());
        Self::from_bytes(name, data, max_size)
    }

    /// Read a file using the protocol-wide size cap
    ///
    /// # Errors
    ///
    /// See [`LoadedFile::load`].
    pub async fn load_default<P: AsRef<Path>>(path: P) -> Result<Self, FilesError> {
        Self::load(path, MAX_FILE_SIZE).await
    }

    /// Size in bytes
    #[must_use]
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

/// Reduce a file name to its last path component and cap its length.
///
/// Returns `None` for names that are empty or consist only of dots after
/// stripping directories.
#[must_use]
pub fn sanitize_file_name(name: &str) -> Option<String> {
    let base = name
        .rsplit(|c: char| c == '/' || c == '\\')
        .next()
        .unwrap_or_default()
        .trim()
        .replace('\0', "");

    if base.is_empty() || base.chars().all(|c| c == '.') {
        return None;
    }

    if base.len() <= MAX_FILE_NAME_LEN {
        return Some(base);
    }

    let mut end = MAX_FILE_NAME_LEN;
    while !base.is_char_boundary(end) {
        end -= 1;
    }
    Some(base[..end].to_string())
}
