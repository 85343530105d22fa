//! Receive-side state for one incoming file.

use crate::error::TransferError;
use peerlink_files::{Checksum, IncrementalHasher, sanitize_file_name};
use std::fmt;
use std::time::{Duration, Instant};

/// Transfer progress phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferPhase {
    /// Chunks arriving
    Receiving,
    /// Transfer failed; further chunks are discarded until the next file
    Failed,
}

/// A file that arrived intact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedFile {
    /// Sanitized file name
    pub name: String,
    /// File contents
    pub data: Vec<u8>,
    /// Verified checksum
    pub checksum: Checksum,
}

/// State of the file currently being received on a session
///
/// Created on FILE_META and destroyed on FILE_END or abort. Received bytes
/// never exceed the declared size.
pub struct TransferState {
    name: String,
    declared_size: u64,
    data: Vec<u8>,
    hasher: IncrementalHasher,
    phase: TransferPhase,
    started_at: Instant,
}

impl fmt::Debug for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferState")
            .field("name", &self.name)
            .field("declared_size", &self.declared_size)
            .field("bytes_received", &self.bytes_received())
            .field("phase", &self.phase)
            .finish()
    }
}

impl TransferState {
    /// Begin receiving an announced file
    ///
    /// # Errors
    ///
    /// Returns `SizeExceeded` if the declared size is over `max_size`, and
    /// `Aborted` if the name sanitizes to nothing.
    pub fn begin(name: &str, declared_size: u64, max_size: u64) -> Result<Self, TransferError> {
        if declared_size > max_size {
            return Err(TransferError::SizeExceeded {
                size: declared_size,
                max: max_size,
            });
        }
        let name = sanitize_file_name(name)
            .ok_or_else(|| TransferError::Aborted(format!("unusable file name {name:?}")))?;

        // Capacity comes from a peer-supplied size, already capped above.
        let capacity = usize::try_from(declared_size).unwrap_or(0);
        Ok(Self {
            name,
            declared_size,
            data: Vec::with_capacity(capacity),
            hasher: IncrementalHasher::new(),
            phase: TransferPhase::Receiving,
            started_at: Instant::now(),
        })
    }

    /// Sanitized file name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Size announced by the sender
    #[must_use]
    pub fn declared_size(&self) -> u64 {
        self.declared_size
    }

    /// Bytes accepted so far
    #[must_use]
    pub fn bytes_received(&self) -> u64 {
        self.hasher.bytes_hashed()
    }

    /// Current phase
    #[must_use]
    pub fn phase(&self) -> TransferPhase {
        self.phase
    }

    /// Time since FILE_META
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Accept the next chunk
    ///
    /// # Errors
    ///
    /// Returns `SizeExceeded` if the chunk would take the total past the
    /// declared size. The transfer is failed and its data discarded.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Result<(), TransferError> {
        if self.phase == TransferPhase::Failed {
            return Err(TransferError::Aborted("transfer already failed".into()));
        }

        let total = self.bytes_received() + chunk.len() as u64;
        if total > self.declared_size {
            self.fail();
            return Err(TransferError::SizeExceeded {
                size: total,
                max: self.declared_size,
            });
        }

        self.hasher.update(chunk);
        self.data.extend_from_slice(chunk);
        Ok(())
    }

    /// Complete the transfer against the sender's checksum
    ///
    /// # Errors
    ///
    /// Returns `Aborted` if fewer bytes than declared arrived and
    /// `ChecksumMismatch` if the data does not hash to `expected`.
    pub fn finish(self, expected: &Checksum) -> Result<ReceivedFile, TransferError> {
        if self.phase == TransferPhase::Failed {
            return Err(TransferError::Aborted("transfer already failed".into()));
        }
        if self.bytes_received() != self.declared_size {
            return Err(TransferError::Aborted(format!(
                "received {} of {} bytes",
                self.bytes_received(),
                self.declared_size
            )));
        }

        let actual = self.hasher.finalize();
        if actual != *expected {
            tracing::warn!(
                "Checksum mismatch for {}: expected {}, got {}",
                self.name,
                expected,
                actual
            );
            return Err(TransferError::ChecksumMismatch);
        }

        Ok(ReceivedFile {
            name: self.name,
            data: self.data,
            checksum: actual,
        })
    }

    /// Mark failed and drop buffered data
    pub fn fail(&mut self) {
        self.phase = TransferPhase::Failed;
        self.data = Vec::new();
    }
}
