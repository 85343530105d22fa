//! # PeerLink Files
//!
//! File handling for PeerLink transfers.
//!
//! This crate provides:
//! - Size-capped file loading and fixed-size chunking
//! - BLAKE3 whole-file checksums, computed incrementally on the receive side
//! - File name sanitization for names received from remote peers

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod chunker;
pub mod hasher;

pub use chunker::{FileChunker, LoadedFile, sanitize_file_name};
pub use hasher::{CHECKSUM_LEN, Checksum, IncrementalHasher, checksum};

use thiserror::Error;

/// Default chunk size (64 KiB)
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Largest file a peer will send or accept (10 MiB)
pub const MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Longest file name carried in a transfer, in bytes
pub const MAX_FILE_NAME_LEN: usize = 255;

/// File handling errors
#[derive(Debug, Error)]
pub enum FilesError {
    /// File is larger than the permitted maximum
    #[error("file too large: {size} bytes (max {max})")]
    TooLarge {
        /// Actual size in bytes
        size: u64,
        /// Configured maximum
        max: u64,
    },

    /// File name is empty or unusable after sanitization
    #[error("invalid file name: {0:?}")]
    InvalidName(String),

    /// Underlying I/O failure
    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),
}
