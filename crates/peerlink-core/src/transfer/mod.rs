//! Transfer protocol: chat messages and chunked files over a session.
//!
//! A file goes out as FILE_META, zero or more FILE_CHUNK frames and a
//! closing FILE_END carrying the BLAKE3 checksum. The receiver tracks the
//! file in a [`TransferState`].

pub mod session;

pub use session::{ReceivedFile, TransferPhase, TransferState};

use crate::error::TransferError;
use crate::frame::Frame;
use peerlink_files::{FileChunker, LoadedFile};

/// Longest chat message accepted by the sender, in characters
pub const MAX_MESSAGE_CHARS: usize = 500;

/// Check a chat message against the length cap
///
/// # Errors
///
/// Returns `MessageTooLong` for text over [`MAX_MESSAGE_CHARS`] characters.
pub fn validate_message(text: &str) -> Result<(), TransferError> {
    let len = text.chars().count();
    if len > MAX_MESSAGE_CHARS {
        return Err(TransferError::MessageTooLong {
            len,
            max: MAX_MESSAGE_CHARS,
        });
    }
    Ok(())
}

/// Frames for one outgoing file, in wire order
pub fn file_frames<'a>(
    file: &'a LoadedFile,
    chunker: FileChunker,
) -> impl Iterator<Item = Frame> + 'a {
    std::iter::once(Frame::file_meta(&file.name, file.size()))
        .chain(chunker.chunks(&file.data).map(Frame::file_chunk))
        .chain(std::iter::once(Frame::file_end(&file.checksum)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameType;

    #[test]
    fn test_message_cap_counts_characters() {
        assert!(validate_message("").is_ok());
        assert!(validate_message(&"a".repeat(500)).is_ok());
        // 500 multi-byte characters are still within the cap.
        assert!(validate_message(&"é".repeat(500)).is_ok());
        assert_eq!(
            validate_message(&"a".repeat(501)).unwrap_err(),
            TransferError::MessageTooLong { len: 501, max: 500 }
        );
    }

    #[test]
    fn test_file_frames_order() {
        let file = LoadedFile::from_bytes("notes.txt", vec![7u8; 2500], 10_000).unwrap();
        let frames: Vec<Frame> = file_frames(&file, FileChunker::with_chunk_size(1000)).collect();

        let types: Vec<FrameType> = frames.iter().map(Frame::frame_type).collect();
        assert_eq!(
            types,
            vec![
                FrameType::FileMeta,
                FrameType::FileChunk,
                FrameType::FileChunk,
                FrameType::FileChunk,
                FrameType::FileEnd,
            ]
        );
        assert_eq!(frames[3].payload().len(), 500);
        assert_eq!(frames[4].parse_checksum().unwrap(), file.checksum);
    }

    #[test]
    fn test_empty_file_has_no_chunks() {
        let file = LoadedFile::from_bytes("empty", Vec::new(), 10).unwrap();
        let frames: Vec<Frame> = file_frames(&file, FileChunker::new()).collect();
        assert_eq!(frames.len(), 2);
    }
}
