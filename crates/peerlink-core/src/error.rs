//! Error types for the PeerLink core protocol.

use crate::session::PeerState;
use thiserror::Error;

/// Frame-level errors
#[derive(Debug, Error)]
pub enum FrameError {
    /// Frame too short to parse
    #[error("frame too short: expected at least {expected}, got {actual}")]
    TooShort {
        /// Expected minimum size
        expected: usize,
        /// Actual size received
        actual: usize,
    },

    /// Invalid frame type byte
    #[error("invalid frame type: 0x{0:02X}")]
    InvalidFrameType(u8),

    /// Declared length exceeds the negotiated maximum
    #[error("frame too large: {size} bytes (max {max})")]
    TooLarge {
        /// Declared frame length
        size: usize,
        /// Maximum accepted length
        max: usize,
    },

    /// Payload does not match the layout its type requires
    #[error("malformed {frame} payload: {reason}")]
    MalformedPayload {
        /// Frame type name
        frame: &'static str,
        /// What was wrong
        reason: String,
    },

    /// Stream ended in the middle of a frame
    #[error("connection closed mid-frame")]
    Truncated,

    /// Underlying socket error
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl FrameError {
    pub(crate) fn malformed(frame: &'static str, reason: impl Into<String>) -> Self {
        FrameError::MalformedPayload {
            frame,
            reason: reason.into(),
        }
    }

    /// Returns true for errors caused by the transport rather than the peer
    #[must_use]
    pub fn is_io(&self) -> bool {
        matches!(self, FrameError::Io(_) | FrameError::Truncated)
    }
}

/// Session-level errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Illegal state transition
    #[error("invalid state transition: {from} -> {to}")]
    InvalidState {
        /// State before the attempted transition
        from: PeerState,
        /// Requested state
        to: PeerState,
    },
}

/// File and message transfer errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransferError {
    /// File larger than the transfer cap, or more bytes than declared
    #[error("size exceeded: {size} bytes (max {max})")]
    SizeExceeded {
        /// Offending size
        size: u64,
        /// Allowed size
        max: u64,
    },

    /// Received data does not hash to the sender's checksum
    #[error("checksum mismatch")]
    ChecksumMismatch,

    /// Transfer abandoned before completion
    #[error("transfer aborted: {0}")]
    Aborted(String),

    /// Chat message longer than the character cap
    #[error("message too long: {len} characters (max {max})")]
    MessageTooLong {
        /// Message length in characters
        len: usize,
        /// Allowed length
        max: usize,
    },
}

impl TransferError {
    /// Stable machine-readable reason code
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            TransferError::SizeExceeded { .. } => "size-exceeded",
            TransferError::ChecksumMismatch => "checksum-mismatch",
            TransferError::Aborted(_) => "aborted",
            TransferError::MessageTooLong { .. } => "message-too-long",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_error_display() {
        let err = FrameError::TooLarge {
            size: 2_000_000,
            max: 1_048_576,
        };
        assert!(err.to_string().contains("2000000"));
        assert!(FrameError::Truncated.is_io());
        assert!(!FrameError::InvalidFrameType(0x42).is_io());
    }

    #[test]
    fn test_transfer_reasons() {
        assert_eq!(TransferError::ChecksumMismatch.reason(), "checksum-mismatch");
        assert_eq!(
            TransferError::SizeExceeded { size: 2, max: 1 }.reason(),
            "size-exceeded"
        );
        assert_eq!(
            TransferError::MessageTooLong { len: 501, max: 500 }.reason(),
            "message-too-long"
        );
    }

    #[test]
    fn test_session_error_names_states() {
        let err = SessionError::InvalidState {
            from: PeerState::Idle,
            to: PeerState::Connected,
        };
        assert_eq!(err.to_string(), "invalid state transition: idle -> connected");
    }
}
