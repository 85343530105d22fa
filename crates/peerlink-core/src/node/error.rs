//! Error types for the node API
//!
//! Every failure a caller can see is a [`NodeError`]. Each variant carries a
//! stable reason code ([`NodeError::reason`]) that the Bridge forwards to
//! front ends verbatim.
//!
//! # Error Categories
//!
//! - **Transient**: may succeed on retry (registry unreachable, dial timeout)
//! - **Permanent**: will not succeed without a different request (unknown
//!   peer, oversized file, username taken)
//!
//! # Example
//!
//! ```no_run
//! use peerlink_core::node::NodeError;
//!
//! fn report(err: &NodeError) {
//!     if err.is_transient() {
//!         eprintln!("temporary failure ({}), try again", err.reason());
//!     } else {
//!         eprintln!("failed: {err}");
//!     }
//! }
//! ```

use crate::error::{SessionError, TransferError};
use peerlink_discovery::RegistryError;
use thiserror::Error;

/// Session establishment and session I/O errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// Dial or handshake did not finish in time
    #[error("connection timed out")]
    Timeout,

    /// Peer could not be reached or refused the session
    #[error("connection refused: {0}")]
    Refused(String),

    /// A session with this peer already exists or is being set up
    #[error("session collision with {0}")]
    Collision(String),

    /// Peer answered under a different username
    #[error("handshake mismatch: expected {expected}, got {actual}")]
    HandshakeMismatch {
        /// Username we dialled
        expected: String,
        /// Username the peer announced
        actual: String,
    },

    /// Attempted to connect to ourselves
    #[error("cannot connect to self")]
    SelfTarget,

    /// Attempt cancelled by disconnect or shutdown
    #[error("connection attempt cancelled")]
    Cancelled,

    /// No established session with this peer
    #[error("not connected to {0}")]
    NotConnected(String),

    /// Peer violated the wire protocol
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Outbound queue stayed full past the write-stall timeout
    #[error("outbound queue stalled")]
    Backpressure,
}

impl ConnectionError {
    /// Stable machine-readable reason code
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            ConnectionError::Timeout => "timeout",
            ConnectionError::Refused(_) => "refused",
            ConnectionError::Collision(_) => "collision",
            ConnectionError::HandshakeMismatch { .. } => "handshake-mismatch",
            ConnectionError::SelfTarget => "self-target",
            ConnectionError::Cancelled => "cancelled",
            ConnectionError::NotConnected(_) => "not-connected",
            ConnectionError::Protocol(_) => "protocol-error",
            ConnectionError::Backpressure => "backpressure",
        }
    }
}

/// Errors that can occur in node operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NodeError {
    /// Registry operation failed
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Session could not be established or used
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Message or file rejected
    #[error(transparent)]
    Transfer(#[from] TransferError),

    /// Illegal state transition
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Listener could not be bound
    #[error("failed to bind listener: {0}")]
    Bind(String),

    /// File could not be read
    #[error("file error: {0}")]
    File(String),

    /// Operation requires `start()` first
    #[error("node not started")]
    NotStarted,

    /// `start()` called twice
    #[error("node already started")]
    AlreadyStarted,

    /// Operation requires a registered username
    #[error("not registered")]
    NotRegistered,
}

impl NodeError {
    /// Returns true if this error is transient and may succeed on retry
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            NodeError::Registry(e) => e.is_transient(),
            NodeError::Connection(e) => matches!(
                e,
                ConnectionError::Timeout
                    | ConnectionError::Refused(_)
                    | ConnectionError::Collision(_)
                    | ConnectionError::Backpressure
            ),
            _ => false,
        }
    }

    /// Stable machine-readable reason code
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            NodeError::Registry(e) => e.reason(),
            NodeError::Connection(e) => e.reason(),
            NodeError::Transfer(e) => e.reason(),
            NodeError::Session(_) => "invalid-state",
            NodeError::Bind(_) => "bind-failed",
            NodeError::File(_) => "file-error",
            NodeError::NotStarted => "not-started",
            NodeError::AlreadyStarted => "already-started",
            NodeError::NotRegistered => "not-registered",
        }
    }
}

impl From<peerlink_files::FilesError> for NodeError {
    fn from(err: peerlink_files::FilesError) -> Self {
        match err {
            peerlink_files::FilesError::TooLarge { size, max } => {
                NodeError::Transfer(TransferError::SizeExceeded { size, max })
            }
            other => NodeError::File(other.to_string()),
        }
    }
}

/// Result type alias for node operations
pub type Result<T> = std::result::Result<T, NodeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_passthrough() {
        let err: NodeError = RegistryError::NotFound("carol".into()).into();
        assert_eq!(err.reason(), "not-found");
        assert_eq!(err.to_string(), "peer not found: carol");

        let err: NodeError = ConnectionError::Collision("bob".into()).into();
        assert_eq!(err.reason(), "collision");

        let err: NodeError = TransferError::ChecksumMismatch.into();
        assert_eq!(err.reason(), "checksum-mismatch");
    }

    #[test]
    fn test_transient_classification() {
        assert!(NodeError::from(RegistryError::Unreachable("down".into())).is_transient());
        assert!(NodeError::from(ConnectionError::Timeout).is_transient());
        assert!(!NodeError::from(ConnectionError::SelfTarget).is_transient());
        assert!(!NodeError::from(RegistryError::NotFound("x".into())).is_transient());
        assert!(!NodeError::NotStarted.is_transient());
    }

    #[test]
    fn test_files_error_conversion() {
        let err: NodeError = peerlink_files::FilesError::TooLarge { size: 11, max: 10 }.into();
        assert_eq!(
            err,
            NodeError::Transfer(TransferError::SizeExceeded { size: 11, max: 10 })
        );

        let err: NodeError = peerlink_files::FilesError::InvalidName("..".into()).into();
        assert_eq!(err.reason(), "file-error");
    }
}
