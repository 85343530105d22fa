//! # PeerLink Core
//!
//! Direct peer-to-peer sessions for chat messages and file transfer.
//!
//! This crate provides:
//! - Frame encoding and decoding for the session wire protocol
//! - The per-peer connection state machine
//! - Receive-side file reassembly with checksum verification
//! - The Connection Manager, session loops and the front-end Bridge
//! - Error types and handling
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         Node                                     │
//! │   (connection manager, reconnects, events, bridge)              │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                    Sessions / Transfers                          │
//! │   (state machine, ping/pong, chunked files)                     │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                         Frames                                   │
//! │   (length-prefixed, tagged protocol data units)                 │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod frame;
pub mod node;
pub mod session;
pub mod transfer;

pub use error::{FrameError, SessionError, TransferError};
pub use frame::{FileMeta, Frame, FrameType, Handshake};
pub use node::{
    Bridge, BridgeCommand, BridgeEvent, ConnectionError, ConnectionManager, NodeConfig, NodeError,
    NodeEvent,
};
pub use session::{Direction, PeerState, Session, SessionStats, StatsSnapshot};
pub use transfer::{MAX_MESSAGE_CHARS, ReceivedFile, TransferState, validate_message};

/// Size of the big-endian length prefix in bytes
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Length prefix plus the frame type tag
pub const FRAME_HEADER_SIZE: usize = LENGTH_PREFIX_SIZE + 1;

/// Largest frame accepted from the wire by default
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;
