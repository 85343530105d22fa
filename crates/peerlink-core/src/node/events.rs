//! Events published by a running node.

use peerlink_files::Checksum;
use tokio::sync::mpsc;

/// Something that happened on one of the node's sessions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeEvent {
    /// Handshake completed, in either direction
    PeerConnected {
        /// Remote username
        peer: String,
    },

    /// Session ended
    PeerDisconnected {
        /// Remote username
        peer: String,
        /// Why it ended
        reason: String,
    },

    /// Chat message arrived
    MessageReceived {
        /// Sender
        from: String,
        /// Message text
        text: String,
        /// Receive time, Unix milliseconds
        timestamp: u64,
    },

    /// File arrived and its checksum matched
    FileReceived {
        /// Sender
        from: String,
        /// Sanitized file name
        name: String,
        /// File contents
        data: Vec<u8>,
        /// Verified checksum
        checksum: Checksum,
    },

    /// Incoming file was rejected or aborted
    FileFailed {
        /// Sender
        from: String,
        /// File name, if FILE_META had been received
        name: Option<String>,
        /// Reason code
        reason: String,
    },

    /// Automatic reconnection gave up
    ReconnectFailed {
        /// Remote username
        peer: String,
        /// Attempts made
        attempts: u32,
    },
}

impl NodeEvent {
    /// Remote peer this event concerns
    #[must_use]
    pub fn peer(&self) -> &str {
        match self {
            NodeEvent::PeerConnected { peer }
            | NodeEvent::PeerDisconnected { peer, .. }
            | NodeEvent::ReconnectFailed { peer, .. } => peer,
            NodeEvent::MessageReceived { from, .. }
            | NodeEvent::FileReceived { from, .. }
            | NodeEvent::FileFailed { from, .. } => from,
        }
    }
}

/// Sending half of the event channel
pub type EventSender = mpsc::UnboundedSender<NodeEvent>;

/// Receiving half of the event channel
pub type EventReceiver = mpsc::UnboundedReceiver<NodeEvent>;

/// Publish an event, ignoring a dropped receiver
pub(crate) fn emit(events: &EventSender, event: NodeEvent) {
    tracing::trace!("Event: {:?}", event);
    let _ = events.send(event);
}
