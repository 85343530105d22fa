//! Per-peer connection state machine.
//!
//! Each remote peer a node knows about has exactly one [`Session`] record
//! while it is anywhere other than `Idle`. The record moves through the
//! states below; any other move is rejected with
//! [`SessionError::InvalidState`].
//!
//! ```text
//!            connect()            socket up          handshake ok
//!   Idle ─────────────> Connecting ─────────> Handshaking ─────────> Connected
//!    ^ ^                    │  (inbound) Idle ──────^  │                 │
//!    │ │                    │                          │                 │ close / error
//!    │ └──── Failed <───────┴──────────────────────────┘                 v
//!    └─────────────────────────────────────────────────────────────── Closing
//! ```

use crate::error::SessionError;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Connection state for one remote peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerState {
    /// No session and no attempt in progress
    Idle,
    /// Outbound dial in progress
    Connecting,
    /// Socket open, usernames being exchanged
    Handshaking,
    /// Session established
    Connected,
    /// Session being torn down
    Closing,
    /// Attempt failed; returns to `Idle`
    Failed,
}

impl PeerState {
    /// Check whether moving to `next` is a legal transition
    #[must_use]
    pub fn can_transition(self, next: PeerState) -> bool {
        use PeerState::*;
        matches!(
            (self, next),
            (Idle, Connecting)
                | (Idle, Handshaking)
                | (Connecting, Handshaking)
                | (Connecting, Failed)
                | (Connecting, Idle)
                | (Handshaking, Connected)
                | (Handshaking, Failed)
                | (Handshaking, Idle)
                | (Connected, Closing)
                | (Closing, Idle)
                | (Failed, Idle)
        )
    }

    /// Returns true while a dial or handshake is in flight
    #[must_use]
    pub fn is_pending(self) -> bool {
        matches!(self, PeerState::Connecting | PeerState::Handshaking)
    }

    /// Lowercase name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            PeerState::Idle => "idle",
            PeerState::Connecting => "connecting",
            PeerState::Handshaking => "handshaking",
            PeerState::Connected => "connected",
            PeerState::Closing => "closing",
            PeerState::Failed => "failed",
        }
    }
}

impl fmt::Display for PeerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which side opened the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// We dialled the peer
    Outbound,
    /// The peer dialled us
    Inbound,
}

/// Traffic counters shared between a session's read and write loops
#[derive(Debug, Default)]
pub struct SessionStats {
    frames_sent: AtomicU64,
    frames_received: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
}

impl SessionStats {
    /// Record a frame written to the socket
    pub fn record_sent(&self, bytes: usize) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Record a frame read from the socket
    pub fn record_received(&self, bytes: usize) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Point-in-time copy of the counters
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
        }
    }
}

/// Copy of [`SessionStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Frames written
    pub frames_sent: u64,
    /// Frames read
    pub frames_received: u64,
    /// Bytes written, headers included
    pub bytes_sent: u64,
    /// Bytes read, headers included
    pub bytes_received: u64,
}

/// Session record for one (local, remote) pair
#[derive(Debug)]
pub struct Session {
    id: u64,
    local: String,
    remote: String,
    direction: Direction,
    state: PeerState,
    created_at: Instant,
    established_at: Option<Instant>,
    stats: Arc<SessionStats>,
}

impl Session {
    /// Start an outbound attempt (`Idle -> Connecting`)
    #[must_use]
    pub fn outbound(id: u64, local: &str, remote: &str) -> Self {
        Self::new(id, local, remote, Direction::Outbound, PeerState::Connecting)
    }

    /// Accept an inbound attempt (`Idle -> Handshaking`)
    #[must_use]
    pub fn inbound(id: u64, local: &str, remote: &str) -> Self {
        Self::new(id, local, remote, Direction::Inbound, PeerState::Handshaking)
    }

    fn new(id: u64, local: &str, remote: &str, direction: Direction, state: PeerState) -> Self {
        debug_assert!(PeerState::Idle.can_transition(state));
        Self {
            id,
            local: local.to_string(),
            remote: remote.to_string(),
            direction,
            state,
            created_at: Instant::now(),
            established_at: None,
            stats: Arc::new(SessionStats::default()),
        }
    }

    /// Session id, unique within one node
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Local username
    #[must_use]
    pub fn local(&self) -> &str {
        &self.local
    }

    /// Remote username
    #[must_use]
    pub fn remote(&self) -> &str {
        &self.remote
    }

    /// Which side dialled
    #[must_use]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> PeerState {
        self.state
    }

    /// Move to `next`
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidState` if the move is not allowed.
    pub fn transition_to(&mut self, next: PeerState) -> Result<(), SessionError> {
        if !self.state.can_transition(next) {
            return Err(SessionError::InvalidState {
                from: self.state,
                to: next,
            });
        }

        tracing::debug!(
            "Session {} ({}): {} -> {}",
            self.id,
            self.remote,
            self.state,
            next
        );
        if next == PeerState::Connected {
            self.established_at = Some(Instant::now());
        }
        self.state = next;
        Ok(())
    }

    /// Time since the attempt started
    #[must_use]
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Time since the handshake completed
    #[must_use]
    pub fn connected_for(&self) -> Option<Duration> {
        self.established_at.map(|t| t.elapsed())
    }

    /// Shared traffic counters
    #[must_use]
    pub fn stats(&self) -> &Arc<SessionStats> {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outbound_happy_path() {
        let mut session = Session::outbound(1, "alice", "bob");
        assert_eq!(session.state(), PeerState::Connecting);
        assert_eq!(session.direction(), Direction::Outbound);

        session.transition_to(PeerState::Handshaking).unwrap();
        assert!(session.connected_for().is_none());
        session.transition_to(PeerState::Connected).unwrap();
        assert!(session.connected_for().is_some());
        session.transition_to(PeerState::Closing).unwrap();
        session.transition_to(PeerState::Idle).unwrap();
    }

    #[test]
    fn test_inbound_starts_handshaking() {
        let session = Session::inbound(2, "bob", "alice");
        assert_eq!(session.state(), PeerState::Handshaking);
        assert_eq!(session.direction(), Direction::Inbound);
    }

    #[test]
    fn test_failed_returns_to_idle() {
        let mut session = Session::outbound(3, "alice", "bob");
        session.transition_to(PeerState::Failed).unwrap();
        assert!(session.transition_to(PeerState::Connected).is_err());
        session.transition_to(PeerState::Idle).unwrap();
    }

    #[test]
    fn test_illegal_transitions_rejected() {
        let mut session = Session::outbound(4, "alice", "bob");
        let err = session.transition_to(PeerState::Connected).unwrap_err();
        assert_eq!(
            err,
            SessionError::InvalidState {
                from: PeerState::Connecting,
                to: PeerState::Connected
            }
        );
        assert_eq!(session.state(), PeerState::Connecting);

        assert!(!PeerState::Connected.can_transition(PeerState::Idle));
        assert!(!PeerState::Closing.can_transition(PeerState::Connected));
        assert!(!PeerState::Idle.can_transition(PeerState::Closing));
    }

    #[test]
    fn test_pending_states() {
        assert!(PeerState::Connecting.is_pending());
        assert!(PeerState::Handshaking.is_pending());
        assert!(!PeerState::Connected.is_pending());
        assert!(!PeerState::Idle.is_pending());
    }

    #[test]
    fn test_stats_snapshot() {
        let session = Session::outbound(5, "alice", "bob");
        session.stats().record_sent(10);
        session.stats().record_sent(5);
        session.stats().record_received(7);

        let snap = session.stats().snapshot();
        assert_eq!(snap.frames_sent, 2);
        assert_eq!(snap.bytes_sent, 15);
        assert_eq!(snap.frames_received, 1);
        assert_eq!(snap.bytes_received, 7);
    }
}
