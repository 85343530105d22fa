//! Node configuration

use peerlink_discovery::{PeerKind, RetryConfig};
use peerlink_files::{DEFAULT_CHUNK_SIZE, MAX_FILE_SIZE};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Default listening port for direct sessions
pub const DEFAULT_PORT: u16 = 5000;

/// Node configuration
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Listen address for incoming sessions
    pub listen_addr: SocketAddr,

    /// Address advertised in the registry; derived from the listener if unset
    pub advertise_addr: Option<String>,

    /// Front-end kind advertised in the registry
    pub kind: PeerKind,

    /// Session configuration
    pub session: SessionConfig,

    /// Transfer configuration
    pub transfer: TransferConfig,

    /// How often the registry record is refreshed
    pub heartbeat_interval: Duration,

    /// Automatic reconnection after an unexpected drop
    pub reconnect: RetryConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_PORT),
            advertise_addr: None,
            kind: PeerKind::Cli,
            session: SessionConfig::default(),
            transfer: TransferConfig::default(),
            heartbeat_interval: Duration::from_secs(20),
            reconnect: RetryConfig {
                max_retries: 3,
                initial_backoff: Duration::from_millis(500),
                max_backoff: Duration::from_secs(8),
                multiplier: 2.0,
                jitter: true,
            },
        }
    }
}

impl NodeConfig {
    /// Loopback listener on an ephemeral port
    #[must_use]
    pub fn loopback() -> Self {
        Self {
            listen_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0),
            ..Self::default()
        }
    }
}

/// Per-session timing and queue limits
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Bound on the dial plus the handshake exchange
    pub handshake_timeout: Duration,

    /// Interval between liveness pings
    pub ping_interval: Duration,

    /// Time allowed for a pong before the session is declared dead
    pub pong_timeout: Duration,

    /// Outbound queue capacity, in frames
    pub outbound_queue: usize,

    /// How long a sender waits for queue space or a socket write
    pub write_stall_timeout: Duration,

    /// Largest frame accepted from the wire
    pub max_frame_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(5),
            ping_interval: Duration::from_secs(15),
            pong_timeout: Duration::from_secs(10),
            outbound_queue: 256,
            write_stall_timeout: Duration::from_secs(10),
            max_frame_size: crate::MAX_FRAME_SIZE,
        }
    }
}

/// File transfer configuration
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Chunk size for outgoing files
    pub chunk_size: usize,

    /// Largest file sent or accepted
    pub max_file_size: u64,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_file_size: MAX_FILE_SIZE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = NodeConfig::default();
        assert_eq!(config.listen_addr.port(), DEFAULT_PORT);
        assert_eq!(config.session.handshake_timeout, Duration::from_secs(5));
        assert_eq!(config.session.ping_interval, Duration::from_secs(15));
        assert_eq!(config.session.pong_timeout, Duration::from_secs(10));
        assert_eq!(config.session.outbound_queue, 256);
        assert_eq!(config.transfer.max_file_size, 10 * 1024 * 1024);
        assert_eq!(config.reconnect.max_retries, 3);
    }

    #[test]
    fn test_chunks_fit_in_frames() {
        let config = NodeConfig::default();
        assert!(config.transfer.chunk_size < config.session.max_frame_size);
    }

    #[test]
    fn test_loopback_uses_ephemeral_port() {
        let config = NodeConfig::loopback();
        assert!(config.listen_addr.ip().is_loopback());
        assert_eq!(config.listen_addr.port(), 0);
    }
}
