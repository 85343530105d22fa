//! Registry records and HTTP message definitions.

use crate::error::RegistryError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Minimum username length
pub const MIN_USERNAME_LEN: usize = 3;

/// Maximum username length
pub const MAX_USERNAME_LEN: usize = 32;

/// Kind of front end a peer runs behind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerKind {
    /// Terminal client
    #[default]
    Cli,
    /// Browser front end
    Web,
}

impl fmt::Display for PeerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerKind::Cli => f.write_str("cli"),
            PeerKind::Web => f.write_str("web"),
        }
    }
}

impl std::str::FromStr for PeerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cli" => Ok(PeerKind::Cli),
            "web" => Ok(PeerKind::Web),
            other => Err(format!("unknown peer kind: {other}")),
        }
    }
}

/// A live peer as advertised by the registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerRecord {
    /// Unique username
    pub username: String,
    /// Reachable host or IP address
    pub address: String,
    /// Listening port for direct sessions
    pub port: u16,
    /// Front-end kind
    #[serde(default)]
    pub kind: PeerKind,
    /// Last registration or heartbeat, Unix milliseconds
    pub last_seen: u64,
}

impl PeerRecord {
    /// `address:port` suitable for `TcpStream::connect`
    #[must_use]
    pub fn endpoint(&self) -> String {
        if self.address.contains(':') && !self.address.starts_with('[') {
            format!("[{}]:{}", self.address, self.port)
        } else {
            format!("{}:{}", self.address, self.port)
        }
    }
}

/// Check a username against the registry's naming rules
///
/// # Errors
///
/// Returns `RegistryError::InvalidUsername` for names outside 3–32 characters
/// or containing anything other than ASCII alphanumerics, `_`, `-` and `.`.
pub fn validate_username(username: &str) -> Result<(), RegistryError> {
    let len = username.chars().count();
    let valid_chars = username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));

    if !(MIN_USERNAME_LEN..=MAX_USERNAME_LEN).contains(&len) || !valid_chars {
        return Err(RegistryError::InvalidUsername(username.to_string()));
    }
    Ok(())
}

/// Current wall-clock time in Unix milliseconds
#[must_use]
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// `POST /register` body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    /// Requested username
    pub username: String,
    /// Reachable address
    pub address: String,
    /// Listening port
    pub port: u16,
    /// Front-end kind
    #[serde(default)]
    pub kind: PeerKind,
}

/// Result body for mutating endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterResponse {
    /// Whether the operation succeeded
    pub success: bool,
    /// Reason code on failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// The stored record on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer: Option<PeerRecord>,
}

impl RegisterResponse {
    /// Successful response carrying the stored record
    #[must_use]
    pub fn ok(peer: Option<PeerRecord>) -> Self {
        Self {
            success: true,
            reason: None,
            peer,
        }
    }

    /// Failed response carrying the error's reason code
    #[must_use]
    pub fn err(error: &RegistryError) -> Self {
        Self {
            success: false,
            reason: Some(error.reason().to_string()),
            peer: None,
        }
    }
}

/// `GET /peers` query string
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PeersQuery {
    /// Username to leave out of the listing (usually the caller)
    #[serde(default)]
    pub exclude: Option<String>,
}

/// `GET /health` body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Always `"healthy"` when the server answers
    pub status: String,
    /// Server time, Unix milliseconds
    pub timestamp: u64,
    /// Live record count
    pub peer_count: usize,
}
