//! Configuration system for the PeerLink CLI.

use peerlink_core::node::{NodeConfig as CoreNodeConfig, TransferConfig as CoreTransferConfig};
use peerlink_discovery::{
    PeerKind, RegistryClientConfig, RegistryConfig as CoreRegistryConfig, RetryConfig,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// PeerLink configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Node configuration
    #[serde(default)]
    pub node: NodeConfig,
    /// Registry configuration
    #[serde(default)]
    pub registry: RegistryConfig,
    /// Transfer configuration
    #[serde(default)]
    pub transfer: TransferConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Username to register when none is given on the command line
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Listen address for direct sessions
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Address advertised in the registry
    #[serde(skip_serializing_if = "Option::is_none")]
    pub advertise_addr: Option<String>,
    /// Front-end kind advertised in the registry
    #[serde(default)]
    pub kind: PeerKind,
    /// Registry heartbeat interval in seconds
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
    /// Automatic reconnection attempts after an unexpected drop
    #[serde(default = "default_reconnect_attempts")]
    pub reconnect_attempts: u32,
}

/// Registry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Registry base URL used by peers
    #[serde(default = "default_registry_url")]
    pub url: String,
    /// Bind address for `peerlink registry`
    #[serde(default = "default_registry_bind")]
    pub bind_addr: String,
    /// Record time-to-live in seconds
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    /// Expired-record sweep interval in seconds
    #[serde(default = "default_sweep_secs")]
    pub sweep_secs: u64,
    /// HTTP request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Retries before the registry is reported unreachable
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

/// Transfer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Chunk size in bytes
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Largest file sent or accepted, in bytes
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    /// Directory received files are written to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_dir: Option<PathBuf>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values

fn default_listen_addr() -> String {
    "0.0.0.0:5000".to_string()
}

fn default_heartbeat_secs() -> u64 {
    20
}

fn default_reconnect_attempts() -> u32 {
    3
}

fn default_registry_url() -> String {
    "http://127.0.0.1:8080".to_string()
}

fn default_registry_bind() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_ttl_secs() -> u64 {
    60
}

fn default_sweep_secs() -> u64 {
    15
}

fn default_request_timeout_secs() -> u64 {
    5
}

fn default_max_retries() -> u32 {
    3
}

fn default_chunk_size() -> usize {
    peerlink_files::DEFAULT_CHUNK_SIZE
}

fn default_max_file_size() -> u64 {
    peerlink_files::MAX_FILE_SIZE
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            username: None,
            listen_addr: default_listen_addr(),
            advertise_addr: None,
            kind: PeerKind::Cli,
            heartbeat_secs: default_heartbeat_secs(),
            reconnect_attempts: default_reconnect_attempts(),
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            url: default_registry_url(),
            bind_addr: default_registry_bind(),
            ttl_secs: default_ttl_secs(),
            sweep_secs: default_sweep_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            max_file_size: default_max_file_size(),
            download_dir: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;

        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(path, contents)?;
        Ok(())
    }

    /// Get default config path
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("peerlink/config.toml")
    }

    /// Load config from default path, or create default if it doesn't exist
    ///
    /// # Errors
    ///
    /// Returns an error if reading or creating the config fails.
    pub fn load_or_default() -> anyhow::Result<Self> {
        let path = Self::default_path();

        if path.exists() {
            Self::load(&path)
        } else {
            let config = Self::default();
            config.save(&path)?;
            Ok(config)
        }
    }

    /// Parse the node listen address
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be parsed.
    pub fn parse_listen_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.node.listen_addr.parse()?)
    }

    /// Parse the registry server bind address
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be parsed.
    pub fn parse_registry_bind(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.registry.bind_addr.parse()?)
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns an error if configuration is invalid.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.parse_listen_addr()?;
        self.parse_registry_bind()?;

        if let Some(username) = &self.node.username {
            peerlink_discovery::registry::protocol::validate_username(username)?;
        }

        if !self.registry.url.starts_with("http://") && !self.registry.url.starts_with("https://") {
            anyhow::bail!("Registry URL must start with http:// or https://");
        }

        if self.registry.ttl_secs == 0 {
            anyhow::bail!("Registry TTL must be at least 1 second");
        }
        if self.node.heartbeat_secs == 0 || self.node.heartbeat_secs >= self.registry.ttl_secs {
            anyhow::bail!(
                "Heartbeat interval must be between 1 and {} seconds (the registry TTL)",
                self.registry.ttl_secs - 1
            );
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!(
                "Invalid log level: {}. Must be one of: {}",
                self.logging.level,
                valid_log_levels.join(", ")
            );
        }

        let max_chunk = peerlink_core::MAX_FRAME_SIZE - peerlink_core::FRAME_HEADER_SIZE;
        if self.transfer.chunk_size == 0 || self.transfer.chunk_size > max_chunk {
            anyhow::bail!("Chunk size must be between 1 and {} bytes", max_chunk);
        }

        let max_file = peerlink_files::MAX_FILE_SIZE;
        if self.transfer.max_file_size == 0 || self.transfer.max_file_size > max_file {
            anyhow::bail!(
                "Max file size must be between 1 and {} bytes",
                peerlink_files::MAX_FILE_SIZE
            );
        }

        Ok(())
    }

    /// Node settings for the connection manager
    ///
    /// # Errors
    ///
    /// Returns an error if the listen address cannot be parsed.
    pub fn node_config(&self) -> anyhow::Result<CoreNodeConfig> {
        let defaults = CoreNodeConfig::default();
        Ok(CoreNodeConfig {
            listen_addr: self.parse_listen_addr()?,
            advertise_addr: self.node.advertise_addr.clone(),
            kind: self.node.kind,
            session: defaults.session,
            transfer: CoreTransferConfig {
                chunk_size: self.transfer.chunk_size,
                max_file_size: self.transfer.max_file_size,
            },
            heartbeat_interval: Duration::from_secs(self.node.heartbeat_secs),
            reconnect: RetryConfig {
                max_retries: self.node.reconnect_attempts,
                ..defaults.reconnect
            },
        })
    }

    /// Settings for an in-process registry
    #[must_use]
    pub fn registry_config(&self) -> CoreRegistryConfig {
        CoreRegistryConfig {
            ttl: Duration::from_secs(self.registry.ttl_secs),
            sweep_interval: Duration::from_secs(self.registry.sweep_secs.max(1)),
        }
    }

    /// Settings for the registry HTTP client
    #[must_use]
    pub fn client_config(&self, url_override: Option<&str>) -> RegistryClientConfig {
        let defaults = RegistryClientConfig::default();
        RegistryClientConfig {
            base_url: url_override.unwrap_or(&self.registry.url).to_string(),
            request_timeout: Duration::from_secs(self.registry.request_timeout_secs),
            retry: RetryConfig {
                max_retries: self.registry.max_retries,
                ..defaults.retry
            },
        }
    }
}
