//! In-memory peer directory with TTL expiry.
//!
//! Records are stored in a sharded [`DashMap`] keyed by username. Every
//! mutation of a username goes through that key's entry, so register,
//! heartbeat and expiry for one username are serialized while unrelated
//! usernames proceed in parallel on other shards.
//!
//! Expired records are hidden from reads immediately (lazy filtering) and
//! physically removed by [`Registry::sweep`], which the server runs on an
//! interval.

use super::protocol::{PeerKind, PeerRecord, unix_millis, validate_username};
use crate::error::RegistryError;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Registry configuration
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Age after which a record without heartbeat is treated as absent
    pub ttl: Duration,
    /// How often the background sweep removes expired records
    pub sweep_interval: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(15),
        }
    }
}

/// Stored record plus its monotonic freshness stamp
#[derive(Debug, Clone)]
struct RegistryEntry {
    record: PeerRecord,
    refreshed_at: Instant,
}

impl RegistryEntry {
    fn new(record: PeerRecord) -> Self {
        Self {
            record,
            refreshed_at: Instant::now(),
        }
    }

    fn touch(&mut self) {
        self.refreshed_at = Instant::now();
        self.record.last_seen = unix_millis();
    }

    fn is_expired(&self, ttl: Duration) -> bool {
        self.refreshed_at.elapsed() > ttl
    }
}

/// Process-wide directory of live peers
pub struct Registry {
    peers: DashMap<String, RegistryEntry>,
    config: RegistryConfig,
}

impl Registry {
    /// Create an empty registry
    #[must_use]
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            peers: DashMap::new(),
            config,
        }
    }

    /// Registry configuration
    #[must_use]
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Register a peer under a unique username
    ///
    /// An expired record under the same name is replaced.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateUsername` if a live record exists and
    /// `InvalidUsername` if the name fails validation.
    pub fn register(
        &self,
        username: &str,
        address: &str,
        port: u16,
        kind: PeerKind,
    ) -> Result<PeerRecord, RegistryError> {
        validate_username(username)?;

        let record = PeerRecord {
            username: username.to_string(),
            address: address.to_string(),
            port,
            kind,
            last_seen: unix_millis(),
        };

        match self.peers.entry(username.to_string()) {
            Entry::Occupied(mut occupied) => {
                if !occupied.get().is_expired(self.config.ttl) {
                    return Err(RegistryError::DuplicateUsername(username.to_string()));
                }
                tracing::debug!("Replacing expired record for {}", username);
                occupied.insert(RegistryEntry::new(record.clone()));
            }
            Entry::Vacant(vacant) => {
                vacant.insert(RegistryEntry::new(record.clone()));
            }
        }

        tracing::info!(
            "Registered {} at {}:{} ({})",
            username,
            address,
            port,
            kind
        );
        Ok(record)
    }

    /// Refresh a live record's last-seen time
    ///
    /// A heartbeat for a record that has already expired removes it and
    /// fails, so the peer has to register again.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown or expired usernames.
    pub fn heartbeat(&self, username: &str) -> Result<(), RegistryError> {
        match self.peers.entry(username.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired(self.config.ttl) {
                    occupied.remove();
                    tracing::debug!("Heartbeat from expired peer {}", username);
                    return Err(RegistryError::NotFound(username.to_string()));
                }
                occupied.get_mut().touch();
                Ok(())
            }
            Entry::Vacant(_) => Err(RegistryError::NotFound(username.to_string())),
        }
    }

    /// Look up a live record
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown or expired usernames.
    pub fn lookup(&self, username: &str) -> Result<PeerRecord, RegistryError> {
        self.peers
            .get(username)
            .filter(|entry| !entry.is_expired(self.config.ttl))
            .map(|entry| entry.record.clone())
            .ok_or_else(|| RegistryError::NotFound(username.to_string()))
    }

    /// All live records ordered by username, optionally leaving one out
    #[must_use]
    pub fn list(&self, exclude: Option<&str>) -> Vec<PeerRecord> {
        let ttl = self.config.ttl;
        let mut peers: Vec<PeerRecord> = self
            .peers
            .iter()
            .filter(|entry| !entry.is_expired(ttl))
            .filter(|entry| Some(entry.key().as_str()) != exclude)
            .map(|entry| entry.record.clone())
            .collect();
        peers.sort_by(|a, b| a.username.cmp(&b.username));
        peers
    }

    /// Remove a record immediately. Returns true if one was present.
    pub fn deregister(&self, username: &str) -> bool {
        let removed = self.peers.remove(username).is_some();
        if removed {
            tracing::info!("Deregistered {}", username);
        }
        removed
    }

    /// Drop every expired record, returning how many were removed
    pub fn sweep(&self) -> usize {
        let ttl = self.config.ttl;
        let mut removed = 0;
        self.peers.retain(|username, entry| {
            let keep = !entry.is_expired(ttl);
            if !keep {
                tracing::debug!("Expiring {}", username);
                removed += 1;
            }
            keep
        });
        removed
    }

    /// Number of live records
    #[must_use]
    pub fn len(&self) -> usize {
        let ttl = self.config.ttl;
        self.peers.iter().filter(|e| !e.is_expired(ttl)).count()
    }

    /// Returns true if no live records exist
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Spawn the periodic sweep task
    #[must_use]
    pub fn spawn_sweeper(self: &Arc<Self>) -> SweeperHandle {
        let registry = Arc::clone(self);
        let interval = self.config.sweep_interval;
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = registry.sweep();
                        if removed > 0 {
                            tracing::info!("Sweep removed {} expired peers", removed);
                        }
                    }
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });

        SweeperHandle {
            stop: stop_tx,
            task,
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}

/// Handle to a running sweep task
pub struct SweeperHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Stop the sweeper and wait for it to exit
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        let _ = self.task.await;
    }
}
