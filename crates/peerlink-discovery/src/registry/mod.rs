//! Rendezvous registry: directory, HTTP server and HTTP client.

mod client;
mod directory;
pub mod protocol;
mod server;

pub use client::{RegistryClient, RegistryClientConfig};
pub use directory::{Registry, RegistryConfig, SweeperHandle};
pub use protocol::{PeerKind, PeerRecord};
pub use server::RegistryServer;

use crate::error::RegistryError;
use async_trait::async_trait;
use std::sync::Arc;

/// Operations a peer needs from the registry, local or remote
#[async_trait]
pub trait RegistryHandle: Send + Sync {
    /// Register under a unique username
    async fn register(
        &self,
        username: &str,
        address: &str,
        port: u16,
        kind: PeerKind,
    ) -> Result<PeerRecord, RegistryError>;

    /// Refresh the caller's record
    async fn heartbeat(&self, username: &str) -> Result<(), RegistryError>;

    /// Resolve a username to a live record
    async fn lookup(&self, username: &str) -> Result<PeerRecord, RegistryError>;

    /// List live peers, leaving out `exclude`
    async fn list(&self, exclude: Option<&str>) -> Result<Vec<PeerRecord>, RegistryError>;

    /// Remove the caller's record
    async fn deregister(&self, username: &str) -> Result<(), RegistryError>;
}

#[async_trait]
impl RegistryHandle for Registry {
    async fn register(
        &self,
        username: &str,
        address: &str,
        port: u16,
        kind: PeerKind,
    ) -> Result<PeerRecord, RegistryError> {
        Registry::register(self, username, address, port, kind)
    }

    async fn heartbeat(&self, username: &str) -> Result<(), RegistryError> {
        Registry::heartbeat(self, username)
    }

    async fn lookup(&self, username: &str) -> Result<PeerRecord, RegistryError> {
        Registry::lookup(self, username)
    }

    async fn list(&self, exclude: Option<&str>) -> Result<Vec<PeerRecord>, RegistryError> {
        Ok(Registry::list(self, exclude))
    }

    async fn deregister(&self, username: &str) -> Result<(), RegistryError> {
        Registry::deregister(self, username);
        Ok(())
    }
}

#[async_trait]
impl<T: RegistryHandle + ?Sized> RegistryHandle for Arc<T> {
    async fn register(
        &self,
        username: &str,
        address: &str,
        port: u16,
        kind: PeerKind,
    ) -> Result<PeerRecord, RegistryError> {
        (**self).register(username, address, port, kind).await
    }

    async fn heartbeat(&self, username: &str) -> Result<(), RegistryError> {
        (**self).heartbeat(username).await
    }

    async fn lookup(&self, username: &str) -> Result<PeerRecord, RegistryError> {
        (**self).lookup(username).await
    }

    async fn list(&self, exclude: Option<&str>) -> Result<Vec<PeerRecord>, RegistryError> {
        (**self).list(exclude).await
    }

    async fn deregister(&self, username: &str) -> Result<(), RegistryError> {
        (**self).deregister(username).await
    }
}
