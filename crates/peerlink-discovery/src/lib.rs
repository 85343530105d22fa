//! # PeerLink Discovery
//!
//! Rendezvous layer for the PeerLink protocol.
//!
//! Peers register a reachable `address:port` under a unique username, look
//! each other up, and then connect directly. Payload data never passes
//! through the registry.
//!
//! This crate provides:
//! - An in-memory peer directory with TTL expiry ([`Registry`])
//! - The HTTP surface serving that directory ([`RegistryServer`])
//! - An HTTP client with bounded retries ([`RegistryClient`])
//! - The [`RegistryHandle`] trait both sides implement, so peers can be
//!   wired to an in-process registry in tests and a remote one in production
//!
//! ## Example
//!
//! ```rust,no_run
//! use peerlink_discovery::{PeerKind, Registry, RegistryConfig};
//!
//! let registry = Registry::new(RegistryConfig::default());
//! registry.register("alice", "10.0.0.2", 5000, PeerKind::Cli).unwrap();
//! assert_eq!(registry.lookup("alice").unwrap().port, 5000);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod registry;
pub mod retry;

pub use error::RegistryError;
pub use registry::{
    PeerKind, PeerRecord, Registry, RegistryClient, RegistryClientConfig, RegistryConfig,
    RegistryHandle, RegistryServer, SweeperHandle,
};
pub use retry::RetryConfig;
