//! Node layer: the Connection Manager and everything it drives.
//!
//! A node is one local username. It registers with the rendezvous registry,
//! accepts inbound sessions, dials outbound ones, and publishes what happens
//! on those sessions as [`NodeEvent`]s. The [`Bridge`] turns those events and
//! the manager's operations into a JSON command/event protocol for front ends.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                 Bridge (JSON commands/events)            │
//! ├─────────────────────────────────────────────────────────┤
//! │        ConnectionManager (peer table, reconnects)        │
//! ├─────────────────────────────────────────────────────────┤
//! │   Session loops (framing, ping/pong, file reassembly)    │
//! ├─────────────────────────────────────────────────────────┤
//! │          Registry (in-process or over HTTP)              │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use peerlink_core::node::{ConnectionManager, NodeConfig, NodeEvent};
//! use peerlink_discovery::{RegistryClient, RegistryClientConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = Arc::new(RegistryClient::new(RegistryClientConfig::default())?);
//!     let (alice, mut events) = ConnectionManager::new("alice", NodeConfig::default(), registry)?;
//!
//!     alice.start().await?;
//!     alice.register().await?;
//!     alice.connect("bob").await?;
//!     alice.send_message("bob", "hi").await?;
//!
//!     while let Some(event) = events.recv().await {
//!         if let NodeEvent::MessageReceived { from, text, .. } = event {
//!             println!("{from}: {text}");
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod bridge;
pub mod config;
mod connection;
pub mod error;
pub mod events;
mod manager;

pub use bridge::{Bridge, BridgeCommand, BridgeEvent};
pub use config::{DEFAULT_PORT, NodeConfig, SessionConfig, TransferConfig};
pub use error::{ConnectionError, NodeError, Result};
pub use events::{EventReceiver, EventSender, NodeEvent};
pub use manager::ConnectionManager;
