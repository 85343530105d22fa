//! Two-node test fixture for integration testing
//!
//! Runs a registry over HTTP on loopback and two connection managers,
//! `alice` and `bob`, that reach it through [`RegistryClient`]:
//! - Registration and discovery
//! - Session establishment
//! - Message and file transfers
//!
//! # Example
//!
//! ```no_run
//! use peerlink_integration_tests::fixtures::TwoNodeFixture;
//!
//! #[tokio::test]
//! async fn test_basic_chat() {
//!     let mut fixture = TwoNodeFixture::new().await.unwrap();
//!     fixture.establish_session().await.unwrap();
//!
//!     fixture.alice.send_message("bob", "hi").await.unwrap();
//!     // ... inspect fixture.bob_events ...
//!
//!     fixture.cleanup().await;
//! }
//! ```

use peerlink_core::node::{ConnectionManager, EventReceiver, NodeConfig, NodeError, NodeEvent};
use peerlink_core::PeerState;
use peerlink_discovery::{
    Registry, RegistryClient, RegistryClientConfig, RegistryConfig, RegistryHandle,
    RegistryServer, RetryConfig,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

/// How long helpers wait for an event before failing the test
const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Registry server plus two started and registered peers
pub struct TwoNodeFixture {
    /// Dialling peer
    pub alice: ConnectionManager,
    /// Answering peer
    pub bob: ConnectionManager,
    /// Events published by alice
    pub alice_events: EventReceiver,
    /// Events published by bob
    pub bob_events: EventReceiver,
    /// Registry state behind the HTTP server
    pub registry: Arc<Registry>,
    /// Registry HTTP address
    pub registry_addr: SocketAddr,
    stop: Option<oneshot::Sender<()>>,
}

impl TwoNodeFixture {
    /// Start a registry and register `alice` and `bob`
    ///
    /// # Errors
    ///
    /// Returns an error if a peer cannot start or register.
    pub async fn new() -> Result<Self, NodeError> {
        Self::with_config(RegistryConfig::default(), NodeConfig::loopback()).await
    }

    /// Same as [`TwoNodeFixture::new`] with explicit settings
    ///
    /// # Errors
    ///
    /// Returns an error if a peer cannot start or register.
    pub async fn with_config(
        registry_config: RegistryConfig,
        node_config: NodeConfig,
    ) -> Result<Self, NodeError> {
        let registry = Arc::new(Registry::new(registry_config));
        let server = RegistryServer::bind("127.0.0.1:0".parse().unwrap(), Arc::clone(&registry))
            .await
            .map_err(|e| NodeError::Bind(e.to_string()))?;
        let registry_addr = server
            .local_addr()
            .map_err(|e| NodeError::Bind(e.to_string()))?;

        let (stop_tx, stop_rx) = oneshot::channel();
        tokio::spawn(server.serve(async move {
            let _ = stop_rx.await;
        }));

        let (alice, alice_events) = spawn_peer("alice", registry_addr, node_config.clone()).await?;
        let (bob, bob_events) = spawn_peer("bob", registry_addr, node_config).await?;

        Ok(Self {
            alice,
            bob,
            alice_events,
            bob_events,
            registry,
            registry_addr,
            stop: Some(stop_tx),
        })
    }

    /// Registry client pointed at the fixture's server
    #[must_use]
    pub fn client(&self) -> RegistryClient {
        client_for(self.registry_addr)
    }

    /// Connect alice to bob and drain both `PeerConnected` events
    ///
    /// # Errors
    ///
    /// Returns the connect error.
    pub async fn establish_session(&mut self) -> Result<(), NodeError> {
        self.alice.connect("bob").await?;

        assert_eq!(
            next_event(&mut self.alice_events).await,
            NodeEvent::PeerConnected { peer: "bob".into() }
        );
        assert_eq!(
            next_event(&mut self.bob_events).await,
            NodeEvent::PeerConnected {
                peer: "alice".into()
            }
        );
        wait_for_state(&self.bob, "alice", PeerState::Connected).await;
        Ok(())
    }

    /// Shut both peers and the registry down
    pub async fn cleanup(mut self) {
        let _ = self.alice.shutdown().await;
        let _ = self.bob.shutdown().await;
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}

impl Drop for TwoNodeFixture {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}

fn client_for(addr: SocketAddr) -> RegistryClient {
    RegistryClient::new(RegistryClientConfig {
        base_url: format!("http://{addr}"),
        request_timeout: Duration::from_secs(2),
        retry: RetryConfig::none(),
    })
    .unwrap()
}

async fn spawn_peer(
    name: &str,
    registry_addr: SocketAddr,
    config: NodeConfig,
) -> Result<(ConnectionManager, EventReceiver), NodeError> {
    let registry: Arc<dyn RegistryHandle> = Arc::new(client_for(registry_addr));
    let (manager, events) = ConnectionManager::new(name, config, registry)?;
    manager.start().await?;
    manager.register().await?;
    Ok((manager, events))
}

/// Next event, failing the test after a timeout
pub async fn next_event(events: &mut EventReceiver) -> NodeEvent {
    tokio::time::timeout(EVENT_TIMEOUT, events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

/// Poll until `manager` reports `state` for `peer`
pub async fn wait_for_state(manager: &ConnectionManager, peer: &str, state: PeerState) {
    tokio::time::timeout(EVENT_TIMEOUT, async {
        while manager.state(peer) != state {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("timed out waiting for state");
}
