//! JSON command/event adapter for front ends.
//!
//! A front end (terminal or browser) talks to the node through
//! [`BridgeCommand`]s and receives [`BridgeEvent`]s. Both are JSON objects
//! tagged with `"type"`. File contents cross this boundary as base64 text;
//! everything below it works on raw bytes.
//!
//! The Bridge never carries chat or file payloads on behalf of other peers.
//! Every payload travels on a direct session opened by the
//! [`ConnectionManager`].

use super::config::NodeConfig;
use super::error::NodeError;
use super::events::{EventReceiver, NodeEvent};
use super::manager::ConnectionManager;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use peerlink_discovery::{PeerRecord, RegistryHandle};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Command issued by a front end
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeCommand {
    /// Claim a username and start accepting sessions
    Register {
        /// Username to claim
        username: String,
    },
    /// List live peers
    GetPeers,
    /// Open a session
    ConnectToPeer {
        /// Remote username
        target: String,
    },
    /// Send a chat message
    SendMessage {
        /// Remote username
        to: String,
        /// Message text
        message: String,
    },
    /// Send a file
    SendFile {
        /// Remote username
        to: String,
        /// File name shown to the receiver
        filename: String,
        /// File contents, base64
        data: String,
    },
    /// Close a session
    DisconnectUser {
        /// Remote username
        username: String,
    },
}

/// Event delivered to a front end
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeEvent {
    /// Outcome of `register`
    RegistrationResult {
        /// Whether the username was claimed
        success: bool,
        /// Requested username
        username: String,
        /// Reason code on failure
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    /// Outcome of `get_peers`
    PeersList {
        /// Live peers, excluding ourselves
        peers: Vec<PeerRecord>,
    },
    /// Outcome of `connect_to_peer`
    ConnectionResult {
        /// Remote username
        peer: String,
        /// Whether the session is established
        success: bool,
        /// Reason code on failure
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    /// Session established, in either direction
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
        message: String,
        /// Receive time, Unix milliseconds
        timestamp: u64,
    },
    /// Outcome of `send_message`
    MessageSent {
        /// Recipient
        to: String,
        /// Whether the message was queued on the session
        success: bool,
        /// Reason code on failure
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    /// File arrived intact
    FileReceived {
        /// Sender
        from: String,
        /// Sanitized file name
        filename: String,
        /// Size in bytes
        size: u64,
        /// BLAKE3 checksum, hex
        checksum: String,
        /// File contents, base64
        data: String,
    },
    /// Outcome of `send_file`
    FileSent {
        /// Recipient
        to: String,
        /// File name
        filename: String,
        /// Size in bytes
        size: u64,
        /// Whether every frame was queued
        success: bool,
        /// Reason code on failure
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    /// Incoming file was rejected or aborted
    FileFailed {
        /// Sender
        from: String,
        /// File name, when known
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
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
    /// Command could not be parsed or is not allowed yet
    CommandError {
        /// Reason code
        reason: String,
        /// Human-readable detail
        message: String,
    },
}

impl From<NodeEvent> for BridgeEvent {
    fn from(event: NodeEvent) -> Self {
        match event {
            NodeEvent::PeerConnected { peer } => BridgeEvent::PeerConnected { peer },
            NodeEvent::PeerDisconnected { peer, reason } => {
                BridgeEvent::PeerDisconnected { peer, reason }
            }
            NodeEvent::MessageReceived {
                from,
                text,
                timestamp,
            } => BridgeEvent::MessageReceived {
                from,
                message: text,
                timestamp,
            },
            NodeEvent::FileReceived {
                from,
                name,
                data,
                checksum,
            } => BridgeEvent::FileReceived {
                from,
                filename: name,
                size: data.len() as u64,
                checksum: checksum.to_hex(),
                data: BASE64.encode(&data),
            },
            NodeEvent::FileFailed { from, name, reason } => BridgeEvent::FileFailed {
                from,
                filename: name,
                reason,
            },
            NodeEvent::ReconnectFailed { peer, attempts } => {
                BridgeEvent::ReconnectFailed { peer, attempts }
            }
        }
    }
}

/// Front-end adapter over one [`ConnectionManager`]
///
/// The manager is created by the first successful `register` command.
pub struct Bridge {
    config: NodeConfig,
    registry: Arc<dyn RegistryHandle>,
    manager: Option<ConnectionManager>,
    events: mpsc::UnboundedSender<BridgeEvent>,
    forwarder: Option<JoinHandle<()>>,
}

impl Bridge {
    /// Create a bridge; events arrive on the returned receiver
    #[must_use]
    pub fn new(
        config: NodeConfig,
        registry: Arc<dyn RegistryHandle>,
    ) -> (Self, mpsc::UnboundedReceiver<BridgeEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        (
            Self {
                config,
                registry,
                manager: None,
                events,
                forwarder: None,
            },
            events_rx,
        )
    }

    /// The manager, once registered
    #[must_use]
    pub fn manager(&self) -> Option<&ConnectionManager> {
        self.manager.as_ref()
    }

    /// Parse one JSON command and handle it
    ///
    /// Malformed input produces a `command_error` event.
    pub async fn handle_json(&mut self, line: &str) {
        match serde_json::from_str::<BridgeCommand>(line) {
            Ok(command) => self.handle(command).await,
            Err(e) => {
                tracing::debug!("Rejected bridge input: {}", e);
                self.emit(BridgeEvent::CommandError {
                    reason: "invalid-command".into(),
                    message: e.to_string(),
                });
            }
        }
    }

    /// Handle one command; the outcome is reported as an event
    pub async fn handle(&mut self, command: BridgeCommand) {
        tracing::debug!("Bridge command: {:?}", CommandKind(&command));

        if let BridgeCommand::Register { username } = command {
            let event = self.register(username).await;
            self.emit(event);
            return;
        }

        let Some(manager) = self.manager.clone() else {
            self.emit(BridgeEvent::CommandError {
                reason: NodeError::NotRegistered.reason().into(),
                message: "register a username first".into(),
            });
            return;
        };

        let event = match command {
            BridgeCommand::Register { .. } => return,
            BridgeCommand::GetPeers => match manager.peers().await {
                Ok(peers) => BridgeEvent::PeersList { peers },
                Err(e) => BridgeEvent::CommandError {
                    reason: e.reason().into(),
                    message: e.to_string(),
                },
            },
            BridgeCommand::ConnectToPeer { target } => {
                let result = manager.connect(&target).await;
                BridgeEvent::ConnectionResult {
                    peer: target,
                    success: result.is_ok(),
                    reason: failure_reason(&result),
                }
            }
            BridgeCommand::SendMessage { to, message } => {
                let result = manager.send_message(&to, &message).await;
                BridgeEvent::MessageSent {
                    to,
                    success: result.is_ok(),
                    reason: failure_reason(&result),
                }
            }
            BridgeCommand::SendFile { to, filename, data } => match BASE64.decode(data.as_bytes()) {
                Ok(bytes) => {
                    let size = bytes.len() as u64;
                    let result = manager.send_file(&to, &filename, bytes).await;
                    BridgeEvent::FileSent {
                        to,
                        filename,
                        size,
                        success: result.is_ok(),
                        reason: failure_reason(&result),
                    }
                }
                Err(_) => BridgeEvent::FileSent {
                    to,
                    filename,
                    size: 0,
                    success: false,
                    reason: Some("invalid-encoding".into()),
                },
            },
            BridgeCommand::DisconnectUser { username } => match manager.disconnect(&username).await
            {
                Ok(()) => return,
                Err(e) => BridgeEvent::CommandError {
                    reason: e.reason().into(),
                    message: e.to_string(),
                },
            },
        };
        self.emit(event);
    }

    /// Shut the manager down and stop forwarding events
    pub async fn shutdown(&mut self) {
        if let Some(manager) = self.manager.take() {
            let _ = manager.shutdown().await;
        }
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
    }

    async fn register(&mut self, username: String) -> BridgeEvent {
        if let Some(manager) = &self.manager {
            let reason = if manager.username() == username {
                "already-registered"
            } else {
                "username-locked"
            };
            return BridgeEvent::RegistrationResult {
                success: false,
                username,
                reason: Some(reason.into()),
            };
        }

        match self.start_manager(&username).await {
            Ok((manager, node_events)) => {
                self.forwarder = Some(tokio::spawn(forward(node_events, self.events.clone())));
                self.manager = Some(manager);
                BridgeEvent::RegistrationResult {
                    success: true,
                    username,
                    reason: None,
                }
            }
            Err(e) => {
                tracing::warn!("Registration of {} failed: {}", username, e);
                BridgeEvent::RegistrationResult {
                    success: false,
                    username,
                    reason: Some(e.reason().into()),
                }
            }
        }
    }

    async fn start_manager(
        &self,
        username: &str,
    ) -> Result<(ConnectionManager, EventReceiver), NodeError> {
        let (manager, node_events) = ConnectionManager::new(
            username,
            self.config.clone(),
            Arc::clone(&self.registry),
        )?;
        manager.start().await?;
        if let Err(e) = manager.register().await {
            let _ = manager.shutdown().await;
            return Err(e);
        }
        Ok((manager, node_events))
    }

    fn emit(&self, event: BridgeEvent) {
        let _ = self.events.send(event);
    }
}

async fn forward(mut node_events: EventReceiver, events: mpsc::UnboundedSender<BridgeEvent>) {
    while let Some(event) = node_events.recv().await {
        if events.send(event.into()).is_err() {
            break;
        }
    }
}

fn failure_reason<T>(result: &Result<T, NodeError>) -> Option<String> {
    result.as_ref().err().map(|e| e.reason().to_string())
}

/// Logs a command without its payload
struct CommandKind<'a>(&'a BridgeCommand);

impl std::fmt::Debug for CommandKind<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            BridgeCommand::Register { username } => write!(f, "register({username})"),
            BridgeCommand::GetPeers => write!(f, "get_peers"),
            BridgeCommand::ConnectToPeer { target } => write!(f, "connect_to_peer({target})"),
            BridgeCommand::SendMessage { to, .. } => write!(f, "send_message({to})"),
            BridgeCommand::SendFile { to, filename, .. } => {
                write!(f, "send_file({to}, {filename})")
            }
            BridgeCommand::DisconnectUser { username } => write!(f, "disconnect_user({username})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use peerlink_discovery::{Registry, RegistryConfig};
    use std::time::Duration;
    use tokio::time::timeout;

    fn bridge(registry: &Arc<Registry>) -> (Bridge, mpsc::UnboundedReceiver<BridgeEvent>) {
        Bridge::new(
            NodeConfig::loopback(),
            Arc::clone(registry) as Arc<dyn RegistryHandle>,
        )
    }

    async fn next(events: &mut mpsc::UnboundedReceiver<BridgeEvent>) -> BridgeEvent {
        timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("event timeout")
            .expect("channel closed")
    }

    async fn registered(
        name: &str,
        registry: &Arc<Registry>,
    ) -> (Bridge, mpsc::UnboundedReceiver<BridgeEvent>) {
        let (mut bridge, mut events) = bridge(registry);
        bridge
            .handle(BridgeCommand::Register {
                username: name.into(),
            })
            .await;
        assert!(matches!(
            next(&mut events).await,
            BridgeEvent::RegistrationResult { success: true, .. }
        ));
        (bridge, events)
    }

    #[test]
    fn test_command_json_shape() {
        let command: BridgeCommand =
            serde_json::from_str(r#"{"type":"connect_to_peer","target":"bob"}"#).unwrap();
        assert_eq!(
            command,
            BridgeCommand::ConnectToPeer {
                target: "bob".into()
            }
        );

        let command: BridgeCommand = serde_json::from_str(r#"{"type":"get_peers"}"#).unwrap();
        assert_eq!(command, BridgeCommand::GetPeers);
    }

    #[test]
    fn test_event_json_shape() {
        let event = BridgeEvent::ConnectionResult {
            peer: "carol".into(),
            success: false,
            reason: Some("not-found".into()),
        };
        let json: serde_json::Value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "type": "connection_result",
                "peer": "carol",
                "success": false,
                "reason": "not-found",
            })
        );

        let json = serde_json::to_value(BridgeEvent::MessageSent {
            to: "bob".into(),
            success: true,
            reason: None,
        })
        .unwrap();
        assert!(json.get("reason").is_none());
    }

    #[test]
    fn test_file_event_is_base64() {
        let data = b"hello".to_vec();
        let event: BridgeEvent = NodeEvent::FileReceived {
            from: "alice".into(),
            name: "a.txt".into(),
            checksum: peerlink_files::checksum(&data),
            data,
        }
        .into();
        match event {
            BridgeEvent::FileReceived { data, size, .. } => {
                assert_eq!(data, "aGVsbG8=");
                assert_eq!(size, 5);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_commands_require_registration() {
        let registry = Arc::new(Registry::new(RegistryConfig::default()));
        let (mut bridge, mut events) = bridge(&registry);

        bridge.handle(BridgeCommand::GetPeers).await;
        assert_eq!(
            next(&mut events).await,
            BridgeEvent::CommandError {
                reason: "not-registered".into(),
                message: "register a username first".into(),
            }
        );
    }

    #[tokio::test]
    async fn test_malformed_json() {
        let registry = Arc::new(Registry::new(RegistryConfig::default()));
        let (mut bridge, mut events) = bridge(&registry);

        bridge.handle_json("{\"type\":\"launch\"}").await;
        match next(&mut events).await {
            BridgeEvent::CommandError { reason, .. } => assert_eq!(reason, "invalid-command"),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_duplicate_registration() {
        let registry = Arc::new(Registry::new(RegistryConfig::default()));
        let (_alice, _a) = registered("alice", &registry).await;
        let (mut other, mut events) = bridge(&registry);

        other
            .handle(BridgeCommand::Register {
                username: "alice".into(),
            })
            .await;
        assert_eq!(
            next(&mut events).await,
            BridgeEvent::RegistrationResult {
                success: false,
                username: "alice".into(),
                reason: Some("duplicate-username".into()),
            }
        );
        assert!(other.manager().is_none());
    }

    #[tokio::test]
    async fn test_connect_unknown_peer() {
        let registry = Arc::new(Registry::new(RegistryConfig::default()));
        let (mut alice, mut events) = registered("alice", &registry).await;

        alice
            .handle_json(r#"{"type":"connect_to_peer","target":"carol"}"#)
            .await;
        assert_eq!(
            next(&mut events).await,
            BridgeEvent::ConnectionResult {
                peer: "carol".into(),
                success: false,
                reason: Some("not-found".into()),
            }
        );
    }

    #[tokio::test]
    async fn test_alice_bob_chat_and_disconnect() {
        let registry = Arc::new(Registry::new(RegistryConfig::default()));
        let (mut alice, mut alice_events) = registered("alice", &registry).await;
        let (mut bob, mut bob_events) = registered("bob", &registry).await;

        alice.handle(BridgeCommand::GetPeers).await;
        match next(&mut alice_events).await {
            BridgeEvent::PeersList { peers } => {
                let names: Vec<_> = peers.iter().map(|p| p.username.as_str()).collect();
                assert_eq!(names, vec!["bob"]);
            }
            other => panic!("unexpected event {other:?}"),
        }

        alice
            .handle(BridgeCommand::ConnectToPeer {
                target: "bob".into(),
            })
            .await;
        let mut saw_result = false;
        let mut saw_connected = false;
        while !(saw_result && saw_connected) {
            match next(&mut alice_events).await {
                BridgeEvent::ConnectionResult { success, .. } => {
                    assert!(success);
                    saw_result = true;
                }
                BridgeEvent::PeerConnected { peer } => {
                    assert_eq!(peer, "bob");
                    saw_connected = true;
                }
                other => panic!("unexpected event {other:?}"),
            }
        }
        assert_eq!(
            next(&mut bob_events).await,
            BridgeEvent::PeerConnected {
                peer: "alice".into()
            }
        );

        alice
            .handle(BridgeCommand::SendMessage {
                to: "bob".into(),
                message: "hi".into(),
            })
            .await;
        assert!(matches!(
            next(&mut alice_events).await,
            BridgeEvent::MessageSent { success: true, .. }
        ));
        match next(&mut bob_events).await {
            BridgeEvent::MessageReceived { from, message, .. } => {
                assert_eq!(from, "alice");
                assert_eq!(message, "hi");
            }
            other => panic!("unexpected event {other:?}"),
        }

        alice
            .handle(BridgeCommand::SendFile {
                to: "bob".into(),
                filename: "notes.txt".into(),
                data: BASE64.encode(b"file body"),
            })
            .await;
        assert!(matches!(
            next(&mut alice_events).await,
            BridgeEvent::FileSent {
                success: true,
                size: 9,
                ..
            }
        ));
        match next(&mut bob_events).await {
            BridgeEvent::FileReceived { filename, data, .. } => {
                assert_eq!(filename, "notes.txt");
                assert_eq!(BASE64.decode(data).unwrap(), b"file body");
            }
            other => panic!("unexpected event {other:?}"),
        }

        alice
            .handle(BridgeCommand::DisconnectUser {
                username: "bob".into(),
            })
            .await;
        match next(&mut bob_events).await {
            BridgeEvent::PeerDisconnected { peer, .. } => assert_eq!(peer, "alice"),
            other => panic!("unexpected event {other:?}"),
        }

        alice.shutdown().await;
        bob.shutdown().await;
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_send_file_bad_base64() {
        let registry = Arc::new(Registry::new(RegistryConfig::default()));
        let (mut alice, mut events) = registered("alice", &registry).await;

        alice
            .handle(BridgeCommand::SendFile {
                to: "bob".into(),
                filename: "x".into(),
                data: "!!not base64!!".into(),
            })
            .await;
        match next(&mut events).await {
            BridgeEvent::FileSent { success, reason, .. } => {
                assert!(!success);
                assert_eq!(reason.as_deref(), Some("invalid-encoding"));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
}
