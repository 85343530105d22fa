//! Connection manager: one local peer, many sessions.
//!
//! The manager owns the session table for a single local username. It
//! accepts inbound sessions, dials outbound ones after resolving the target
//! through the registry, tracks each remote peer's [`PeerState`], and
//! reconnects outbound sessions that drop unexpectedly.

use super::config::NodeConfig;
use super::connection::{
    SessionClosed, SessionHandle, SessionParams, initiate_handshake, read_handshake,
    send_handshake, spawn_session,
};
use super::error::{ConnectionError, NodeError, Result};
use super::events::{EventReceiver, EventSender, NodeEvent, emit};
use crate::frame::{Frame, Handshake};
use crate::session::{Direction, PeerState, Session, StatsSnapshot};
use crate::transfer::validate_message;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use peerlink_discovery::registry::protocol::validate_username;
use peerlink_discovery::{PeerRecord, RegistryError, RegistryHandle};
use peerlink_files::{Checksum, FileChunker, LoadedFile};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;

/// Table entry for a remote peer that is not `Idle`
struct PeerSlot {
    session: Session,
    /// Cancels a pending dial or handshake
    cancel: watch::Sender<bool>,
    handle: Option<SessionHandle>,
}

/// Manager inner state
struct ManagerInner {
    username: String,
    config: NodeConfig,
    registry: Arc<dyn RegistryHandle>,
    events: EventSender,
    slots: DashMap<String, PeerSlot>,
    /// Bumped whenever a slot is removed
    slot_changes: watch::Sender<u64>,
    reconnects: DashMap<String, (u64, watch::Sender<bool>)>,
    next_id: AtomicU64,
    running: AtomicBool,
    registered: AtomicBool,
    heartbeat_started: AtomicBool,
    local_addr: OnceLock<SocketAddr>,
    shutdown: watch::Sender<bool>,
    closed_tx: mpsc::UnboundedSender<SessionClosed>,
    closed_rx: Mutex<Option<mpsc::UnboundedReceiver<SessionClosed>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Manages all sessions of one local peer
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<ManagerInner>,
}

impl ConnectionManager {
    /// Create a manager for `username`
    ///
    /// Returns the manager and the receiving end of its event channel.
    ///
    /// # Errors
    ///
    /// Returns `InvalidUsername` if the name fails registry validation.
    pub fn new(
        username: impl Into<String>,
        config: NodeConfig,
        registry: Arc<dyn RegistryHandle>,
    ) -> Result<(Self, EventReceiver)> {
        let username = username.into();
        validate_username(&username)?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (closed_tx, closed_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = watch::channel(false);
        let (slot_changes, _) = watch::channel(0);

        let inner = ManagerInner {
            username,
            config,
            registry,
            events: events_tx,
            slots: DashMap::new(),
            slot_changes,
            reconnects: DashMap::new(),
            next_id: AtomicU64::new(1),
            running: AtomicBool::new(false),
            registered: AtomicBool::new(false),
            heartbeat_started: AtomicBool::new(false),
            local_addr: OnceLock::new(),
            shutdown: shutdown_tx,
            closed_tx,
            closed_rx: Mutex::new(Some(closed_rx)),
            tasks: Mutex::new(Vec::new()),
        };

        Ok((
            Self {
                inner: Arc::new(inner),
            },
            events_rx,
        ))
    }

    /// Local username
    #[must_use]
    pub fn username(&self) -> &str {
        &self.inner.username
    }

    /// Configuration
    #[must_use]
    pub fn config(&self) -> &NodeConfig {
        &self.inner.config
    }

    /// Address the listener is bound to, once started
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.local_addr.get().copied()
    }

    /// Returns true between `start()` and `shutdown()`
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// Bind the listener and start accepting sessions
    ///
    /// # Errors
    ///
    /// Returns `AlreadyStarted` on a second call and `Bind` if the listen
    /// address is unavailable.
    pub async fn start(&self) -> Result<SocketAddr> {
        if self.inner.local_addr.get().is_some()
            || self.inner.running.swap(true, Ordering::AcqRel)
        {
            return Err(NodeError::AlreadyStarted);
        }

        let listener = match TcpListener::bind(self.inner.config.listen_addr).await {
            Ok(listener) => listener,
            Err(e) => {
                self.inner.running.store(false, Ordering::Release);
                return Err(NodeError::Bind(format!("{}: {e}", self.inner.config.listen_addr)));
            }
        };
        let addr = listener
            .local_addr()
            .map_err(|e| NodeError::Bind(e.to_string()))?;
        let _ = self.inner.local_addr.set(addr);

        let closed_rx = self.inner.closed_rx.lock().await.take();
        let mut tasks = self.inner.tasks.lock().await;
        if let Some(closed_rx) = closed_rx {
            tasks.push(tokio::spawn(self.clone().supervise(closed_rx)));
        }
        tasks.push(tokio::spawn(self.clone().accept_loop(listener)));

        tracing::info!("{} listening on {}", self.inner.username, addr);
        Ok(addr)
    }

    /// Register this peer with the registry and keep the record fresh
    ///
    /// # Errors
    ///
    /// Returns `NotStarted` before `start()`, or the registry's error.
    pub async fn register(&self) -> Result<PeerRecord> {
        let addr = self.local_addr().ok_or(NodeError::NotStarted)?;
        let address = self.advertised_address(addr);

        let record = self
            .inner
            .registry
            .register(&self.inner.username, &address, addr.port(), self.inner.config.kind)
            .await?;

        self.inner.registered.store(true, Ordering::Release);
        if !self.inner.heartbeat_started.swap(true, Ordering::AcqRel) {
            let handle = tokio::spawn(self.clone().heartbeat_loop(address, addr.port()));
            self.inner.tasks.lock().await.push(handle);
        }

        tracing::info!("Registered {} as {}", self.inner.username, record.endpoint());
        Ok(record)
    }

    /// Live peers other than ourselves
    ///
    /// # Errors
    ///
    /// Returns the registry's error.
    pub async fn peers(&self) -> Result<Vec<PeerRecord>> {
        Ok(self
            .inner
            .registry
            .list(Some(&self.inner.username))
            .await?)
    }

    /// Connection state for `peer`
    #[must_use]
    pub fn state(&self, peer: &str) -> PeerState {
        self.inner
            .slots
            .get(peer)
            .map_or(PeerState::Idle, |slot| slot.session.state())
    }

    /// Every non-idle peer and its state, ordered by username
    #[must_use]
    pub fn peer_states(&self) -> Vec<(String, PeerState)> {
        let mut states: Vec<_> = self
            .inner
            .slots
            .iter()
            .map(|slot| (slot.key().clone(), slot.session.state()))
            .collect();
        states.sort_by(|a, b| a.0.cmp(&b.0));
        states
    }

    /// Peers with an established session, ordered by username
    #[must_use]
    pub fn connected_peers(&self) -> Vec<String> {
        self.peer_states()
            .into_iter()
            .filter(|(_, state)| *state == PeerState::Connected)
            .map(|(peer, _)| peer)
            .collect()
    }

    /// Traffic counters for the session with `peer`
    #[must_use]
    pub fn session_stats(&self, peer: &str) -> Option<StatsSnapshot> {
        self.inner
            .slots
            .get(peer)
            .map(|slot| slot.session.stats().snapshot())
    }

    /// Open a session to `target`
    ///
    /// Resolves the target through the registry, dials it and exchanges
    /// handshakes within the handshake timeout. Connecting to a peer that is
    /// already connected succeeds without doing anything.
    ///
    /// # Errors
    ///
    /// - `SelfTarget` for our own username
    /// - `NotFound` if the registry has no live record
    /// - `Collision` if another attempt with this peer is in flight
    /// - `Timeout`, `Refused`, `HandshakeMismatch` or `Cancelled` if the
    ///   attempt fails; the peer returns to `Idle`
    pub async fn connect(&self, target: &str) -> Result<()> {
        self.ensure_running()?;
        if target == self.inner.username {
            return Err(ConnectionError::SelfTarget.into());
        }
        match self.state(target) {
            PeerState::Idle => {}
            PeerState::Connected => return Ok(()),
            _ => return Err(ConnectionError::Collision(target.to_string()).into()),
        }

        let record = self.inner.registry.lookup(target).await?;
        let (session_id, mut cancel_rx) = self.claim_slot(target, Direction::Outbound)?;
        tracing::info!("Connecting to {} at {}", target, record.endpoint());

        let session = &self.inner.config.session;
        let attempt = async {
            let mut stream = TcpStream::connect(record.endpoint())
                .await
                .map_err(|e| ConnectionError::Refused(e.to_string()))?;
            self.transition(target, session_id, PeerState::Handshaking)?;
            initiate_handshake(
                &mut stream,
                &self.inner.username,
                target,
                session.max_frame_size,
            )
            .await?;
            Ok::<_, NodeError>(stream)
        };

        let result = tokio::select! {
            result = tokio::time::timeout(session.handshake_timeout, attempt) => {
                result.unwrap_or_else(|_| Err(ConnectionError::Timeout.into()))
            }
            _ = cancel_rx.wait_for(|cancelled| *cancelled) => {
                Err(ConnectionError::Cancelled.into())
            }
        };

        match result {
            Ok(stream) => self.establish(target, session_id, stream),
            Err(e) => {
                tracing::warn!("Connection to {} failed: {}", target, e);
                self.fail_attempt(target, session_id);
                Err(e)
            }
        }
    }

    /// Close the session with `peer`, or cancel a pending attempt
    ///
    /// A connected session sends CLOSE after anything already queued; the
    /// call returns once the peer is back to `Idle` or the write-stall
    /// timeout passes. Never triggers reconnection.
    ///
    /// # Errors
    ///
    /// Returns `NotConnected` if there is nothing to close.
    pub async fn disconnect(&self, peer: &str) -> Result<()> {
        let stopped_reconnect = self.cancel_reconnect(peer);

        let handle = {
            let Some(mut slot) = self.inner.slots.get_mut(peer) else {
                if stopped_reconnect {
                    return Ok(());
                }
                return Err(ConnectionError::NotConnected(peer.to_string()).into());
            };

            match slot.session.state() {
                PeerState::Connecting | PeerState::Handshaking => {
                    tracing::info!("Cancelling connection attempt with {}", peer);
                    let _ = slot.cancel.send(true);
                    None
                }
                PeerState::Connected => {
                    slot.session.transition_to(PeerState::Closing)?;
                    slot.handle.clone()
                }
                _ => None,
            }
        };

        if let Some(handle) = handle {
            tracing::info!("Disconnecting from {}", peer);
            handle.close_gracefully("disconnect");
        }
        self.wait_until_idle(peer, self.inner.config.session.write_stall_timeout)
            .await;
        Ok(())
    }

    /// Send a chat message over an established session
    ///
    /// # Errors
    ///
    /// Returns `MessageTooLong`, `NotConnected` or `Backpressure`.
    pub async fn send_message(&self, peer: &str, text: &str) -> Result<()> {
        validate_message(text)?;
        let handle = self.connected_handle(peer)?;
        handle.send(Frame::message(text)).await?;
        tracing::debug!("Sent {} chars to {}", text.chars().count(), peer);
        Ok(())
    }

    /// Send an in-memory file over an established session
    ///
    /// The size cap is checked before anything is written.
    ///
    /// # Errors
    ///
    /// Returns `SizeExceeded`, `NotConnected`, `Backpressure` or a file name
    /// error.
    pub async fn send_file(&self, peer: &str, name: &str, data: Vec<u8>) -> Result<Checksum> {
        let file = LoadedFile::from_bytes(name, data, self.inner.config.transfer.max_file_size)?;
        self.send_loaded(peer, file).await
    }

    /// Read a file from disk and send it
    ///
    /// # Errors
    ///
    /// As [`ConnectionManager::send_file`], plus I/O errors reading the file.
    pub async fn send_file_path(&self, peer: &str, path: impl AsRef<Path>) -> Result<Checksum> {
        let file = LoadedFile::load(path, self.inner.config.transfer.max_file_size).await?;
        self.send_loaded(peer, file).await
    }

    async fn send_loaded(&self, peer: &str, file: LoadedFile) -> Result<Checksum> {
        let handle = self.connected_handle(peer)?;
        let chunker = FileChunker::with_chunk_size(self.inner.config.transfer.chunk_size);

        tracing::info!(
            "Sending {} ({} bytes, {} chunks) to {}",
            file.name,
            file.size(),
            chunker.chunk_count(file.size()),
            peer
        );
        handle.send_file(&file, chunker).await?;
        Ok(file.checksum)
    }

    /// Close every session, stop the listener and deregister
    ///
    /// # Errors
    ///
    /// Never fails; registry errors during deregistration are logged.
    pub async fn shutdown(&self) -> Result<()> {
        if !self.inner.running.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        tracing::info!("Shutting down {}", self.inner.username);
        let _ = self.inner.shutdown.send(true);

        let pending: Vec<String> = self.inner.reconnects.iter().map(|r| r.key().clone()).collect();
        for peer in pending {
            self.cancel_reconnect(&peer);
        }

        let mut handles = Vec::new();
        for mut slot in self.inner.slots.iter_mut() {
            match slot.session.state() {
                PeerState::Connecting | PeerState::Handshaking => {
                    let _ = slot.cancel.send(true);
                }
                PeerState::Connected => {
                    let _ = slot.session.transition_to(PeerState::Closing);
                    handles.extend(slot.handle.clone());
                }
                _ => {}
            }
        }
        for handle in handles {
            handle.close_gracefully("shutdown");
        }

        let mut changes = self.inner.slot_changes.subscribe();
        let _ = tokio::time::timeout(
            self.inner.config.session.write_stall_timeout,
            changes.wait_for(|_| self.inner.slots.is_empty()),
        )
        .await;

        if self.inner.registered.swap(false, Ordering::AcqRel) {
            if let Err(e) = self.inner.registry.deregister(&self.inner.username).await {
                tracing::warn!("Failed to deregister {}: {}", self.inner.username, e);
            }
        }

        for task in self.inner.tasks.lock().await.drain(..) {
            task.abort();
        }
        tracing::info!("{} stopped", self.inner.username);
        Ok(())
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_running() {
            Ok(())
        } else {
            Err(NodeError::NotStarted)
        }
    }

    fn advertised_address(&self, addr: SocketAddr) -> String {
        match &self.inner.config.advertise_addr {
            Some(address) => address.clone(),
            None if addr.ip().is_unspecified() => "127.0.0.1".to_string(),
            None => addr.ip().to_string(),
        }
    }

    fn connected_handle(&self, peer: &str) -> std::result::Result<SessionHandle, ConnectionError> {
        self.inner
            .slots
            .get(peer)
            .filter(|slot| slot.session.state() == PeerState::Connected)
            .and_then(|slot| slot.handle.clone())
            .ok_or_else(|| ConnectionError::NotConnected(peer.to_string()))
    }

    /// Take the slot for `peer`; any existing slot is a collision
    ///
    /// The running flag is read under the shard lock, so a slot claimed here
    /// is either refused or visible to the cancel sweep in `shutdown`.
    fn claim_slot(
        &self,
        peer: &str,
        direction: Direction,
    ) -> std::result::Result<(u64, watch::Receiver<bool>), ConnectionError> {
        match self.inner.slots.entry(peer.to_string()) {
            _ if !self.is_running() => Err(ConnectionError::Cancelled),
            Entry::Occupied(existing) => {
                tracing::debug!(
                    "Collision with {}: slot already {}",
                    peer,
                    existing.get().session.state()
                );
                Err(ConnectionError::Collision(peer.to_string()))
            }
            Entry::Vacant(vacant) => {
                let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
                let session = match direction {
                    Direction::Outbound => Session::outbound(id, &self.inner.username, peer),
                    Direction::Inbound => Session::inbound(id, &self.inner.username, peer),
                };
                let (cancel, cancel_rx) = watch::channel(false);
                vacant.insert(PeerSlot {
                    session,
                    cancel,
                    handle: None,
                });
                Ok((id, cancel_rx))
            }
        }
    }

    fn transition(&self, peer: &str, session_id: u64, next: PeerState) -> Result<()> {
        let mut slot = self
            .inner
            .slots
            .get_mut(peer)
            .filter(|slot| slot.session.id() == session_id)
            .ok_or(ConnectionError::Cancelled)?;
        slot.session.transition_to(next)?;
        Ok(())
    }

    /// Move a failed attempt through `Failed` back to `Idle`
    fn fail_attempt(&self, peer: &str, session_id: u64) {
        let removed = match self.inner.slots.entry(peer.to_string()) {
            Entry::Occupied(mut slot) if slot.get().session.id() == session_id => {
                let _ = slot.get_mut().session.transition_to(PeerState::Failed);
                let mut slot = slot.remove();
                let _ = slot.session.transition_to(PeerState::Idle);
                true
            }
            _ => false,
        };
        if removed {
            self.inner.slot_changes.send_modify(|v| *v += 1);
        }
    }

    /// Promote a handshaken socket to an established session
    fn establish(&self, peer: &str, session_id: u64, stream: TcpStream) -> Result<()> {
        let established = {
            let Some(mut slot) = self
                .inner
                .slots
                .get_mut(peer)
                .filter(|slot| slot.session.id() == session_id)
            else {
                return Err(ConnectionError::Cancelled.into());
            };

            if *slot.cancel.borrow() || !self.is_running() {
                false
            } else {
                slot.session.transition_to(PeerState::Connected)?;
                let _ = stream.set_nodelay(true);

                // Announce before the read loop can publish anything from this peer.
                emit(
                    &self.inner.events,
                    NodeEvent::PeerConnected {
                        peer: peer.to_string(),
                    },
                );
                let handle = spawn_session(
                    stream,
                    SessionParams {
                        peer: peer.to_string(),
                        session_id,
                        config: self.inner.config.session.clone(),
                        max_file_size: self.inner.config.transfer.max_file_size,
                        events: self.inner.events.clone(),
                        closed_tx: self.inner.closed_tx.clone(),
                        stats: Arc::clone(slot.session.stats()),
                    },
                );
                slot.handle = Some(handle);
                true
            }
        };

        if !established {
            self.fail_attempt(peer, session_id);
            return Err(ConnectionError::Cancelled.into());
        }

        tracing::info!("Session {} with {} established", session_id, peer);
        Ok(())
    }

    async fn wait_until_idle(&self, peer: &str, limit: Duration) {
        let mut changes = self.inner.slot_changes.subscribe();
        let _ = tokio::time::timeout(
            limit,
            changes.wait_for(|_| !self.inner.slots.contains_key(peer)),
        )
        .await;
    }

    fn cancel_reconnect(&self, peer: &str) -> bool {
        match self.inner.reconnects.remove(peer) {
            Some((_, (_, cancel))) => {
                let _ = cancel.send(true);
                true
            }
            None => false,
        }
    }

    async fn accept_loop(self, listener: TcpListener) {
        let mut shutdown = self.inner.shutdown.subscribe();
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        tracing::debug!("Inbound connection from {}", addr);
                        let manager = self.clone();
                        tokio::spawn(async move { manager.handle_inbound(stream, addr).await });
                    }
                    Err(e) => {
                        tracing::warn!("Accept failed: {}", e);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                },
            }
        }
        tracing::debug!("Listener for {} stopped", self.inner.username);
    }

    async fn handle_inbound(&self, mut stream: TcpStream, addr: SocketAddr) {
        let session = &self.inner.config.session;
        let local = self.inner.username.as_str();

        let hello = match tokio::time::timeout(
            session.handshake_timeout,
            read_handshake(&mut stream, session.max_frame_size),
        )
        .await
        {
            Ok(Ok(hello)) => hello,
            Ok(Err(e)) => {
                tracing::debug!("Bad handshake from {}: {}", addr, e);
                return;
            }
            Err(_) => {
                tracing::debug!("Handshake from {} timed out", addr);
                return;
            }
        };

        let peer = hello.username;
        if !hello.accepted || peer == local || validate_username(&peer).is_err() {
            tracing::debug!("Rejecting handshake from {} as {:?}", addr, peer);
            self.reply(&mut stream, Handshake::reject(local, "invalid")).await;
            return;
        }

        let (session_id, cancel_rx) = match self.claim_slot(&peer, Direction::Inbound) {
            Ok(claimed) => claimed,
            Err(ConnectionError::Cancelled) => {
                tracing::debug!("Rejecting inbound session from {}: shutting down", peer);
                self.reply(&mut stream, Handshake::reject(local, "shutting-down")).await;
                return;
            }
            Err(_) => {
                tracing::info!("Rejecting inbound session from {}: collision", peer);
                self.reply(&mut stream, Handshake::reject(local, "collision")).await;
                return;
            }
        };

        if !self.reply(&mut stream, Handshake::accept(local)).await || *cancel_rx.borrow() {
            self.fail_attempt(&peer, session_id);
            return;
        }

        if let Err(e) = self.establish(&peer, session_id, stream) {
            tracing::debug!("Inbound session from {} not established: {}", peer, e);
        }
    }

    async fn reply(&self, stream: &mut TcpStream, handshake: Handshake) -> bool {
        let timeout = self.inner.config.session.handshake_timeout;
        matches!(
            tokio::time::timeout(timeout, send_handshake(stream, &handshake)).await,
            Ok(Ok(()))
        )
    }

    /// Single consumer of session-closed notifications
    async fn supervise(self, mut closed_rx: mpsc::UnboundedReceiver<SessionClosed>) {
        while let Some(closed) = closed_rx.recv().await {
            self.on_session_closed(closed);
        }
    }

    fn on_session_closed(&self, closed: SessionClosed) {
        let direction = match self.inner.slots.entry(closed.peer.clone()) {
            Entry::Occupied(mut slot) if slot.get().session.id() == closed.session_id => {
                if slot.get().session.state() == PeerState::Connected {
                    let _ = slot.get_mut().session.transition_to(PeerState::Closing);
                }
                let mut slot = slot.remove();
                let _ = slot.session.transition_to(PeerState::Idle);
                Some(slot.session.direction())
            }
            _ => None,
        };
        let Some(direction) = direction else {
            return;
        };
        self.inner.slot_changes.send_modify(|v| *v += 1);

        let reason = closed.cause.reason();
        tracing::info!("Session with {} closed: {}", closed.peer, reason);
        emit(
            &self.inner.events,
            NodeEvent::PeerDisconnected {
                peer: closed.peer.clone(),
                reason,
            },
        );

        if closed.cause.is_unexpected() && direction == Direction::Outbound && self.is_running() {
            self.spawn_reconnect(closed.peer);
        }
    }

    fn spawn_reconnect(&self, peer: String) {
        let policy = self.inner.config.reconnect.clone();
        if policy.max_retries == 0 {
            emit(
                &self.inner.events,
                NodeEvent::ReconnectFailed { peer, attempts: 0 },
            );
            return;
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (cancel_tx, mut cancel_rx) = watch::channel(false);
        if let Some((_, previous)) = self.inner.reconnects.insert(peer.clone(), (id, cancel_tx)) {
            let _ = previous.send(true);
        }

        let manager = self.clone();
        tokio::spawn(async move {
            let mut shutdown = manager.inner.shutdown.subscribe();
            let mut attempts = 0;
            let mut reconnected = false;
            let mut cancelled = false;

            while attempts < policy.max_retries {
                let delay = policy.backoff_duration(attempts);
                attempts += 1;
                tracing::info!(
                    "Reconnecting to {} in {:?} (attempt {}/{})",
                    peer,
                    delay,
                    attempts,
                    policy.max_retries
                );

                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel_rx.changed() => {}
                    _ = shutdown.changed() => {}
                }
                if *cancel_rx.borrow() || !manager.is_running() {
                    cancelled = true;
                    break;
                }
                if manager.state(&peer) != PeerState::Idle {
                    // The peer dialled us back, or someone else is connecting.
                    reconnected = true;
                    break;
                }

                match manager.connect(&peer).await {
                    Ok(()) => {
                        reconnected = true;
                        break;
                    }
                    Err(e) => tracing::debug!("Reconnect to {} failed: {}", peer, e),
                }
            }

            manager.inner.reconnects.remove_if(&peer, |_, (entry_id, _)| *entry_id == id);
            if !reconnected && !cancelled {
                tracing::warn!("Giving up on {} after {} attempts", peer, attempts);
                emit(
                    &manager.inner.events,
                    NodeEvent::ReconnectFailed { peer, attempts },
                );
            }
        });
    }

    async fn heartbeat_loop(self, address: String, port: u16) {
        let mut shutdown = self.inner.shutdown.subscribe();
        let interval = self.inner.config.heartbeat_interval;
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {}
            }

            match self.inner.registry.heartbeat(&self.inner.username).await {
                Ok(()) => tracing::trace!("Heartbeat for {}", self.inner.username),
                Err(RegistryError::NotFound(_)) => {
                    tracing::info!("Registry forgot {}, registering again", self.inner.username);
                    if let Err(e) = self
                        .inner
                        .registry
                        .register(&self.inner.username, &address, port, self.inner.config.kind)
                        .await
                    {
                        tracing::warn!("Re-registration failed: {}", e);
                    }
                }
                Err(e) => tracing::warn!("Heartbeat failed: {}", e),
            }
        }
    }
}
