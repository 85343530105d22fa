//! Transport session loops.
//!
//! Once a handshake completes the socket is split and driven by two tasks:
//!
//! - the **read loop** parses frames and dispatches them: messages and files
//!   become [`NodeEvent`]s, pings are answered, pongs clear the liveness
//!   probe and CLOSE ends the session;
//! - the **write loop** drains the bounded outbound queue in order, sends a
//!   ping every ping interval and declares the session dead if the matching
//!   pong does not arrive within the pong timeout. Pong replies bypass the
//!   queue and go out ahead of any queued data.
//!
//! Either loop can end the session. The first one to do so records the
//! cause, signals the other through a `watch` channel and reports a single
//! [`SessionClosed`] to the connection manager.

use super::config::SessionConfig;
use super::error::ConnectionError;
use super::events::{EventSender, NodeEvent, emit};
use crate::frame::{Frame, FrameType, Handshake, read_frame, write_frame};
use crate::session::SessionStats;
use crate::transfer::{TransferState, file_frames};
use peerlink_discovery::registry::protocol::unix_millis;
use peerlink_files::{FileChunker, LoadedFile};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Mutex, mpsc, watch};
use tokio::time::{Instant, timeout};

/// Why a session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum CloseCause {
    /// We sent CLOSE
    LocalClose,
    /// Peer sent CLOSE
    RemoteClose(Option<String>),
    /// Socket reached end of stream without a CLOSE frame
    ConnectionLost,
    /// Socket error
    Io(String),
    /// Peer broke the wire protocol
    Protocol(String),
    /// No pong within the pong timeout
    LivenessTimeout,
    /// Outbound queue or socket write stalled
    WriteStall,
}

impl CloseCause {
    /// Unexpected drops are eligible for automatic reconnection
    pub(crate) fn is_unexpected(&self) -> bool {
        matches!(
            self,
            CloseCause::ConnectionLost
                | CloseCause::Io(_)
                | CloseCause::LivenessTimeout
                | CloseCause::WriteStall
        )
    }

    pub(crate) fn reason(&self) -> String {
        match self {
            CloseCause::LocalClose => "closed".to_string(),
            CloseCause::RemoteClose(None) => "remote-closed".to_string(),
            CloseCause::RemoteClose(Some(reason)) => format!("remote-closed: {reason}"),
            CloseCause::ConnectionLost => "connection-lost".to_string(),
            CloseCause::Io(e) => format!("io-error: {e}"),
            CloseCause::Protocol(e) => format!("protocol-error: {e}"),
            CloseCause::LivenessTimeout => "liveness-timeout".to_string(),
            CloseCause::WriteStall => "backpressure".to_string(),
        }
    }
}

/// Notification sent to the manager when a session ends
#[derive(Debug)]
pub(crate) struct SessionClosed {
    pub peer: String,
    pub session_id: u64,
    pub cause: CloseCause,
}

/// State shared by a session's two loops and its handle
struct SessionShared {
    peer: String,
    session_id: u64,
    closed: AtomicBool,
    local_close: AtomicBool,
    /// Nonce of the unanswered ping, zero when none is outstanding
    pending_ping: AtomicU64,
    shutdown: watch::Sender<bool>,
    closed_tx: mpsc::UnboundedSender<SessionClosed>,
    stats: Arc<SessionStats>,
}

impl SessionShared {
    fn close(&self, cause: CloseCause) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let cause = if self.local_close.load(Ordering::Acquire) {
            CloseCause::LocalClose
        } else {
            cause
        };

        tracing::debug!(
            "Session {} with {} closing: {}",
            self.session_id,
            self.peer,
            cause.reason()
        );
        let _ = self.shutdown.send(true);
        let _ = self.closed_tx.send(SessionClosed {
            peer: self.peer.clone(),
            session_id: self.session_id,
            cause,
        });
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Inputs for [`spawn_session`]
pub(crate) struct SessionParams {
    pub peer: String,
    pub session_id: u64,
    pub config: SessionConfig,
    pub max_file_size: u64,
    pub events: EventSender,
    pub closed_tx: mpsc::UnboundedSender<SessionClosed>,
    pub stats: Arc<SessionStats>,
}

/// Sending side of an established session
#[derive(Clone)]
pub(crate) struct SessionHandle {
    shared: Arc<SessionShared>,
    outbound: mpsc::Sender<Frame>,
    file_lock: Arc<Mutex<()>>,
    write_stall_timeout: Duration,
}

impl SessionHandle {
    /// Queue one frame, waiting for space up to the write-stall timeout
    pub(crate) async fn send(&self, frame: Frame) -> Result<(), ConnectionError> {
        if self.shared.is_closed() {
            return Err(ConnectionError::NotConnected(self.shared.peer.clone()));
        }

        match timeout(self.write_stall_timeout, self.outbound.send(frame)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(ConnectionError::NotConnected(self.shared.peer.clone())),
            Err(_) => {
                tracing::warn!(
                    "Outbound queue to {} stalled for {:?}",
                    self.shared.peer,
                    self.write_stall_timeout
                );
                self.shared.close(CloseCause::WriteStall);
                Err(ConnectionError::Backpressure)
            }
        }
    }

    /// Queue a whole file; concurrent files on one session are serialized
    pub(crate) async fn send_file(
        &self,
        file: &LoadedFile,
        chunker: FileChunker,
    ) -> Result<(), ConnectionError> {
        let _guard = self.file_lock.lock().await;
        for frame in file_frames(file, chunker) {
            self.send(frame).await?;
        }
        Ok(())
    }

    /// Send CLOSE after everything already queued, then end the session
    pub(crate) fn close_gracefully(&self, reason: &str) {
        self.shared.local_close.store(true, Ordering::Release);
        if self.outbound.try_send(Frame::close(Some(reason))).is_err() {
            self.shared.close(CloseCause::LocalClose);
        }
    }
}

/// Split an established socket and start its read and write loops
pub(crate) fn spawn_session(stream: TcpStream, params: SessionParams) -> SessionHandle {
    let (read_half, write_half) = stream.into_split();
    let (outbound_tx, outbound_rx) = mpsc::channel(params.config.outbound_queue.max(1));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (pong_tx, pong_rx) = watch::channel(None);

    let shared = Arc::new(SessionShared {
        peer: params.peer.clone(),
        session_id: params.session_id,
        closed: AtomicBool::new(false),
        local_close: AtomicBool::new(false),
        pending_ping: AtomicU64::new(0),
        shutdown: shutdown_tx,
        closed_tx: params.closed_tx,
        stats: params.stats,
    });

    let reader = Reader {
        shared: Arc::clone(&shared),
        pong_tx,
        events: params.events,
        max_frame_size: params.config.max_frame_size,
        max_file_size: params.max_file_size,
        incoming: None,
        discarding: false,
    };
    tokio::spawn(reader.run(read_half, shutdown_rx.clone()));
    tokio::spawn(write_loop(
        write_half,
        Arc::clone(&shared),
        outbound_rx,
        pong_rx,
        shutdown_rx,
        params.config.clone(),
    ));

    SessionHandle {
        shared,
        outbound: outbound_tx,
        file_lock: Arc::new(Mutex::new(())),
        write_stall_timeout: params.config.write_stall_timeout,
    }
}

/// Read loop state
struct Reader {
    shared: Arc<SessionShared>,
    /// Latest ping nonce still owed a pong
    pong_tx: watch::Sender<Option<u64>>,
    events: EventSender,
    max_frame_size: usize,
    max_file_size: u64,
    incoming: Option<TransferState>,
    /// Set after a transfer fails; chunks are dropped until the next file
    discarding: bool,
}

impl Reader {
    async fn run(mut self, mut reader: OwnedReadHalf, mut shutdown: watch::Receiver<bool>) {
        let cause = loop {
            if *shutdown.borrow() {
                break None;
            }

            let result = tokio::select! {
                _ = shutdown.changed() => break None,
                result = read_frame(&mut reader, self.max_frame_size) => result,
            };

            match result {
                Ok(Some(frame)) => {
                    self.shared.stats.record_received(frame.encoded_len());
                    if let Some(cause) = self.dispatch(frame) {
                        break Some(cause);
                    }
                }
                Ok(None) => break Some(CloseCause::ConnectionLost),
                Err(e) if e.is_io() => break Some(CloseCause::Io(e.to_string())),
                Err(e) => {
                    tracing::warn!("Protocol error from {}: {}", self.shared.peer, e);
                    break Some(CloseCause::Protocol(e.to_string()));
                }
            }
        };

        if let Some(cause) = cause {
            self.shared.close(cause);
        }
        if let Some(transfer) = self.incoming.take() {
            self.file_failed(Some(transfer.name().to_string()), "aborted");
        }
    }

    fn dispatch(&mut self, frame: Frame) -> Option<CloseCause> {
        tracing::trace!(
            "{} <- {}: {} bytes",
            frame.frame_type().name(),
            self.shared.peer,
            frame.payload().len()
        );

        match frame.frame_type() {
            FrameType::Handshake => {
                return Some(CloseCause::Protocol("unexpected handshake".into()));
            }
            FrameType::Message => match frame.parse_text() {
                Ok(text) => emit(
                    &self.events,
                    NodeEvent::MessageReceived {
                        from: self.shared.peer.clone(),
                        text,
                        timestamp: unix_millis(),
                    },
                ),
                Err(e) => return Some(CloseCause::Protocol(e.to_string())),
            },
            FrameType::FileMeta => self.on_file_meta(&frame),
            FrameType::FileChunk => self.on_file_chunk(frame.payload()),
            FrameType::FileEnd => self.on_file_end(&frame),
            FrameType::Ping => match frame.parse_nonce() {
                Ok(nonce) => {
                    let _ = self.pong_tx.send(Some(nonce));
                }
                Err(e) => return Some(CloseCause::Protocol(e.to_string())),
            },
            FrameType::Pong => match frame.parse_nonce() {
                Ok(nonce) => {
                    let _ = self.shared.pending_ping.compare_exchange(
                        nonce,
                        0,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    );
                }
                Err(e) => return Some(CloseCause::Protocol(e.to_string())),
            },
            FrameType::Close => {
                let reason = frame.parse_text().ok().filter(|r| !r.is_empty());
                return Some(CloseCause::RemoteClose(reason));
            }
        }
        None
    }

    fn on_file_meta(&mut self, frame: &Frame) {
        if let Some(previous) = self.incoming.take() {
            tracing::warn!(
                "New file from {} while {} was in progress",
                self.shared.peer,
                previous.name()
            );
            self.file_failed(Some(previous.name().to_string()), "aborted");
        }

        let meta = match frame.parse_file_meta() {
            Ok(meta) => meta,
            Err(e) => {
                tracing::warn!("Bad file-meta from {}: {}", self.shared.peer, e);
                self.file_failed(None, "protocol-error");
                self.discarding = true;
                return;
            }
        };

        match TransferState::begin(&meta.name, meta.size, self.max_file_size) {
            Ok(state) => {
                tracing::info!(
                    "Receiving {} ({} bytes) from {}",
                    state.name(),
                    meta.size,
                    self.shared.peer
                );
                self.incoming = Some(state);
                self.discarding = false;
            }
            Err(e) => {
                tracing::warn!("Rejected file {} from {}: {}", meta.name, self.shared.peer, e);
                self.file_failed(Some(meta.name), e.reason());
                self.discarding = true;
            }
        }
    }

    fn on_file_chunk(&mut self, chunk: &[u8]) {
        match self.incoming.as_mut() {
            Some(state) => {
                if let Err(e) = state.push_chunk(chunk) {
                    let name = state.name().to_string();
                    tracing::warn!("Aborting {} from {}: {}", name, self.shared.peer, e);
                    self.incoming = None;
                    self.discarding = true;
                    self.file_failed(Some(name), e.reason());
                }
            }
            None if self.discarding => {}
            None => {
                tracing::warn!("File chunk from {} without file-meta", self.shared.peer);
                self.discarding = true;
                self.file_failed(None, "protocol-error");
            }
        }
    }

    fn on_file_end(&mut self, frame: &Frame) {
        let discarding = std::mem::replace(&mut self.discarding, false);
        let Some(state) = self.incoming.take() else {
            if !discarding {
                tracing::warn!("File end from {} without file-meta", self.shared.peer);
                self.file_failed(None, "protocol-error");
            }
            return;
        };

        let name = state.name().to_string();
        let result = frame
            .parse_checksum()
            .map_err(|_| "protocol-error")
            .and_then(|expected| state.finish(&expected).map_err(|e| e.reason()));

        match result {
            Ok(file) => {
                tracing::info!(
                    "Received {} ({} bytes) from {}",
                    file.name,
                    file.data.len(),
                    self.shared.peer
                );
                emit(
                    &self.events,
                    NodeEvent::FileReceived {
                        from: self.shared.peer.clone(),
                        name: file.name,
                        data: file.data,
                        checksum: file.checksum,
                    },
                );
            }
            Err(reason) => {
                tracing::warn!("File {} from {} failed: {}", name, self.shared.peer, reason);
                self.file_failed(Some(name), reason);
            }
        }
    }

    fn file_failed(&self, name: Option<String>, reason: &str) {
        emit(
            &self.events,
            NodeEvent::FileFailed {
                from: self.shared.peer.clone(),
                name,
                reason: reason.to_string(),
            },
        );
    }
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    shared: Arc<SessionShared>,
    mut outbound: mpsc::Receiver<Frame>,
    mut pongs: watch::Receiver<Option<u64>>,
    mut shutdown: watch::Receiver<bool>,
    config: SessionConfig,
) {
    let stall = config.write_stall_timeout;
    let mut ticker = tokio::time::interval_at(
        Instant::now() + config.ping_interval,
        config.ping_interval,
    );
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let pong_deadline = tokio::time::sleep(config.pong_timeout);
    tokio::pin!(pong_deadline);
    let mut awaiting_pong = false;
    let mut pongs_open = true;

    let cause = loop {
        if *shutdown.borrow() {
            break None;
        }

        // Control frames first; queued data only when nothing else is ready.
        tokio::select! {
            biased;

            _ = shutdown.changed() => break None,
            changed = pongs.changed(), if pongs_open => {
                if changed.is_err() {
                    pongs_open = false;
                    continue;
                }
                let owed = *pongs.borrow_and_update();
                if let Some(nonce) = owed {
                    let pong = Frame::pong(nonce);
                    if let Err(cause) = send_frame(&mut writer, &pong, &shared, stall).await {
                        break Some(cause);
                    }
                }
            }
            _ = &mut pong_deadline, if awaiting_pong => {
                awaiting_pong = false;
                if shared.pending_ping.load(Ordering::Acquire) != 0 {
                    tracing::warn!(
                        "No pong from {} within {:?}",
                        shared.peer,
                        config.pong_timeout
                    );
                    break Some(CloseCause::LivenessTimeout);
                }
            }
            _ = ticker.tick() => {
                if awaiting_pong && shared.pending_ping.load(Ordering::Acquire) != 0 {
                    continue;
                }
                let nonce = rand::random::<u64>() | 1;
                shared.pending_ping.store(nonce, Ordering::Release);
                let ping = Frame::ping(nonce);
                if let Err(cause) = send_frame(&mut writer, &ping, &shared, stall).await {
                    break Some(cause);
                }
                awaiting_pong = true;
                pong_deadline.as_mut().reset(Instant::now() + config.pong_timeout);
            }
            next = outbound.recv() => {
                let Some(frame) = next else { break None };
                let is_close = frame.frame_type() == FrameType::Close;
                if let Err(cause) = send_frame(&mut writer, &frame, &shared, stall).await {
                    break Some(cause);
                }
                if is_close {
                    break Some(CloseCause::LocalClose);
                }
            }
        }
    };

    if let Some(cause) = cause {
        shared.close(cause);
    }
    let _ = writer.shutdown().await;
}

async fn send_frame(
    writer: &mut OwnedWriteHalf,
    frame: &Frame,
    shared: &SessionShared,
    stall: Duration,
) -> Result<(), CloseCause> {
    match timeout(stall, write_frame(writer, frame)).await {
        Ok(Ok(())) => {
            shared.stats.record_sent(frame.encoded_len());
            tracing::trace!(
                "{} -> {}: {} bytes",
                frame.frame_type().name(),
                shared.peer,
                frame.payload().len()
            );
            Ok(())
        }
        Ok(Err(e)) => Err(CloseCause::Io(e.to_string())),
        Err(_) => Err(CloseCause::WriteStall),
    }
}

/// Initiator side of the handshake: send our username, check the reply
pub(crate) async fn initiate_handshake(
    stream: &mut TcpStream,
    local: &str,
    expected: &str,
    max_frame_size: usize,
) -> Result<(), ConnectionError> {
    send_handshake(stream, &Handshake::accept(local)).await?;
    let reply = read_handshake(stream, max_frame_size).await?;

    if !reply.accepted {
        let reason = reply.reason.unwrap_or_default();
        return Err(if reason == "collision" {
            ConnectionError::Collision(expected.to_string())
        } else {
            ConnectionError::Refused(reason)
        });
    }
    if reply.username != expected {
        return Err(ConnectionError::HandshakeMismatch {
            expected: expected.to_string(),
            actual: reply.username,
        });
    }
    Ok(())
}

/// Read the first frame of a session, which must be a handshake
pub(crate) async fn read_handshake(
    stream: &mut TcpStream,
    max_frame_size: usize,
) -> Result<Handshake, ConnectionError> {
    let frame = read_frame(stream, max_frame_size)
        .await
        .map_err(|e| ConnectionError::Protocol(e.to_string()))?
        .ok_or_else(|| ConnectionError::Refused("closed during handshake".into()))?;

    frame
        .parse_handshake()
        .map_err(|e| ConnectionError::Protocol(e.to_string()))
}

/// Write a handshake frame
pub(crate) async fn send_handshake(
    stream: &mut TcpStream,
    handshake: &Handshake,
) -> Result<(), ConnectionError> {
    let frame = Frame::handshake(handshake).map_err(|e| ConnectionError::Protocol(e.to_string()))?;
    write_frame(stream, &frame)
        .await
        .map_err(|e| ConnectionError::Refused(e.to_string()))
}
