//! ## CONNECTION CORE (C4)
//!
//! Owns the lifecycle state machine (Idle -> Connecting -> Running ->
//! ShuttingDown -> Idle, or -> Disposed from any state) and the two
//! long-running tasks — the receive loop and the heartbeat loop — that run
//! for as long as a connection attempt is alive.
//!
//! Rust has no atomic compare-and-swap over non-`Copy` handles, so the
//! "CAS-guarded slot" in the originating design becomes a
//! `Mutex`-guarded `Option<CancellationToken>`: installing a new worker
//! token and observing/clearing the old one both happen under the same
//! lock, which gives the same exclusivity a CAS would.
//!
//! Cancellation is two-level: `disposed` is a token that, once cancelled,
//! stays cancelled for the life of the `Connection` and blocks all future
//! `connect()` calls. Each `connect()` call creates a fresh `worker` token
//! that a background task cancels as soon as either the caller's token or
//! a child of `disposed` cancels — this is the "lifetime + worker" tree.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::classifier;
use crate::config::Config;
use crate::dispatch::{Dispatcher, Event};
use crate::error::{DanmakuError, Result};
use crate::frame::{self, HEADER_LEN};
use crate::server_info::{ServerInfo, ServerInfoProvider};
use crate::transport::{AnyTransport, TcpTransport, TransportReader, TransportWriter, WebSocketTransport};

/// Dials whichever transport variant a [`Connection`] was configured to use.
#[async_trait]
pub trait TransportOpener: Send + Sync {
    async fn open(&self, info: &ServerInfo) -> Result<AnyTransport>;
}

/// Opens a plain TCP socket at `info.host:info.port`.
pub struct TcpOpener;

#[async_trait]
impl TransportOpener for TcpOpener {
    async fn open(&self, info: &ServerInfo) -> Result<AnyTransport> {
        Ok(AnyTransport::Tcp(TcpTransport::connect(&info.host, info.port).await?))
    }
}

/// Opens a WebSocket connection to `wss://host:port/sub`.
pub struct WebSocketOpener;

#[async_trait]
impl TransportOpener for WebSocketOpener {
    async fn open(&self, info: &ServerInfo) -> Result<AnyTransport> {
        let url = format!("wss://{}:{}/sub", info.host, info.port);
        Ok(AnyTransport::WebSocket(WebSocketTransport::connect(&url).await?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionState {
    Idle,
    Connecting,
    Running,
    ShuttingDown,
    Disposed,
}

/// A single long-lived danmaku connection for one room.
///
/// Methods are written against `self: &Arc<Self>` where a background task
/// needs to hold a strong reference back to the connection after the
/// calling method returns.
pub struct Connection {
    config: Config,
    server_info: Arc<dyn ServerInfoProvider>,
    opener: Arc<dyn TransportOpener>,
    dispatcher: Arc<Dispatcher>,
    state: Mutex<ConnectionState>,
    worker_token: Mutex<Option<CancellationToken>>,
    disposed: CancellationToken,
    attempt: AtomicU64,
    disconnect_emitted: AtomicBool,
}

impl Connection {
    pub fn new(
        config: Config,
        server_info: Arc<dyn ServerInfoProvider>,
        opener: Arc<dyn TransportOpener>,
        dispatcher: Arc<Dispatcher>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            server_info,
            opener,
            dispatcher,
            state: Mutex::new(ConnectionState::Idle),
            worker_token: Mutex::new(None),
            disposed: CancellationToken::new(),
            attempt: AtomicU64::new(0),
            disconnect_emitted: AtomicBool::new(true),
        })
    }

    pub fn room_id(&self) -> u64 {
        self.config.room_id
    }

    pub fn connected(&self) -> bool {
        matches!(*self.state.lock().unwrap(), ConnectionState::Running)
    }

    /// Resolves server info, opens the transport, performs the join-room
    /// handshake, and — once `connected_ack` arrives (or the handshake
    /// deadline trips) — spawns the receive and heartbeat loops and
    /// returns. `cancel` lets the caller abort the whole attempt, including
    /// mid-handshake.
    pub async fn connect(self: &Arc<Self>, cancel: CancellationToken) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap();
            match *state {
                ConnectionState::Disposed => return Err(DanmakuError::Disposed),
                ConnectionState::Idle => *state = ConnectionState::Connecting,
                _ => return Err(DanmakuError::InvalidState),
            }
        }

        let attempt = self.attempt.fetch_add(1, Ordering::SeqCst) + 1;
        self.disconnect_emitted.store(false, Ordering::SeqCst);

        let worker = CancellationToken::new();
        {
            let w = worker.clone();
            let disposed_child = self.disposed.child_token();
            let caller = cancel.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = caller.cancelled() => {}
                    _ = disposed_child.cancelled() => {}
                }
                w.cancel();
            });
        }
        *self.worker_token.lock().unwrap() = Some(worker.clone());

        match self.connect_inner(&worker, attempt).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.roll_back_failed_attempt(attempt);
                Err(e)
            }
        }
    }

    /// Cancels the worker token for `attempt` (if still installed) so any
    /// loop the failed attempt already spawned — e.g. a `receive_loop`
    /// started before a handshake timeout — unwinds instead of leaking.
    fn roll_back_failed_attempt(&self, attempt: u64) {
        if self.attempt.load(Ordering::SeqCst) == attempt {
            if let Some(token) = self.worker_token.lock().unwrap().take() {
                token.cancel();
            }
            let mut state = self.state.lock().unwrap();
            if *state != ConnectionState::Disposed {
                *state = ConnectionState::Idle;
            }
        }
    }

    async fn connect_inner(self: &Arc<Self>, worker: &CancellationToken, attempt: u64) -> Result<()> {
        let info = self.server_info.resolve(self.config.room_id).await?;
        let transport = self.opener.open(&info).await?;
        let (mut writer, reader) = transport.split();

        let join_body = serde_json::json!({
            "uid": info.user_id,
            "roomid": self.config.room_id,
            "protover": self.config.protocol_version,
            "platform": "web",
            "clientver": "1.13.4",
            "type": 2,
            "key": info.token,
        });
        let body_bytes = serde_json::to_vec(&join_body)
            .map_err(|e| DanmakuError::DecodeError(e.to_string()))?;
        let join_frame =
            frame::encode_with_body(frame::ACTION_JOIN_ROOM, self.config.protocol_version, &body_bytes);
        writer.send(&join_frame, worker).await?;

        let (ack_tx, ack_rx) = tokio::sync::oneshot::channel::<Result<()>>();
        let ack_slot = Arc::new(Mutex::new(Some(ack_tx)));

        let recv_conn = self.clone();
        let recv_worker = worker.clone();
        tokio::spawn(async move {
            recv_conn.receive_loop(reader, recv_worker, ack_slot, attempt).await;
        });

        let ack_wait = async {
            match ack_rx.await {
                Ok(result) => result,
                Err(_) => Err(DanmakuError::TransportClosed),
            }
        };
        match self.config.handshake_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, ack_wait).await {
                Ok(inner) => inner?,
                Err(_) => return Err(DanmakuError::HandshakeTimeout(timeout)),
            },
            None => ack_wait.await?,
        }

        *self.state.lock().unwrap() = ConnectionState::Running;
        info!(room_id = self.config.room_id, attempt, "connected");
        self.dispatcher.dispatch(Event::Connected { time: SystemTime::now() });

        let hb_conn = self.clone();
        let hb_worker = worker.clone();
        tokio::spawn(async move {
            hb_conn.heartbeat_loop(writer, hb_worker, attempt).await;
        });

        Ok(())
    }

    async fn receive_loop(
        self: Arc<Self>,
        mut reader: Box<dyn TransportReader>,
        worker: CancellationToken,
        ack_slot: Arc<Mutex<Option<tokio::sync::oneshot::Sender<Result<()>>>>>,
        attempt: u64,
    ) {
        let result = self.receive_loop_body(&mut reader, &worker, &ack_slot).await;
        if let Err(e) = &result {
            debug!(attempt, err = %e, "receive loop exiting");
        }

        // If connected_ack never arrived, this loop's own failure (including a
        // caller cancellation surfacing as `Cancelled`) is the handshake's
        // outcome — deliver it so `connect()` doesn't wait on a dropped sender.
        let description = match &result {
            Ok(()) => None,
            Err(DanmakuError::Cancelled) => None,
            Err(e) => Some(e.to_string()),
        };
        if let Some(tx) = ack_slot.lock().unwrap().take() {
            let _ = tx.send(result);
        }

        self.teardown(attempt, description).await;
    }

    async fn receive_loop_body(
        &self,
        reader: &mut Box<dyn TransportReader>,
        worker: &CancellationToken,
        ack_slot: &Arc<Mutex<Option<tokio::sync::oneshot::Sender<Result<()>>>>>,
    ) -> Result<()> {
        let mut header_buf = [0u8; HEADER_LEN];
        let mut body_buf: Vec<u8> = Vec::new();

        loop {
            reader.receive_exact(&mut header_buf, worker).await?;
            let header = frame::decode_header(&header_buf)?;

            let body_len = header.body_length();
            if body_len > self.config.max_body_len {
                return Err(DanmakuError::FrameTooLarge {
                    len: body_len,
                    max: self.config.max_body_len,
                });
            }

            body_buf.clear();
            body_buf.resize(body_len, 0);
            if body_len > 0 {
                reader.receive_exact(&mut body_buf, worker).await?;
            }

            if header.action == frame::ACTION_CONNECT_ACK {
                if let Some(tx) = ack_slot.lock().unwrap().take() {
                    let _ = tx.send(Ok(()));
                }
                continue;
            }

            for event in classifier::classify(&header, &body_buf) {
                self.dispatcher.dispatch(event);
            }
        }
    }

    async fn heartbeat_loop(
        self: Arc<Self>,
        mut writer: Box<dyn TransportWriter>,
        worker: CancellationToken,
        attempt: u64,
    ) {
        let result = self.heartbeat_loop_body(&mut writer, &worker).await;
        writer.close().await;
        if let Err(e) = &result {
            debug!(attempt, err = %e, "heartbeat loop exiting");
        }
        let description = match &result {
            Ok(()) => None,
            Err(DanmakuError::Cancelled) => None,
            Err(e) => Some(e.to_string()),
        };
        self.teardown(attempt, description).await;
    }

    async fn heartbeat_loop_body(
        &self,
        writer: &mut Box<dyn TransportWriter>,
        worker: &CancellationToken,
    ) -> Result<()> {
        let mut ticker = tokio::time::interval(self.config.heartbeat_interval);
        ticker.tick().await; // first tick fires immediately; the join-room frame already opened the session

        loop {
            tokio::select! {
                biased;
                _ = worker.cancelled() => return Err(DanmakuError::Cancelled),
                _ = ticker.tick() => {
                    let started = tokio::time::Instant::now();
                    writer.send(&frame::HEARTBEAT_FRAME, worker).await?;
                    let elapsed = started.elapsed();
                    if elapsed >= self.config.heartbeat_interval {
                        return Err(DanmakuError::HeartbeatOverrun(elapsed));
                    }
                }
            }
        }
    }

    /// Shared teardown path for both loops. Idempotent: only the first
    /// caller (of possibly two, one per loop) for a given `attempt` emits
    /// the `Disconnected` event or mutates shared state. `error_description`
    /// is `None` for a voluntary shutdown or a cancellation — only a genuine
    /// failure is reported on the `Disconnected` event.
    async fn teardown(&self, attempt: u64, error_description: Option<String>) {
        if self.attempt.load(Ordering::SeqCst) == attempt {
            if let Some(token) = self.worker_token.lock().unwrap().take() {
                token.cancel();
            }
            let mut state = self.state.lock().unwrap();
            if *state != ConnectionState::Disposed {
                *state = ConnectionState::Idle;
            }
        }

        if self.disconnect_emitted.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(d) = &error_description {
            warn!(attempt, err = %d, "connection torn down with error");
        }
        self.dispatcher.dispatch(Event::Disconnected {
            error: error_description,
            time: SystemTime::now(),
            token: attempt,
        });
    }

    /// Idempotent, voluntary shutdown. Marks the connection `ShuttingDown`,
    /// cancels the worker token for the current attempt (if any is
    /// running), and lets the two loops unwind through
    /// [`Connection::teardown`], which takes it the rest of the way to
    /// `Idle`.
    pub fn disconnect(&self) {
        if let Some(token) = self.worker_token.lock().unwrap().take() {
            let mut state = self.state.lock().unwrap();
            if *state == ConnectionState::Running {
                *state = ConnectionState::ShuttingDown;
            }
            drop(state);
            token.cancel();
        }
    }

    /// Terminal shutdown. After this call every `connect()` fails with
    /// [`DanmakuError::Disposed`].
    pub fn dispose(&self) {
        self.disposed.cancel();
        if let Some(token) = self.worker_token.lock().unwrap().take() {
            token.cancel();
        }
        *self.state.lock().unwrap() = ConnectionState::Disposed;
    }
}
