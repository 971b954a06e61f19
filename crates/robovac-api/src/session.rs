//! Persistent session with a single device.
//!
//! Owns one TCP connection to port 6668, serializes outbound frames through
//! a single send path, and runs two background tasks per connection: a
//! reader that decodes inbound frames and broadcasts them, and a keepalive
//! that sends heartbeats and declares the link dead after a silent window.
//!
//! Reconnection is the caller's business: watch [`Session::state`] and call
//! [`Session::connect`] again.
//!
//! # Example
//!
//! ```rust,ignore
//! use robovac_api::{DeviceKey, DpsMap, Session, SessionConfig, SessionEvent};
//!
//! let key = DeviceKey::from_local_key("0123456789abcdef")?;
//! let session = Session::new(SessionConfig::new("eb01...", "192.168.1.42"), key);
//! let mut events = session.subscribe();
//!
//! session.connect().await?;
//! session.set_dps(&DpsMap::single(152, "AggN")).await?;
//!
//! while let Ok(SessionEvent::Frame(frame)) = events.recv().await {
//!     println!("{:?} seq={} {:?}", frame.kind, frame.seq, frame.dps);
//! }
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde_json::{Value, json};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, broadcast, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};

use crate::cipher::{Cipher, DeviceKey};
use crate::dps::DpsMap;
use crate::error::Error;
use crate::frame::{self, CommandCode, Frame, FrameDecoder};
use crate::transport::SessionConfig;

// ── Channel and buffer sizes ─────────────────────────────────────────

const EVENT_CHANNEL_CAPACITY: usize = 256;
const READ_BUF_SIZE: usize = 4096;

// ── Public types ─────────────────────────────────────────────────────

/// Connectivity of a session, observable through [`Session::state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    /// Transport open, waiting for the first decoded frame.
    Connecting,
    Connected,
}

/// What an inbound frame is, judged by its command code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Answer to a `DP_QUERY`. Its sequence number matches the query's.
    QueryResponse,
    /// Anything the device pushes on its own: status reports, control acks.
    GratuitousUpdate,
    /// Answer to a heartbeat.
    PingResponse,
}

impl FrameKind {
    pub fn classify(command: CommandCode) -> Self {
        match command {
            CommandCode::DpQuery | CommandCode::DpQueryNew => Self::QueryResponse,
            CommandCode::HeartBeat => Self::PingResponse,
            _ => Self::GratuitousUpdate,
        }
    }
}

/// A decoded frame as delivered to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundFrame {
    pub kind: FrameKind,
    pub seq: u32,
    pub command: CommandCode,
    pub return_code: Option<u32>,
    pub dps: DpsMap,
}

/// Everything a session broadcasts, in wire order.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Frame(Arc<InboundFrame>),
    /// Emitted once when the session becomes Connected and once when it drops.
    Connectivity { connected: bool },
}

// ── Session ──────────────────────────────────────────────────────────

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Sequence allocation and the write half, behind one lock.
struct SendPath {
    writer: Option<BoxedWriter>,
    connection_id: u64,
    next_seq: u32,
}

struct ConnectionHandle {
    id: u64,
    cancel: CancellationToken,
}

/// Handle to one device. Cheaply cloneable.
///
/// Dropping the last handle cancels the background tasks and closes the
/// connection, even without [`Session::close`].
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
    _alive: Arc<DropGuard>,
}

struct SessionInner {
    config: SessionConfig,
    cipher: Cipher,
    state: watch::Sender<ConnectionState>,
    event_tx: broadcast::Sender<SessionEvent>,
    send_path: Mutex<SendPath>,
    /// The live connection, if any. Taking it out is what makes teardown run once.
    connection: std::sync::Mutex<Option<ConnectionHandle>>,
    next_connection_id: AtomicU64,
    cancel: CancellationToken,
}

impl Session {
    /// Create a session. Does NOT connect.
    pub fn new(config: SessionConfig, key: DeviceKey) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();

        Self {
            _alive: Arc::new(cancel.clone().drop_guard()),
            inner: Arc::new(SessionInner {
                config,
                cipher: Cipher::new(key),
                state,
                event_tx,
                send_path: Mutex::new(SendPath {
                    writer: None,
                    connection_id: 0,
                    next_seq: 1,
                }),
                connection: std::sync::Mutex::new(None),
                next_connection_id: AtomicU64::new(1),
                cancel,
            }),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn device_id(&self) -> &str {
        &self.inner.config.device_id
    }

    // ── Connection lifecycle ─────────────────────────────────────────

    /// Open a TCP connection and complete the hello exchange.
    ///
    /// Resolves once the first frame has been decoded. Replaces any
    /// existing connection.
    pub async fn connect(&self) -> Result<(), Error> {
        let address = self.inner.config.address();
        let timeout = self.inner.config.connect_timeout;

        self.inner.close_current("reconnecting").await;
        self.inner.state.send_replace(ConnectionState::Connecting);
        info!(device_id = %self.device_id(), %address, "connecting");

        let stream = match tokio::time::timeout(timeout, TcpStream::connect(&address)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                self.inner.state.send_replace(ConnectionState::Disconnected);
                warn!(device_id = %self.device_id(), error = %e, "connect failed");
                return Err(Error::Transport(e));
            }
            Err(_) => {
                self.inner.state.send_replace(ConnectionState::Disconnected);
                return Err(Error::timeout("connecting", timeout));
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "failed to set TCP_NODELAY");
        }

        self.start(stream).await
    }

    /// Run the session over an already-open stream.
    ///
    /// Same handshake as [`connect`](Self::connect); useful for tests and
    /// for transports other than plain TCP.
    pub async fn attach<S>(&self, stream: S) -> Result<(), Error>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        self.inner.close_current("replaced by attached stream").await;
        self.start(stream).await
    }

    async fn start<S>(&self, stream: S) -> Result<(), Error>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        let id = self.inner.next_connection_id.fetch_add(1, Ordering::Relaxed);
        let cancel = self.inner.cancel.child_token();

        {
            let mut path = self.inner.send_path.lock().await;
            path.writer = Some(Box::new(writer));
            path.connection_id = id;
        }
        *self.inner.current_connection() = Some(ConnectionHandle {
            id,
            cancel: cancel.clone(),
        });
        self.inner.state.send_if_modified(|state| {
            let changed = *state != ConnectionState::Connecting;
            *state = ConnectionState::Connecting;
            changed
        });
        let mut state_rx = self.inner.state.subscribe();

        let (seen_tx, seen_rx) = watch::channel(Instant::now());
        tokio::spawn(reader_task(
            Arc::clone(&self.inner),
            id,
            reader,
            seen_tx,
            cancel.clone(),
        ));
        tokio::spawn(keepalive_task(Arc::clone(&self.inner), id, seen_rx, cancel));

        // Hello: the answer to this query completes the handshake.
        if let Err(e) = self.query().await {
            self.inner.teardown(id, "hello failed").await;
            return Err(e);
        }

        let handshake = async {
            loop {
                let state = *state_rx.borrow_and_update();
                match state {
                    ConnectionState::Connected => return Ok(()),
                    ConnectionState::Disconnected => return Err(Error::ConnectionClosed),
                    ConnectionState::Connecting => {}
                }
                if state_rx.changed().await.is_err() {
                    return Err(Error::ConnectionClosed);
                }
            }
        };

        let timeout = self.inner.config.handshake_timeout;
        if let Ok(result) = tokio::time::timeout(timeout, handshake).await {
            result
        } else {
            warn!(device_id = %self.device_id(), "no reply to hello");
            self.inner.teardown(id, "handshake timed out").await;
            Err(Error::timeout("waiting for handshake", timeout))
        }
    }

    /// Tear down the current connection, if any.
    pub async fn close(&self) {
        self.inner.close_current("closed by caller").await;
    }

    // ── Sending ──────────────────────────────────────────────────────

    /// Encode and write one frame, returning its sequence number.
    ///
    /// Completion means the frame was written, not that the device acted
    /// on it. Fails fast with [`Error::NotConnected`] while disconnected.
    pub async fn send(&self, command: CommandCode, dps: &DpsMap) -> Result<u32, Error> {
        let payload = match command {
            CommandCode::DpQuery | CommandCode::DpQueryNew => Some(self.inner.query_payload()),
            CommandCode::HeartBeat => None,
            _ => Some(self.inner.control_payload(dps)),
        };
        self.inner.send_frame(command, payload.as_ref()).await
    }

    /// Write Data Points (`CONTROL`).
    pub async fn set_dps(&self, dps: &DpsMap) -> Result<u32, Error> {
        self.send(CommandCode::Control, dps).await
    }

    /// Ask for every Data Point (`DP_QUERY`). The answer arrives as a
    /// [`FrameKind::QueryResponse`] with the returned sequence number.
    pub async fn query(&self) -> Result<u32, Error> {
        self.send(CommandCode::DpQuery, &DpsMap::new()).await
    }

    /// Query and wait for the matching response.
    pub async fn query_and_wait(&self, timeout: Duration) -> Result<DpsMap, Error> {
        let mut events = self.subscribe();
        let seq = self.query().await?;

        let wait = async {
            loop {
                match events.recv().await {
                    Ok(SessionEvent::Frame(frame))
                        if frame.kind == FrameKind::QueryResponse && frame.seq == seq =>
                    {
                        return Ok(frame.dps.clone());
                    }
                    Ok(SessionEvent::Connectivity { connected: false })
                    | Err(broadcast::error::RecvError::Closed) => {
                        return Err(Error::ConnectionClosed);
                    }
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                }
            }
        };

        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| Error::timeout("waiting for query response", timeout))?
    }

    // ── State observation ────────────────────────────────────────────

    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    pub fn current_state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.current_state() == ConnectionState::Connected
    }

    /// Receive inbound frames and connectivity changes.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.event_tx.subscribe()
    }
}

impl SessionInner {
    fn current_connection(&self) -> MutexGuard<'_, Option<ConnectionHandle>> {
        self.connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn is_current(&self, id: u64) -> bool {
        self.current_connection()
            .as_ref()
            .is_some_and(|handle| handle.id == id)
    }

    fn query_payload(&self) -> Value {
        let id = &self.config.device_id;
        json!({ "gwId": id, "devId": id, "uid": id, "t": timestamp() })
    }

    fn control_payload(&self, dps: &DpsMap) -> Value {
        let id = &self.config.device_id;
        json!({ "devId": id, "uid": id, "t": timestamp(), "dps": dps.to_json() })
    }

    async fn send_frame(&self, command: CommandCode, payload: Option<&Value>) -> Result<u32, Error> {
        if *self.state.borrow() == ConnectionState::Disconnected {
            return Err(Error::NotConnected);
        }

        let (seq, connection_id, written) = {
            let mut path = self.send_path.lock().await;
            let SendPath {
                writer,
                connection_id,
                next_seq,
            } = &mut *path;
            let Some(writer) = writer.as_mut() else {
                return Err(Error::NotConnected);
            };

            let seq = *next_seq;
            let bytes = frame::encode(seq, command, payload, &self.cipher)?;
            *next_seq = next_seq.wrapping_add(1).max(1);

            let write = async {
                writer.write_all(&bytes).await?;
                writer.flush().await
            };
            let written = tokio::time::timeout(self.config.write_timeout, write).await;
            (seq, *connection_id, written)
        };

        match written {
            Ok(Ok(())) => {
                debug!(device_id = %self.config.device_id, seq, ?command, "frame sent");
                Ok(seq)
            }
            Ok(Err(e)) => {
                warn!(device_id = %self.config.device_id, error = %e, "write failed");
                self.teardown(connection_id, "write failed").await;
                Err(Error::Transport(e))
            }
            Err(_) => {
                self.teardown(connection_id, "write timed out").await;
                Err(Error::timeout("writing frame", self.config.write_timeout))
            }
        }
    }

    // ── Inbound ──────────────────────────────────────────────────────

    /// Pull every complete frame out of the decoder.
    fn drain(&self, id: u64, decoder: &mut FrameDecoder, seen: &watch::Sender<Instant>) {
        loop {
            match decoder.next_frame() {
                Ok(Some(frame)) => {
                    seen.send_replace(Instant::now());
                    self.on_frame(id, frame);
                }
                Ok(None) => break,
                Err(e) => {
                    // A rejected frame still proves the link is alive.
                    seen.send_replace(Instant::now());
                    self.log_dropped(&e);
                }
            }
        }
    }

    fn on_frame(&self, id: u64, frame: Frame) {
        if !self.is_current(id) {
            return;
        }

        let became_connected = self.state.send_if_modified(|state| {
            if *state == ConnectionState::Connecting {
                *state = ConnectionState::Connected;
                true
            } else {
                false
            }
        });
        if became_connected {
            info!(device_id = %self.config.device_id, "session connected");
            let _ = self.event_tx.send(SessionEvent::Connectivity { connected: true });
        }

        let kind = FrameKind::classify(frame.command);
        debug!(
            device_id = %self.config.device_id,
            seq = frame.seq,
            command = ?frame.command,
            ?kind,
            dps = frame.dps.len(),
            "frame received"
        );

        // Ignore send errors: no subscribers right now.
        let _ = self.event_tx.send(SessionEvent::Frame(Arc::new(InboundFrame {
            kind,
            seq: frame.seq,
            command: frame.command,
            return_code: frame.return_code,
            dps: frame.dps,
        })));
    }

    fn log_dropped(&self, error: &Error) {
        match error {
            Error::Payload { reason, raw } => warn!(
                device_id = %self.config.device_id,
                reason = %reason,
                raw = %hex::encode(raw),
                "dropping frame with undecodable payload"
            ),
            other => warn!(
                device_id = %self.config.device_id,
                error = %other,
                "dropping corrupt frame"
            ),
        }
    }

    // ── Teardown ─────────────────────────────────────────────────────

    async fn close_current(&self, reason: &str) {
        let id = self.current_connection().as_ref().map(|handle| handle.id);
        if let Some(id) = id {
            self.teardown(id, reason).await;
        }
    }

    /// Close connection `id`. Only the first caller for a given id does anything.
    async fn teardown(&self, id: u64, reason: &str) {
        let handle = {
            let mut current = self.current_connection();
            if current.as_ref().is_some_and(|handle| handle.id == id) {
                current.take()
            } else {
                None
            }
        };
        let Some(handle) = handle else {
            return;
        };

        handle.cancel.cancel();
        {
            let mut path = self.send_path.lock().await;
            if path.connection_id == id {
                path.writer = None;
            }
        }

        let previous = self.state.send_replace(ConnectionState::Disconnected);
        if previous == ConnectionState::Connected {
            info!(device_id = %self.config.device_id, reason, "session disconnected");
            let _ = self
                .event_tx
                .send(SessionEvent::Connectivity { connected: false });
        } else {
            debug!(device_id = %self.config.device_id, reason, "connection attempt abandoned");
        }
    }
}

// ── Background tasks ─────────────────────────────────────────────────

async fn reader_task<R>(
    inner: Arc<SessionInner>,
    id: u64,
    mut reader: R,
    seen: watch::Sender<Instant>,
    cancel: CancellationToken,
) where
    R: AsyncRead + Unpin,
{
    let mut decoder = FrameDecoder::new(inner.cipher.clone());
    let mut buf = vec![0u8; READ_BUF_SIZE];

    let reason = loop {
        let read = tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            read = reader.read(&mut buf) => read,
        };

        match read {
            Ok(0) => break "connection closed by device",
            Ok(n) => {
                decoder.feed(&buf[..n]);
                inner.drain(id, &mut decoder, &seen);
            }
            Err(e) => {
                warn!(device_id = %inner.config.device_id, error = %e, "read failed");
                break "read failed";
            }
        }
    };

    inner.teardown(id, reason).await;
}

/// Heartbeat on a fixed period; tear down after a silent window.
async fn keepalive_task(
    inner: Arc<SessionInner>,
    id: u64,
    mut seen: watch::Receiver<Instant>,
    cancel: CancellationToken,
) {
    let period = inner.config.keepalive_interval;
    let timeout = inner.config.keepalive_timeout;

    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut deadline = *seen.borrow_and_update() + timeout;

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            changed = seen.changed() => {
                if changed.is_err() {
                    return;
                }
                deadline = *seen.borrow_and_update() + timeout;
            }
            () = tokio::time::sleep_until(deadline) => {
                warn!(
                    device_id = %inner.config.device_id,
                    timeout_secs = timeout.as_secs(),
                    "no frame received within keepalive timeout"
                );
                inner.teardown(id, "keepalive timeout").await;
                return;
            }
            _ = ticker.tick() => {
                if let Err(e) = inner.send_frame(CommandCode::HeartBeat, None).await {
                    debug!(device_id = %inner.config.device_id, error = %e, "heartbeat failed");
                    return;
                }
            }
        }
    }
}

/// Seconds since the epoch, as the string devices expect in `t`.
fn timestamp() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
        .to_string()
}
