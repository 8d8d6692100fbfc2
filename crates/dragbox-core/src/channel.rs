//! WebSocket replication channel.
//!
//! The session only needs something that can send text frames and hand back
//! parsed [`SyncEvent`]s; [`NativeWebSocket`] is the stock implementation.

use crate::protocol::{ConnectionState, SyncEvent};
use std::net::TcpStream;
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender, TryRecvError, channel};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;
use tungstenite::Message;
use tungstenite::stream::MaybeTlsStream;
use url::Url;

/// Errors from the channel client.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Already connected")]
    AlreadyConnected,
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    #[error("Not connected")]
    NotConnected,
    #[error("Send failed: {0}")]
    Send(String),
}

/// A bidirectional message pipe to the relay.
pub trait Transport {
    /// Queue a text frame for delivery. Fire-and-forget.
    fn send(&self, msg: &str) -> Result<(), ChannelError>;

    /// Drain events received since the last poll (non-blocking).
    fn poll_events(&mut self) -> Vec<SyncEvent>;
}

/// Exponential backoff between reconnect attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(10),
            max_attempts: None,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before attempt `attempt` (1-based), or `None` once attempts are exhausted.
    pub fn delay(&self, attempt: u32) -> Option<Duration> {
        if self.max_attempts.is_some_and(|max| attempt > max) {
            return None;
        }
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        Some(self.initial_delay.saturating_mul(factor).min(self.max_delay))
    }
}

/// Requests from the session side to the socket thread.
enum WsCommand {
    Send(String),
    Close,
}

/// Why a connected socket loop ended.
enum LoopExit {
    CloseRequested,
    ConnectionLost,
}

/// Relay connection driven by a background socket thread.
///
/// Never blocks the caller and reconnects on its own after a dropped
/// connection. Frames sent while disconnected are
/// discarded; the session republishes full state after every rejoin.
pub struct NativeWebSocket {
    state: ConnectionState,
    policy: ReconnectPolicy,
    events: Vec<SyncEvent>,
    /// Outbound requests; `None` while disconnected.
    cmd_tx: Option<Sender<WsCommand>>,
    /// Inbound events from the socket thread.
    event_rx: Option<Receiver<SyncEvent>>,
    _thread: Option<JoinHandle<()>>,
}

impl NativeWebSocket {
    /// Disconnected client with the default reconnect policy.
    pub fn new() -> Self {
        Self::with_policy(ReconnectPolicy::default())
    }

    pub fn with_policy(policy: ReconnectPolicy) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            policy,
            events: Vec::new(),
            cmd_tx: None,
            event_rx: None,
            _thread: None,
        }
    }

    /// Start the socket thread for a `ws://` or `wss://` URL.
    pub fn connect(&mut self, url: &str) -> Result<(), ChannelError> {
        if self.cmd_tx.is_some() {
            return Err(ChannelError::AlreadyConnected);
        }

        let parsed_url = Url::parse(url).map_err(|e| ChannelError::InvalidUrl(e.to_string()))?;
        if parsed_url.scheme() != "ws" && parsed_url.scheme() != "wss" {
            return Err(ChannelError::InvalidUrl(format!(
                "unsupported scheme {}",
                parsed_url.scheme()
            )));
        }

        self.state = ConnectionState::Connecting;

        let (cmd_tx, cmd_rx) = channel::<WsCommand>();
        let (event_tx, event_rx) = channel::<SyncEvent>();
        let url = url.to_string();
        let policy = self.policy;

        let handle = thread::spawn(move || run_connection(&url, policy, &cmd_rx, &event_tx));

        self.cmd_tx = Some(cmd_tx);
        self.event_rx = Some(event_rx);
        self._thread = Some(handle);
        Ok(())
    }

    /// Disconnect from the server and stop reconnecting.
    pub fn disconnect(&mut self) {
        if let Some(tx) = self.cmd_tx.take() {
            let _ = tx.send(WsCommand::Close);
        }
        self.event_rx = None;
        self._thread = None;
        self.state = ConnectionState::Disconnected;
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }
}

impl Transport for NativeWebSocket {
    fn send(&self, msg: &str) -> Result<(), ChannelError> {
        match self.cmd_tx {
            Some(ref tx) => tx
                .send(WsCommand::Send(msg.to_string()))
                .map_err(|e| ChannelError::Send(e.to_string())),
            None => Err(ChannelError::NotConnected),
        }
    }

    fn poll_events(&mut self) -> Vec<SyncEvent> {
        if let Some(ref rx) = self.event_rx {
            while let Ok(event) = rx.try_recv() {
                match &event {
                    SyncEvent::Connected => self.state = ConnectionState::Connected,
                    SyncEvent::Disconnected => self.state = ConnectionState::Disconnected,
                    SyncEvent::Reconnecting { .. } => self.state = ConnectionState::Connecting,
                    _ => {}
                }
                self.events.push(event);
            }
        }

        std::mem::take(&mut self.events)
    }
}

impl Default for NativeWebSocket {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for NativeWebSocket {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Body of the WebSocket thread: connect, pump frames, back off, repeat.
fn run_connection(url: &str, policy: ReconnectPolicy, cmd_rx: &Receiver<WsCommand>, event_tx: &Sender<SyncEvent>) {
    let mut attempt = 0u32;

    loop {
        log::info!("Connecting to relay at {}", url);
        match tungstenite::connect(url) {
            Ok((mut socket, response)) => {
                log::info!("Relay connection open ({})", response.status());
                attempt = 0;
                let _ = event_tx.send(SyncEvent::Connected);

                set_read_timeout(&mut socket);
                let exit = pump(&mut socket, cmd_rx, event_tx);
                let _ = event_tx.send(SyncEvent::Disconnected);
                if matches!(exit, LoopExit::CloseRequested) {
                    break;
                }
            }
            Err(e) => {
                log::warn!("Relay connection failed: {}", e);
                let _ = event_tx.send(SyncEvent::Error {
                    message: format!("cannot reach relay: {}", e),
                });
            }
        }

        attempt += 1;
        let Some(delay) = policy.delay(attempt) else {
            log::warn!("Giving up on {} after {} attempts", url, attempt - 1);
            let _ = event_tx.send(SyncEvent::Disconnected);
            break;
        };
        let _ = event_tx.send(SyncEvent::Reconnecting { attempt });
        log::info!("Reconnecting in {:?} (attempt {})", delay, attempt);

        if !wait_backoff(cmd_rx, delay) {
            break;
        }
    }

    log::debug!("Socket thread for {} stopped", url);
}

/// Sleep for the full `delay` while staying responsive to close requests.
///
/// Returns false if the session asked to close.
fn wait_backoff(cmd_rx: &Receiver<WsCommand>, delay: Duration) -> bool {
    let deadline = Instant::now() + delay;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match cmd_rx.recv_timeout(remaining) {
            Ok(WsCommand::Close) | Err(RecvTimeoutError::Disconnected) => return false,
            Ok(WsCommand::Send(_)) => log::debug!("Dropping frame sent while disconnected"),
            Err(RecvTimeoutError::Timeout) => return true,
        }
    }
}

type Socket = tungstenite::WebSocket<MaybeTlsStream<TcpStream>>;

fn set_read_timeout(socket: &mut Socket) {
    let tcp = match socket.get_mut() {
        MaybeTlsStream::Plain(tcp) => &*tcp,
        MaybeTlsStream::Rustls(tls) => &tls.sock,
        _ => {
            log::debug!("Unknown stream type, keeping blocking reads");
            return;
        }
    };
    let _ = tcp.set_read_timeout(Some(Duration::from_millis(50)));
    let _ = tcp.set_write_timeout(Some(Duration::from_secs(5)));
}

fn close(socket: &mut Socket) -> LoopExit {
    if let Err(e) = socket.close(None) {
        log::debug!("Close handshake failed: {}", e);
    }
    LoopExit::CloseRequested
}

fn pump(socket: &mut Socket, cmd_rx: &Receiver<WsCommand>, event_tx: &Sender<SyncEvent>) -> LoopExit {
    loop {
        // Drain every queued command before blocking on a read.
        loop {
            match cmd_rx.try_recv() {
                Ok(WsCommand::Send(msg)) => {
                    log::debug!("-> {}", msg.chars().take(100).collect::<String>());
                    if let Err(e) = socket.send(Message::Text(msg)) {
                        log::warn!("Relay write failed: {}", e);
                        return LoopExit::ConnectionLost;
                    }
                }
                Ok(WsCommand::Close) => {
                    log::info!("Closing relay connection");
                    return close(socket);
                }
                Err(TryRecvError::Disconnected) => {
                    log::debug!("Session side dropped; closing relay connection");
                    return close(socket);
                }
                Err(TryRecvError::Empty) => break,
            }
        }

        match socket.read() {
            Ok(Message::Text(txt)) => match SyncEvent::from_json(&txt) {
                Ok(event) => {
                    let _ = event_tx.send(event);
                }
                Err(e) => log::warn!("Dropping unparseable server message ({}): {}", e, txt),
            },
            Ok(Message::Ping(data)) => {
                let _ = socket.send(Message::Pong(data));
            }
            Ok(Message::Close(_)) => {
                log::info!("Relay closed the connection");
                return LoopExit::ConnectionLost;
            }
            Ok(_) => {}
            Err(tungstenite::Error::Io(ref e))
                if e.kind() == std::io::ErrorKind::WouldBlock || e.kind() == std::io::ErrorKind::TimedOut => {}
            Err(e) => {
                log::warn!("Relay read failed: {}", e);
                return LoopExit::ConnectionLost;
            }
        }
    }
}
