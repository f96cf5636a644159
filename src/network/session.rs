//! Client Network Session
//!
//! Runs the client side of the handshake on a dedicated thread, then decodes
//! every incoming frame into a queue that the presentation loop drains once
//! per frame.
//!
//! The presentation loop writes outgoing frames itself through
//! [`SessionHandle::send`]. The session thread only reads, so the write half is
//! a second WebSocket over a clone of the same TCP socket and the blocking read
//! never holds the write lock.

use std::collections::VecDeque;
use std::io;
use std::net::{Shutdown, TcpStream};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::thread::{self, JoinHandle};

use thiserror::Error;
use tokio_tungstenite::tungstenite::client::client;
use tokio_tungstenite::tungstenite::handshake::HandshakeError;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage, WebSocket};
use tracing::{debug, error, info};

use crate::network::protocol::{DecodeError, Message, MessageKind, PeerId};
use crate::network::server::DEFAULT_PORT;

/// Default presentation loop rate (Hz).
pub const DEFAULT_FRAME_RATE: u32 = 60;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Relay host.
    pub host: String,
    /// Relay port.
    pub port: u16,
    /// Presentation loop rate (Hz).
    pub frame_rate: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            frame_rate: DEFAULT_FRAME_RATE,
        }
    }
}

impl ClientConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("HALL_SERVER_HOST").unwrap_or(defaults.host),
            port: env_parse("HALL_SERVER_PORT").unwrap_or(defaults.port),
            frame_rate: env_parse("HALL_CLIENT_FPS")
                .filter(|fps| *fps > 0)
                .unwrap_or(defaults.frame_rate),
        }
    }

    /// `host:port` of the relay.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// WebSocket URL of the relay.
    pub fn url(&self) -> String {
        format!("ws://{}/", self.server_addr())
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

/// Session errors. All of them end the session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Socket error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    /// WebSocket handshake could not complete on a blocking socket.
    #[error("WebSocket handshake interrupted")]
    HandshakeInterrupted,

    /// Malformed frame from the relay.
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Relay answered `Hello` with something other than `Welcome`.
    #[error("expected Welcome, got {0:?}")]
    UnexpectedGreeting(MessageKind),

    /// Text frames are not part of the protocol.
    #[error("Unexpected text frame")]
    TextFrame,

    /// Relay closed the connection.
    #[error("Connection closed")]
    Closed,

    /// Handshake has not completed yet.
    #[error("Not connected")]
    NotConnected,

    /// Session thread panicked.
    #[error("Session thread panicked")]
    Panicked,
}

/// FIFO hand-off between the session thread and the presentation loop.
#[derive(Debug, Clone, Default)]
pub struct IncomingQueue {
    inner: Arc<Mutex<VecDeque<Message>>>,
}

impl IncomingQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message.
    pub fn push(&self, msg: Message) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(msg);
    }

    /// Oldest message, or `None` if the queue is empty. Never waits.
    pub fn try_pop(&self) -> Option<Message> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    /// Queued message count.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// State shared between the session thread and its handle.
#[derive(Default)]
struct Shared {
    queue: IncomingQueue,
    /// Set once after `Welcome`; doubles as the connected flag.
    own_id: OnceLock<PeerId>,
    /// Set before `own_id`.
    writer: OnceLock<Mutex<WebSocket<TcpStream>>>,
    /// Clone of the socket, kept for shutdown.
    socket: OnceLock<TcpStream>,
    disconnected: AtomicBool,
}

/// Starts client sessions.
pub struct NetworkSession;

impl NetworkSession {
    /// Spawn the session thread and return immediately.
    pub fn connect(config: &ClientConfig) -> io::Result<SessionHandle> {
        let shared = Arc::new(Shared::default());
        let addr = config.server_addr();
        let url = config.url();

        let thread_shared = shared.clone();
        let thread = thread::Builder::new()
            .name("hall-net".to_string())
            .spawn(move || {
                let result = run_session(&addr, &url, &thread_shared);
                if let Err(e) = &result {
                    error!("Session ended: {}", e);
                }
                thread_shared.disconnected.store(true, Ordering::SeqCst);
                result
            })?;

        Ok(SessionHandle {
            shared,
            thread: Some(thread),
        })
    }
}

/// Presentation-side handle to a running session.
pub struct SessionHandle {
    shared: Arc<Shared>,
    thread: Option<JoinHandle<Result<(), SessionError>>>,
}

impl SessionHandle {
    /// Id assigned by the relay, once connected.
    pub fn own_id(&self) -> Option<PeerId> {
        self.shared.own_id.get().copied()
    }

    /// Handshake completed.
    pub fn is_connected(&self) -> bool {
        self.shared.own_id.get().is_some()
    }

    /// Session has ended. Terminal.
    pub fn is_disconnected(&self) -> bool {
        self.shared.disconnected.load(Ordering::SeqCst)
    }

    /// Next decoded message, if any. Never waits.
    pub fn try_recv(&self) -> Option<Message> {
        self.shared.queue.try_pop()
    }

    /// Messages waiting to be drained.
    pub fn pending(&self) -> usize {
        self.shared.queue.len()
    }

    /// Encode and write one message to the relay.
    pub fn send(&self, msg: &Message) -> Result<(), SessionError> {
        let writer = self.shared.writer.get().ok_or(SessionError::NotConnected)?;
        let mut ws = writer.lock().unwrap_or_else(PoisonError::into_inner);
        ws.send(WsMessage::Binary(msg.encode()))?;
        Ok(())
    }

    /// Shut the socket down. The session thread's read fails and it exits;
    /// this does not wait for it.
    pub fn shutdown(&self) {
        if let Some(socket) = self.shared.socket.get() {
            if let Err(e) = socket.shutdown(Shutdown::Both) {
                debug!("Socket shutdown: {}", e);
            }
        }
    }

    /// Wait for the session thread and return how it ended.
    pub fn join(mut self) -> Result<(), SessionError> {
        match self.thread.take() {
            Some(thread) => thread.join().map_err(|_| SessionError::Panicked)?,
            None => Ok(()),
        }
    }
}

fn run_session(addr: &str, url: &str, shared: &Shared) -> Result<(), SessionError> {
    info!("Connecting to {}...", url);

    let stream = TcpStream::connect(addr)?;
    stream.set_nodelay(true)?;
    let _ = shared.socket.set(stream.try_clone()?);

    let (mut reader, _response) = client(url, stream).map_err(|e| match e {
        HandshakeError::Failure(err) => SessionError::WebSocket(err),
        HandshakeError::Interrupted(_) => SessionError::HandshakeInterrupted,
    })?;
    let mut writer = WebSocket::from_raw_socket(reader.get_ref().try_clone()?, Role::Client, None);

    writer.send(WsMessage::Binary(Message::Hello.encode()))?;

    let own_id = match read_message(&mut reader)? {
        Message::Welcome { to_id } => to_id,
        other => return Err(SessionError::UnexpectedGreeting(other.kind())),
    };

    let writer = shared.writer.get_or_init(|| Mutex::new(writer));
    let _ = shared.own_id.set(own_id);
    info!("Connected as {}", own_id.short());

    writer
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .send(WsMessage::Binary(Message::GetState { from_id: own_id }.encode()))?;

    loop {
        let msg = read_message(&mut reader)?;
        debug!("Received {:?}", msg.kind());
        shared.queue.push(msg);
    }
}

/// Block until the next protocol frame.
fn read_message(ws: &mut WebSocket<TcpStream>) -> Result<Message, SessionError> {
    loop {
        match ws.read() {
            Ok(WsMessage::Binary(data)) => return Ok(Message::decode(&data)?),
            Ok(WsMessage::Close(_)) => return Err(SessionError::Closed),
            Ok(WsMessage::Text(_)) => return Err(SessionError::TextFrame),
            Ok(_) => continue,
            Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => {
                return Err(SessionError::Closed)
            }
            Err(e) => return Err(e.into()),
        }
    }
}
