//! WebSocket Relay Server
//!
//! Async relay for kinematic state messages.
//! Authenticates connections, tracks peers and routes or broadcasts frames.
//!
//! Each connection moves through `Connecting → Authenticated → Routing → Closed`:
//!
//! - **Connecting**: the first frame must decode to `Hello`, otherwise the
//!   socket is closed and nothing is registered or announced.
//! - **Authenticated**: the connection's id is sent back in a `Welcome`, the same
//!   `Welcome` goes to every peer already registered, and only then is the new
//!   peer registered.
//! - **Routing**: `Sync` goes to its `to_id` only; everything else goes to every
//!   registered peer except the sender.
//! - **Closed**: the peer is unregistered and `Left` goes to whoever remains.

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

use futures_util::stream::{SplitSink, Stream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tokio_tungstenite::{accept_async, WebSocketStream};
use tracing::{debug, error, info, instrument, warn};

use crate::network::protocol::{DecodeError, Message, MessageKind, PeerId};
use crate::network::registry::{Outbound, PeerChannel, PeerRegistry, RegistryError};

/// Default listen port.
pub const DEFAULT_PORT: u16 = 8172;

/// What to do with a `Sync` whose `to_id` is not registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnknownTargetPolicy {
    /// Treat it as fatal to the sending connection.
    #[default]
    Disconnect,
    /// Log and discard the message.
    Drop,
}

impl FromStr for UnknownTargetPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "disconnect" => Ok(Self::Disconnect),
            "drop" => Ok(Self::Drop),
            other => Err(format!("unknown target policy: {other}")),
        }
    }
}

/// Relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Listen host.
    pub host: String,
    /// Listen port (0 picks a free port).
    pub port: u16,
    /// Maximum registered peers.
    pub max_peers: usize,
    /// Per-peer outbound queue depth.
    pub outbound_capacity: usize,
    /// Handling of `Sync` to unknown peers.
    pub unknown_target: UnknownTargetPolicy,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            max_peers: 256,
            outbound_capacity: 64,
            unknown_target: UnknownTargetPolicy::Disconnect,
        }
    }
}

impl RelayConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("HALL_RELAY_HOST").unwrap_or(defaults.host),
            port: env_parse("HALL_RELAY_PORT").unwrap_or(defaults.port),
            max_peers: env_parse("HALL_RELAY_MAX_PEERS").unwrap_or(defaults.max_peers),
            outbound_capacity: defaults.outbound_capacity,
            unknown_target: env_parse("HALL_RELAY_UNKNOWN_TARGET")
                .unwrap_or(defaults.unknown_target),
        }
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

/// Why a connection never got past `Connecting`.
#[derive(Debug, thiserror::Error)]
pub enum AuthenticationError {
    /// First frame was a valid message, but not `Hello`.
    #[error("expected Hello, got {0:?}")]
    UnexpectedMessage(MessageKind),

    /// First frame did not decode.
    #[error("first frame failed to decode: {0}")]
    Decode(#[from] DecodeError),

    /// Connection closed before any frame arrived.
    #[error("connection closed before Hello")]
    Closed,

    /// Transport failure or non-binary frame.
    #[error("transport error before Hello: {0}")]
    Transport(String),
}

/// Relay errors.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    Bind(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    /// Handshake failed.
    #[error("Authentication failed: {0}")]
    Authentication(#[from] AuthenticationError),

    /// Malformed frame.
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// `Sync` named a peer that is not registered.
    #[error("Routing error: {0}")]
    Routing(#[from] RegistryError),

    /// Text frames are not part of the protocol.
    #[error("Unexpected text frame")]
    TextFrame,
}

/// Per-connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Waiting for `Hello`.
    Connecting,
    /// `Hello` accepted, joining.
    Authenticated,
    /// Registered, relaying frames.
    Routing,
    /// Torn down.
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Authenticated => "authenticated",
            ConnectionState::Routing => "routing",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// The relay server.
pub struct RelayServer {
    /// Relay configuration.
    config: RelayConfig,
    /// Bound listener.
    listener: TcpListener,
    /// Registered peers.
    registry: PeerRegistry,
    /// Shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
}

impl RelayServer {
    /// Bind the listener.
    pub async fn bind(config: RelayConfig) -> Result<Self, RelayError> {
        let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            config,
            listener,
            registry: PeerRegistry::new(),
            shutdown_tx,
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, RelayError> {
        Ok(self.listener.local_addr()?)
    }

    /// Handle to the live registry.
    pub fn registry(&self) -> PeerRegistry {
        self.registry.clone()
    }

    /// Number of registered peers.
    pub async fn peer_count(&self) -> usize {
        self.registry.len().await
    }

    /// Accept connections until [`RelayServer::shutdown`] is called.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<(), RelayError> {
        info!("Relay listening on {}", self.local_addr()?);

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            if self.registry.len().await >= self.config.max_peers {
                                warn!("Peer limit reached, rejecting {}", addr);
                                continue;
                            }

                            debug!("New connection from {}", addr);
                            let registry = self.registry.clone();
                            let config = self.config.clone();
                            tokio::spawn(handle_connection(stream, addr, registry, config));
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Stop accepting connections.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

/// Send `msg` to every registered peer except `except`.
///
/// Iterates a snapshot and never waits on a recipient. A recipient whose
/// channel has closed since the snapshot, or whose queue is full, is logged
/// and skipped. Returns the number of peers reached.
pub async fn broadcast(registry: &PeerRegistry, msg: Message, except: Option<PeerId>) -> usize {
    let mut delivered = 0;

    for (id, channel) in registry.snapshot().await {
        if Some(id) == except {
            continue;
        }
        match channel.try_send(msg) {
            Ok(()) => delivered += 1,
            Err(e) => warn!("Broadcast of {:?} skipped {}: {}", msg.kind(), id.short(), e),
        }
    }

    delivered
}

/// Deliver a `Sync` to its single recipient.
pub async fn route_sync(
    registry: &PeerRegistry,
    msg: Message,
    to_id: PeerId,
    policy: UnknownTargetPolicy,
) -> Result<(), RelayError> {
    match registry.get(&to_id).await {
        Ok(channel) => {
            if let Err(e) = channel.try_send(msg) {
                warn!("Sync to {} not delivered: {}", to_id.short(), e);
            }
            Ok(())
        }
        Err(e) => match policy {
            UnknownTargetPolicy::Disconnect => Err(e.into()),
            UnknownTargetPolicy::Drop => {
                warn!("Dropping Sync: {}", e);
                Ok(())
            }
        },
    }
}

type WsSink = SplitSink<WebSocketStream<TcpStream>, WsMessage>;

/// Drive one connection through its whole lifecycle.
#[instrument(skip(stream, registry, config))]
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    registry: PeerRegistry,
    config: RelayConfig,
) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            error!("WebSocket handshake failed for {}: {}", addr, e);
            return;
        }
    };

    let (ws_sender, mut ws_receiver) = ws_stream.split();
    let peer_id = PeerId::generate();
    let (channel, outbound) = PeerChannel::new(peer_id, config.outbound_capacity);
    let writer = tokio::spawn(run_writer(ws_sender, outbound, peer_id));

    debug!("{} {}", peer_id.short(), ConnectionState::Connecting);

    if let Err(e) = authenticate(&mut ws_receiver).await {
        warn!("Client {} failed to authenticate: {}", addr, e);
        channel.close().await;
        drop(channel);
        let _ = writer.await;
        return;
    }

    debug!("{} {}", peer_id.short(), ConnectionState::Authenticated);

    let welcome = Message::Welcome { to_id: peer_id };
    if let Err(e) = channel.send(welcome).await {
        warn!("Client {} gone before Welcome: {}", addr, e);
        return;
    }
    let announced = broadcast(&registry, welcome, None).await;

    if let Err(e) = registry.register(peer_id, channel.clone()).await {
        error!("Could not register {}: {}", peer_id.short(), e);
        channel.close().await;
        return;
    }

    info!("Peer {} joined from {} ({} notified)", peer_id.short(), addr, announced);
    debug!("{} {}", peer_id.short(), ConnectionState::Routing);

    let result = route_messages(peer_id, &mut ws_receiver, &registry, config.unknown_target).await;

    match &result {
        Ok(()) => info!("Peer {} disconnected", peer_id.short()),
        Err(e) => {
            warn!("Error processing message from {}: {}", peer_id.short(), e);
            channel.close().await;
        }
    }

    registry.unregister(&peer_id).await;
    let notified = broadcast(&registry, Message::Left { from_id: peer_id }, None).await;
    debug!("{} {} ({} notified)", peer_id.short(), ConnectionState::Closed, notified);

    channel.close().await;
    drop(channel);
    let _ = writer.await;
}

/// Wait for the first frame and require `Hello`.
async fn authenticate<S>(source: &mut S) -> Result<(), AuthenticationError>
where
    S: Stream<Item = Result<WsMessage, WsError>> + Unpin,
{
    let frame = match next_frame(source).await {
        Ok(Some(frame)) => frame,
        Ok(None) => return Err(AuthenticationError::Closed),
        Err(e) => return Err(AuthenticationError::Transport(e.to_string())),
    };

    match Message::decode(&frame)? {
        Message::Hello => Ok(()),
        other => Err(AuthenticationError::UnexpectedMessage(other.kind())),
    }
}

/// Relay frames from `peer_id` until the connection ends.
async fn route_messages<S>(
    peer_id: PeerId,
    source: &mut S,
    registry: &PeerRegistry,
    policy: UnknownTargetPolicy,
) -> Result<(), RelayError>
where
    S: Stream<Item = Result<WsMessage, WsError>> + Unpin,
{
    while let Some(frame) = next_frame(source).await? {
        let msg = Message::decode(&frame)?;

        match msg {
            Message::Sync(sync) => route_sync(registry, msg, sync.to_id, policy).await?,
            other => {
                broadcast(registry, other, Some(peer_id)).await;
            }
        }
    }

    Ok(())
}

/// Next binary payload. `None` on a clean close.
async fn next_frame<S>(source: &mut S) -> Result<Option<Vec<u8>>, RelayError>
where
    S: Stream<Item = Result<WsMessage, WsError>> + Unpin,
{
    loop {
        match source.next().await {
            Some(Ok(WsMessage::Binary(data))) => return Ok(Some(data)),
            Some(Ok(WsMessage::Close(_))) | None => return Ok(None),
            Some(Ok(WsMessage::Text(_))) => return Err(RelayError::TextFrame),
            Some(Ok(_)) => continue,
            Some(Err(WsError::ConnectionClosed)) => return Ok(None),
            Some(Err(e)) => return Err(e.into()),
        }
    }
}

/// Drain a peer's outbound queue into its socket.
async fn run_writer(mut sink: WsSink, mut outbound: mpsc::Receiver<Outbound>, peer_id: PeerId) {
    while let Some(item) = outbound.recv().await {
        match item {
            Outbound::Frame(msg) => {
                if let Err(e) = sink.send(WsMessage::Binary(msg.encode())).await {
                    debug!("Write to {} failed: {}", peer_id.short(), e);
                    break;
                }
            }
            Outbound::Close => break,
        }
    }

    let _ = sink.close().await;
}
