//! Peer Registry
//!
//! Live mapping of authenticated peers to their outbound channels.
//! Shared by every connection task on the relay.

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, RwLock};

use crate::network::protocol::{Message, PeerId};

/// Work item for a connection's writer task.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// Encode and send one frame.
    Frame(Message),
    /// Send a close frame and stop writing.
    Close,
}

/// Registry errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// Id already registered.
    #[error("peer {0} already registered")]
    AlreadyRegistered(PeerId),

    /// Id not registered.
    #[error("peer {0} not registered")]
    NotFound(PeerId),

    /// The peer's writer task is gone.
    #[error("outbound channel to {0} is closed")]
    ChannelClosed(PeerId),

    /// The peer is not draining its outbound queue.
    #[error("outbound channel to {0} is full")]
    ChannelFull(PeerId),
}

/// Handle to one peer's outbound queue.
#[derive(Debug, Clone)]
pub struct PeerChannel {
    id: PeerId,
    sender: mpsc::Sender<Outbound>,
}

impl PeerChannel {
    /// Create a channel for `id` and the receiving end for its writer task.
    pub fn new(id: PeerId, capacity: usize) -> (Self, mpsc::Receiver<Outbound>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Self { id, sender }, receiver)
    }

    /// Peer this channel writes to.
    pub fn id(&self) -> PeerId {
        self.id
    }

    /// Queue a message for the peer.
    pub async fn send(&self, msg: Message) -> Result<(), RegistryError> {
        self.sender
            .send(Outbound::Frame(msg))
            .await
            .map_err(|_| RegistryError::ChannelClosed(self.id))
    }

    /// Queue a message without waiting for room.
    pub fn try_send(&self, msg: Message) -> Result<(), RegistryError> {
        self.sender
            .try_send(Outbound::Frame(msg))
            .map_err(|e| match e {
                TrySendError::Full(_) => RegistryError::ChannelFull(self.id),
                TrySendError::Closed(_) => RegistryError::ChannelClosed(self.id),
            })
    }

    /// Ask the writer task to close the socket.
    pub async fn close(&self) {
        // Writer already gone means the socket is already closing.
        let _ = self.sender.send(Outbound::Close).await;
    }

    /// Whether the writer task has stopped.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Registered peers, keyed by id.
#[derive(Debug, Clone, Default)]
pub struct PeerRegistry {
    peers: Arc<RwLock<BTreeMap<PeerId, PeerChannel>>>,
}

impl PeerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a peer. Fails if the id is taken.
    pub async fn register(&self, id: PeerId, channel: PeerChannel) -> Result<(), RegistryError> {
        let mut peers = self.peers.write().await;
        if peers.contains_key(&id) {
            return Err(RegistryError::AlreadyRegistered(id));
        }
        peers.insert(id, channel);
        Ok(())
    }

    /// Remove a peer. Removing an absent id is a no-op.
    pub async fn unregister(&self, id: &PeerId) -> Option<PeerChannel> {
        self.peers.write().await.remove(id)
    }

    /// Look up a peer's channel.
    pub async fn get(&self, id: &PeerId) -> Result<PeerChannel, RegistryError> {
        self.peers
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or(RegistryError::NotFound(*id))
    }

    /// Copy of every `(id, channel)` pair at call time.
    pub async fn snapshot(&self) -> Vec<(PeerId, PeerChannel)> {
        self.peers
            .read()
            .await
            .iter()
            .map(|(id, channel)| (*id, channel.clone()))
            .collect()
    }

    /// Registered ids.
    pub async fn ids(&self) -> Vec<PeerId> {
        self.peers.read().await.keys().copied().collect()
    }

    /// Whether `id` is registered.
    pub async fn contains(&self, id: &PeerId) -> bool {
        self.peers.read().await.contains_key(id)
    }

    /// Number of registered peers.
    pub async fn len(&self) -> usize {
        self.peers.read().await.len()
    }

    /// Whether no peers are registered.
    pub async fn is_empty(&self) -> bool {
        self.peers.read().await.is_empty()
    }
}
