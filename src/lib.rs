//! # Hall Relay
//!
//! Shared kinematic state for real-time clients, exchanged as small binary
//! frames through a central relay.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        HALL RELAY                            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  network/        - Wire protocol and transport               │
//! │  ├── protocol.rs - Tagged fixed-layout frames                │
//! │  ├── registry.rs - Peer id → outbound channel                │
//! │  ├── server.rs   - WebSocket relay (tokio)                   │
//! │  └── session.rs  - Client session thread + hand-off queue    │
//! │                                                              │
//! │  game/           - Client-side state (presentation loop)     │
//! │  ├── controls.rs - Per-peer kinematics                       │
//! │  └── world.rs    - Local player and remote peers             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Data Flow
//!
//! Client intent → [`Message::encode`] → relay → registry lookup or
//! broadcast → peer session thread → [`Message::decode`] → queue →
//! [`LocalWorld::apply`] on the peer's main loop.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod game;
pub mod network;

// Re-export commonly used types
pub use game::{Intent, LocalWorld, TiltControls};
pub use network::{
    ClientConfig, Message, MessageKind, NetworkSession, PeerId, RelayConfig, RelayServer,
    SessionHandle,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
