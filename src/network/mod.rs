//! Network Layer
//!
//! Binary wire protocol, relay server and client session.
//! The relay runs on tokio; the client session is a plain blocking thread.

pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;

pub use protocol::{DecodeError, FieldLayout, FieldType, Message, MessageKind, PeerId, SyncState};
pub use registry::{Outbound, PeerChannel, PeerRegistry, RegistryError};
pub use server::{
    AuthenticationError, ConnectionState, RelayConfig, RelayError, RelayServer,
    UnknownTargetPolicy,
};
pub use session::{ClientConfig, IncomingQueue, NetworkSession, SessionError, SessionHandle};
