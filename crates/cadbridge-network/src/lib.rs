//! Network library for mirroring a CAD server's object graph into a 3D host
//!
//! This crate provides the little-endian wire protocol (framing and message codec), the client
//! [`Connection`] with its background I/O thread, and the [`EventQueue`] that hands decoded
//! messages to the host's main thread. A server-side [`ServerPeer`] speaks the same protocol for
//! tests and demos.

pub mod codec;
pub mod connection;
pub mod events;
pub mod peer;
pub mod protocol;
pub mod request;
pub mod types;
pub mod wire;

// Re-export commonly used types
pub use codec::{decode_message, decode_request, encode_request, Message};
pub use connection::{
    Connection, ConnectionConfig, ConnectionError, ConnectionState, ConnectionStats,
};
pub use events::{event_queue, BridgeEvent, BridgeHandler, EventQueue, EventSender};
pub use peer::{PeerConfig, PeerConnection, PeerError, ServerPeer};
pub use protocol::{MessageType, Protocol, ProtocolError, DEFAULT_MAX_MESSAGE_SIZE, STATUS_OK};
pub use request::{FacetShape, RefacetParams, Request};
pub use types::{
    ListKind, ListSnapshot, MeshBuffers, ObjectFlags, ObjectType, RefacetItem, RefacetResult,
    RemoteObject, RequestFailure, Transaction,
};

/// Result type for connection operations
pub type Result<T> = std::result::Result<T, ConnectionError>;
