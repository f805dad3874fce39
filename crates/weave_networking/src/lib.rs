//! # Weave Networking
//!
//! Networked entity replication over UDP.
//!
//! ## Architecture
//!
//! - **Protocol**: bit-granular codec and the four packet kinds
//! - **Transport**: one UDP socket, a background receive thread and a FIFO
//!   queue the tick thread drains
//! - **Client**: the Hello / Welcome handshake and periodic Input
//! - **Replication**: the server's entity store and the client's mirror
//! - **Server**: sessions, tank simulation and snapshot broadcast
//!
//! ## Flow
//!
//! ```text
//! CLIENT                                SERVER
//!   |                                     |
//!   |--- Hello { name } (resent) -------->| spawn tank, open session
//!   |<-- Welcome { player_id } -----------|
//!   |                                     |
//!   |--- Input (every input_interval) --->| drive tank
//!   |<-- State (every state_interval) ----| build_snapshot
//!   |                                     |
//! ```
//!
//! The server is authoritative. Clients only send intent.
//!
//! ## Example
//!
//! ```rust,no_run
//! use weave_core::SystemClock;
//! use weave_networking::{GameServer, NetConfig};
//!
//! let config = NetConfig::default();
//! let mut server = GameServer::new(config.server, config.transport, SystemClock::shared())
//!     .expect("port available");
//! loop {
//!     server.tick();
//!     std::thread::sleep(std::time::Duration::from_millis(16));
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod client;
pub mod config;
pub mod protocol;
pub mod replication;
pub mod server;
pub mod transport;

// Re-exports for convenience
pub use client::{ClientConfig, ClientConnection, ConnectionState, GameClient};
pub use config::{ConfigError, NetConfig};
pub use protocol::{
    BitReader, BitWriter, CodecError, InputState, Packet, PacketTag, PlayerId, ProtocolError,
    StateSnapshot,
};
pub use replication::{
    ClassType, DirtyMask, EntityKind, EntityRecord, EntityStore, NetworkId, ReplicaMirror,
    ReplicationAction, ReplicationError, ReplicationMode,
};
pub use server::{GameServer, ServerConfig, TickLoop};
pub use transport::{ReceivedPacket, TransportConfig, TransportError, UdpTransport};

/// Default server UDP port.
pub const DEFAULT_SERVER_PORT: u16 = 50_001;

/// Default simulation rate (ticks per second).
pub const DEFAULT_TICK_RATE: u32 = 60;

/// Default Hello resend, Input send and snapshot interval, in seconds.
pub const DEFAULT_HANDSHAKE_INTERVAL: f64 = 0.033;

/// Default entity pool capacity.
pub const DEFAULT_MAX_ENTITY_COUNT: usize = 64;

/// Buffer size for Hello, Welcome and Input packets.
///
/// Kept under 1200 bytes so a packet fits any path MTU.
pub const DEFAULT_PACKET_CAPACITY: usize = 1200;

/// Default snapshot buffer size in bytes.
pub const DEFAULT_SNAPSHOT_CAPACITY: usize = 8192;

/// Default receive buffer size; matches the largest snapshot.
pub const DEFAULT_RECV_BUFFER_SIZE: usize = DEFAULT_SNAPSHOT_CAPACITY;

/// Default inbound queue capacity in datagrams.
pub const DEFAULT_QUEUE_CAPACITY: usize = 4096;

/// Longest player or entity name in bytes.
pub const MAX_NAME_LEN: usize = 32;

/// Default receive poll interval in milliseconds.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 50;
