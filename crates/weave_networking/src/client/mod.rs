//! # Game Client
//!
//! Client-side networking: handshake, input upload and the replicated view
//! of the world.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      GAME CLIENT                            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐  ┌──────────────────┐  ┌──────────────┐   │
//! │  │ UdpTransport │─>│ ClientConnection │─>│ ReplicaMirror│   │
//! │  │ (recv thread)│  │ (handshake/input)│  │ (entities)   │   │
//! │  └──────────────┘  └──────────────────┘  └──────────────┘   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! [`GameClient::tick`] drains the transport, feeds every decodable packet to
//! the connection, then sends whatever packet the connection says is due.

mod connection;

pub use connection::{ClientConnection, ConnectionState};

use std::net::SocketAddr;

use serde::Deserialize;
use tracing::{error, warn};
use weave_core::{Clock, SharedClock};

use crate::protocol::{InputState, Packet, PlayerId};
use crate::replication::ReplicaMirror;
use crate::transport::{TransportConfig, TransportResult, TransportStats, UdpTransport};
use crate::{DEFAULT_HANDSHAKE_INTERVAL, DEFAULT_PACKET_CAPACITY, DEFAULT_SERVER_PORT};

/// Client configuration.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server endpoint.
    pub server_addr: SocketAddr,
    /// Local UDP port; 0 picks an ephemeral one.
    pub local_port: u16,
    /// Name sent in Hello.
    pub name: String,
    /// Seconds between Hello resends.
    pub hello_interval: f64,
    /// Seconds between Input packets.
    pub input_interval: f64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_addr: SocketAddr::from(([127, 0, 0, 1], DEFAULT_SERVER_PORT)),
            local_port: 0,
            name: "Player".to_owned(),
            hello_interval: DEFAULT_HANDSHAKE_INTERVAL,
            input_interval: DEFAULT_HANDSHAKE_INTERVAL,
        }
    }
}

/// Network client: a transport plus a [`ClientConnection`].
#[derive(Debug)]
pub struct GameClient {
    config: ClientConfig,
    transport: UdpTransport,
    connection: ClientConnection,
    clock: SharedClock,
    decode_errors: u64,
}

impl GameClient {
    /// Binds the local port and starts receiving. Does not contact the
    /// server until [`GameClient::connect`].
    ///
    /// # Errors
    ///
    /// Propagates transport bind/start failures.
    pub fn new(
        config: ClientConfig,
        transport_config: TransportConfig,
        clock: SharedClock,
    ) -> TransportResult<Self> {
        let transport = UdpTransport::open(config.local_port, transport_config, clock.clone())?;
        let connection = ClientConnection::new(config.hello_interval, config.input_interval);

        Ok(Self {
            config,
            transport,
            connection,
            clock,
            decode_errors: 0,
        })
    }

    /// Starts the handshake with the configured server under the configured
    /// name.
    pub fn connect_default(&mut self) {
        let server = self.config.server_addr;
        let name = self.config.name.clone();
        self.connect(server, name);
    }

    /// Starts the handshake with `server`.
    pub fn connect(&mut self, server: SocketAddr, name: impl Into<String>) {
        self.connection.connect(server, name);
    }

    /// Drops the session and the replicated world.
    pub fn disconnect(&mut self) {
        self.connection.disconnect();
    }

    /// Replaces the local input.
    pub fn set_input(&mut self, input: InputState) {
        self.connection.set_input(input);
    }

    /// Mutable access to the local input.
    pub fn input_mut(&mut self) -> &mut InputState {
        self.connection.input_mut()
    }

    /// Handshake state.
    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Player ID assigned by the server.
    #[must_use]
    pub const fn player_id(&self) -> Option<PlayerId> {
        self.connection.player_id()
    }

    /// Replicated entities.
    #[must_use]
    pub const fn mirror(&self) -> &ReplicaMirror {
        self.connection.mirror()
    }

    /// The connection state machine.
    #[must_use]
    pub const fn connection(&self) -> &ClientConnection {
        &self.connection
    }

    /// Local socket address.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.transport.local_addr()
    }

    /// Transport statistics.
    #[must_use]
    pub fn stats(&self) -> TransportStats {
        self.transport.stats()
    }

    /// Packets dropped because they failed to decode or were rejected.
    #[must_use]
    pub const fn decode_errors(&self) -> u64 {
        self.decode_errors
    }

    /// One client tick: process every queued packet, then send what is due.
    pub fn tick(&mut self) {
        let connection = &mut self.connection;
        let decode_errors = &mut self.decode_errors;

        self.transport.drain(|received| {
            let result = Packet::decode(&mut received.reader())
                .and_then(|packet| connection.handle_packet(packet, received.source()));
            if let Err(e) = result {
                *decode_errors += 1;
                warn!(from = %received.source(), error = %e, "packet dropped");
            }
        });

        let now = self.clock.now();
        let Some(packet) = self.connection.update(now) else {
            return;
        };
        let Some(server) = self.connection.server() else {
            return;
        };
        match packet.to_writer(DEFAULT_PACKET_CAPACITY) {
            Ok(writer) => {
                self.transport.send(&writer, server);
            }
            Err(e) => error!(error = %e, tag = ?packet.tag(), "outbound packet abandoned"),
        }
    }

    /// Stops the receive thread.
    pub fn shutdown(&mut self) {
        self.transport.stop();
    }
}
