//! # Client Connection State Machine
//!
//! ```text
//!                connect()               Welcome
//! Uninitialized ──────────> SayingHello ─────────> Welcomed
//!       ^                        │                     │
//!       └────────── disconnect() ┴─────────────────────┘
//! ```
//!
//! The machine is socket-free: [`ClientConnection::handle_packet`] consumes
//! decoded packets and [`ClientConnection::update`] returns the packet that is
//! due, if any. The caller owns the transport.

use std::net::SocketAddr;

use tracing::{debug, info, trace, warn};

use crate::protocol::{clamp_name, InputState, Packet, PlayerId, ProtocolError};
use crate::replication::ReplicaMirror;

/// Handshake progress.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConnectionState {
    /// No server selected.
    #[default]
    Uninitialized,
    /// Sending Hello until the server answers.
    SayingHello,
    /// Player ID assigned; sending Input.
    Welcomed,
}

/// Client side of the Hello / Welcome handshake.
#[derive(Debug)]
pub struct ClientConnection {
    hello_interval: f64,
    input_interval: f64,
    state: ConnectionState,
    server: Option<SocketAddr>,
    name: String,
    player_id: Option<PlayerId>,
    last_hello: Option<f64>,
    last_input: Option<f64>,
    input: InputState,
    mirror: ReplicaMirror,
    hellos_sent: u64,
    inputs_sent: u64,
}

impl ClientConnection {
    /// Creates an idle connection that resends Hello every `hello_interval`
    /// seconds and sends Input every `input_interval` seconds.
    #[must_use]
    pub fn new(hello_interval: f64, input_interval: f64) -> Self {
        Self {
            hello_interval,
            input_interval,
            state: ConnectionState::Uninitialized,
            server: None,
            name: String::new(),
            player_id: None,
            last_hello: None,
            last_input: None,
            input: InputState::default(),
            mirror: ReplicaMirror::new(),
            hellos_sent: 0,
            inputs_sent: 0,
        }
    }

    /// Current handshake state.
    #[inline]
    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// Server endpoint, once `connect` has been called.
    #[inline]
    #[must_use]
    pub const fn server(&self) -> Option<SocketAddr> {
        self.server
    }

    /// Player ID from the Welcome.
    #[inline]
    #[must_use]
    pub const fn player_id(&self) -> Option<PlayerId> {
        self.player_id
    }

    /// Name sent in Hello.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Entities replicated from the server.
    #[inline]
    #[must_use]
    pub const fn mirror(&self) -> &ReplicaMirror {
        &self.mirror
    }

    /// Hello packets produced so far.
    #[inline]
    #[must_use]
    pub const fn hellos_sent(&self) -> u64 {
        self.hellos_sent
    }

    /// Input packets produced so far.
    #[inline]
    #[must_use]
    pub const fn inputs_sent(&self) -> u64 {
        self.inputs_sent
    }

    /// Latest local input.
    #[inline]
    #[must_use]
    pub const fn input(&self) -> &InputState {
        &self.input
    }

    /// Replaces the local input sent with the next Input packet. The
    /// sequence number is managed by the connection.
    pub fn set_input(&mut self, input: InputState) {
        let sequence = self.input.sequence;
        self.input = InputState { sequence, ..input };
    }

    /// Mutable access to the local input.
    pub fn input_mut(&mut self) -> &mut InputState {
        &mut self.input
    }

    /// Starts the handshake with `server`. The next `update` sends Hello.
    ///
    /// Calling this while connected starts over with the new server. Names
    /// longer than [`crate::MAX_NAME_LEN`] bytes are cut to fit.
    pub fn connect(&mut self, server: SocketAddr, name: impl Into<String>) {
        if self.state != ConnectionState::Uninitialized {
            self.disconnect();
        }
        self.server = Some(server);
        let name = name.into();
        self.name = clamp_name(&name).to_owned();
        self.state = ConnectionState::SayingHello;
        info!(%server, name = %self.name, "saying hello");
    }

    /// Drops the session and everything replicated for it.
    pub fn disconnect(&mut self) {
        if self.state == ConnectionState::Uninitialized {
            return;
        }
        info!(player_id = ?self.player_id, "disconnected");
        self.state = ConnectionState::Uninitialized;
        self.server = None;
        self.player_id = None;
        self.last_hello = None;
        self.last_input = None;
        self.mirror.clear();
    }

    /// Applies a packet received from `from`.
    ///
    /// Packets from anywhere but the server are ignored.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::ConflictingWelcome`] if a Welcome names a different
    /// player ID than the one already accepted. The original ID is kept.
    pub fn handle_packet(&mut self, packet: Packet, from: SocketAddr) -> Result<(), ProtocolError> {
        if self.server != Some(from) {
            debug!(%from, "packet from unexpected endpoint ignored");
            return Ok(());
        }

        match packet {
            Packet::Welcome { player_id } => self.on_welcome(player_id),
            Packet::State(snapshot) => {
                if self.state == ConnectionState::Welcomed {
                    self.mirror.apply_snapshot(&snapshot);
                } else {
                    trace!(state = ?self.state, "state before welcome ignored");
                }
                Ok(())
            }
            Packet::Hello { .. } | Packet::Input(_) => {
                debug!(tag = ?packet.tag(), "server-bound packet ignored");
                Ok(())
            }
        }
    }

    fn on_welcome(&mut self, player_id: PlayerId) -> Result<(), ProtocolError> {
        match self.state {
            ConnectionState::SayingHello => {
                self.player_id = Some(player_id);
                self.state = ConnectionState::Welcomed;
                info!(player_id, "welcomed");
                Ok(())
            }
            ConnectionState::Welcomed => match self.player_id {
                Some(assigned) if assigned != player_id => {
                    warn!(assigned, received = player_id, "conflicting welcome rejected");
                    Err(ProtocolError::ConflictingWelcome {
                        assigned,
                        received: player_id,
                    })
                }
                _ => Ok(()),
            },
            ConnectionState::Uninitialized => {
                debug!(player_id, "welcome without a pending hello ignored");
                Ok(())
            }
        }
    }

    fn due(last: Option<f64>, now: f64, interval: f64) -> bool {
        last.map_or(true, |last| now - last >= interval)
    }

    /// Returns the packet due at `now`, if any.
    ///
    /// While saying hello: a Hello once per `hello_interval`, the first one
    /// immediately. While welcomed: an Input once per `input_interval`.
    pub fn update(&mut self, now: f64) -> Option<Packet> {
        match self.state {
            ConnectionState::Uninitialized => None,
            ConnectionState::SayingHello => {
                if !Self::due(self.last_hello, now, self.hello_interval) {
                    return None;
                }
                self.last_hello = Some(now);
                self.hellos_sent += 1;
                trace!(now, "hello");
                Some(Packet::Hello {
                    name: self.name.clone(),
                })
            }
            ConnectionState::Welcomed => {
                if !Self::due(self.last_input, now, self.input_interval) {
                    return None;
                }
                self.last_input = Some(now);
                self.input.sequence = self.input.sequence.wrapping_add(1);
                self.inputs_sent += 1;
                Some(Packet::Input(self.input))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::StateSnapshot;
    use crate::replication::{
        ClassType, DirtyMask, EntityKind, EntityRecord, NetworkId, ReplicationAction,
    };
    use weave_core::{Position, Rotation};

    fn server() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 50_001))
    }

    fn welcomed(id: PlayerId) -> ClientConnection {
        let mut connection = ClientConnection::new(0.25, 0.25);
        connection.connect(server(), "Alice");
        assert!(connection.update(0.0).is_some());
        connection
            .handle_packet(Packet::Welcome { player_id: id }, server())
            .unwrap();
        connection
    }

    #[test]
    fn idle_connection_sends_nothing() {
        let mut connection = ClientConnection::new(0.25, 0.25);
        assert_eq!(connection.update(10.0), None);
    }

    #[test]
    fn first_hello_is_immediate() {
        let mut connection = ClientConnection::new(0.25, 0.25);
        connection.connect(server(), "Alice");
        assert_eq!(
            connection.update(3.0),
            Some(Packet::Hello {
                name: "Alice".to_owned()
            })
        );
        assert_eq!(connection.update(3.125), None);
        assert!(connection.update(3.25).is_some());
    }

    #[test]
    fn welcome_moves_to_welcomed() {
        let connection = welcomed(7);
        assert_eq!(connection.state(), ConnectionState::Welcomed);
        assert_eq!(connection.player_id(), Some(7));
    }

    #[test]
    fn welcome_before_connect_is_ignored() {
        let mut connection = ClientConnection::new(0.25, 0.25);
        connection
            .handle_packet(Packet::Welcome { player_id: 1 }, server())
            .unwrap();
        assert_eq!(connection.state(), ConnectionState::Uninitialized);
    }

    #[test]
    fn duplicate_welcome_is_idempotent() {
        let mut connection = welcomed(7);
        assert!(connection
            .handle_packet(Packet::Welcome { player_id: 7 }, server())
            .is_ok());
        assert_eq!(connection.player_id(), Some(7));
    }

    #[test]
    fn conflicting_welcome_keeps_first_id() {
        let mut connection = welcomed(7);
        assert_eq!(
            connection.handle_packet(Packet::Welcome { player_id: 8 }, server()),
            Err(ProtocolError::ConflictingWelcome {
                assigned: 7,
                received: 8
            })
        );
        assert_eq!(connection.player_id(), Some(7));
    }

    fn create_record(id: u32, name: &str) -> EntityRecord {
        EntityRecord {
            network_id: NetworkId(id),
            class_type: ClassType::Prop,
            action: ReplicationAction::Create,
            active: true,
            dirty: DirtyMask::ALL,
            name: name.to_owned(),
            position: Position::default(),
            rotation: Rotation::default(),
            kind: EntityKind::Prop,
        }
    }

    #[test]
    fn state_before_welcome_is_ignored() {
        let mut connection = ClientConnection::new(0.25, 0.25);
        connection.connect(server(), "Alice");
        assert!(connection.update(0.0).is_some());

        let snapshot = StateSnapshot {
            records: vec![create_record(1, "crate")],
        };
        connection
            .handle_packet(Packet::State(snapshot.clone()), server())
            .unwrap();

        assert!(connection.mirror().is_empty());
        assert_eq!(connection.state(), ConnectionState::SayingHello);
        assert_eq!(connection.player_id(), None);

        // The same snapshot lands once welcomed.
        connection
            .handle_packet(Packet::Welcome { player_id: 2 }, server())
            .unwrap();
        connection
            .handle_packet(Packet::State(snapshot), server())
            .unwrap();
        assert!(connection.mirror().find_by_name("crate").is_some());
    }

    #[test]
    fn long_name_is_clamped_on_connect() {
        let mut connection = ClientConnection::new(0.25, 0.25);
        connection.connect(server(), "x".repeat(500));
        assert_eq!(connection.name().len(), crate::MAX_NAME_LEN);
    }

    #[test]
    fn packets_from_strangers_are_ignored() {
        let mut connection = ClientConnection::new(0.25, 0.25);
        connection.connect(server(), "Alice");
        let stranger = SocketAddr::from(([10, 0, 0, 1], 9));
        connection
            .handle_packet(Packet::Welcome { player_id: 3 }, stranger)
            .unwrap();
        assert_eq!(connection.state(), ConnectionState::SayingHello);
    }

    #[test]
    fn input_sequence_increases() {
        let mut connection = welcomed(1);
        connection.input_mut().forward = 1.0;

        let Some(Packet::Input(first)) = connection.update(1.0) else {
            panic!("expected input");
        };
        let Some(Packet::Input(second)) = connection.update(1.25) else {
            panic!("expected input");
        };
        assert_eq!(second.sequence, first.sequence + 1);
        assert!((second.forward - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn set_input_keeps_sequence() {
        let mut connection = welcomed(1);
        connection.update(1.0);
        let before = connection.input().sequence;

        connection.set_input(InputState {
            sequence: 999,
            turn: 0.5,
            ..InputState::default()
        });
        assert_eq!(connection.input().sequence, before);
        assert!((connection.input().turn - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn disconnect_resets() {
        let mut connection = welcomed(4);
        connection.disconnect();
        assert_eq!(connection.state(), ConnectionState::Uninitialized);
        assert_eq!(connection.player_id(), None);
        assert!(connection.mirror().is_empty());
        assert_eq!(connection.update(100.0), None);
    }
}
