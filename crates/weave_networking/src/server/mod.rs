//! # Game Server
//!
//! The authoritative server: sessions, tank simulation and snapshots.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       GAME SERVER                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐       │
//! │  │ UdpTransport │  │ SessionTable │  │ EntityStore  │       │
//! │  │ (recv thread)│──│ (per client) │──│ (slot pool)  │       │
//! │  └──────────────┘  └──────────────┘  └──────────────┘       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Tick Order
//!
//! 1. Drain the transport: Hello admits or re-welcomes, Input is stored. A
//!    repeated Hello resyncs the world at most once per second per session.
//! 2. Drive every tank from its player's latest input; move projectiles.
//! 3. Drop sessions that went silent and remove their tanks.
//! 4. If `state_interval` has passed, build one snapshot and send it to
//!    every session.

mod session;
mod tick;

pub use session::{ClientSession, SessionTable};
pub use tick::{TickLoop, TickStats};

use std::f32::consts::{PI, TAU};
use std::net::SocketAddr;

use serde::Deserialize;
use tracing::{debug, error, info, trace, warn};
use weave_core::{Clock, Position, Rotation, SharedClock};

use crate::protocol::{InputState, Packet, PlayerId};
use crate::replication::{
    EntityKind, EntityStore, NetworkId, ProjectileState, ReplicationMode, ReplicationResult,
    TankState,
};
use crate::transport::{ReceivedPacket, TransportConfig, TransportResult, TransportStats, UdpTransport};
use crate::{
    DEFAULT_HANDSHAKE_INTERVAL, DEFAULT_MAX_ENTITY_COUNT, DEFAULT_PACKET_CAPACITY,
    DEFAULT_SERVER_PORT, DEFAULT_SNAPSHOT_CAPACITY, DEFAULT_TICK_RATE,
};

/// Tank speed in units per second at full throttle.
pub const TANK_SPEED: f32 = 8.0;
/// Speed multiplier while BOOST is held.
pub const BOOST_MULTIPLIER: f32 = 2.0;
/// Hull turn rate in radians per second at full deflection.
pub const TURN_RATE: f32 = PI;
/// Projectile speed in units per second.
pub const PROJECTILE_SPEED: f32 = 40.0;
/// Seconds a projectile lives before it is removed.
pub const PROJECTILE_LIFETIME: f64 = 2.0;
/// Distance between spawn points of consecutive players.
const SPAWN_SPACING: f32 = 4.0;
/// Seconds between resyncs one session's repeated Hellos may trigger.
const HELLO_RESYNC_COOLDOWN: f64 = 1.0;

/// Server configuration.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// UDP port to bind.
    pub port: u16,
    /// Entity pool capacity.
    pub max_entity_count: usize,
    /// Maximum concurrent sessions.
    pub max_clients: usize,
    /// Seconds between snapshots.
    pub state_interval: f64,
    /// Simulation ticks per second.
    pub tick_rate: u32,
    /// Seconds of silence before a session is dropped.
    pub session_timeout: f64,
    /// Full or delta snapshots.
    pub replication: ReplicationMode,
    /// Largest snapshot in bytes.
    pub snapshot_buffer_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_SERVER_PORT,
            max_entity_count: DEFAULT_MAX_ENTITY_COUNT,
            max_clients: 16,
            state_interval: DEFAULT_HANDSHAKE_INTERVAL,
            tick_rate: DEFAULT_TICK_RATE,
            session_timeout: 10.0,
            replication: ReplicationMode::Full,
            snapshot_buffer_size: DEFAULT_SNAPSHOT_CAPACITY,
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct Projectile {
    id: NetworkId,
    expires_at: f64,
}

/// The game server.
#[derive(Debug)]
pub struct GameServer {
    config: ServerConfig,
    transport: UdpTransport,
    store: EntityStore,
    sessions: SessionTable,
    clock: SharedClock,
    projectiles: Vec<Projectile>,
    inbox: Vec<ReceivedPacket>,
    last_tick: Option<f64>,
    last_state_sent: Option<f64>,
    snapshots_sent: u64,
    decode_errors: u64,
}

impl GameServer {
    /// Binds the configured port and starts receiving.
    ///
    /// # Errors
    ///
    /// Propagates transport bind/start failures.
    ///
    /// # Panics
    ///
    /// Panics if `max_entity_count` is zero.
    pub fn new(
        config: ServerConfig,
        transport_config: TransportConfig,
        clock: SharedClock,
    ) -> TransportResult<Self> {
        let transport = UdpTransport::open(config.port, transport_config, clock.clone())?;
        let store = EntityStore::new(
            config.max_entity_count,
            config.replication,
            config.snapshot_buffer_size,
        );
        let sessions = SessionTable::new(config.max_clients);

        info!(
            local_addr = %transport.local_addr(),
            capacity = config.max_entity_count,
            mode = ?config.replication,
            "server listening"
        );

        Ok(Self {
            config,
            transport,
            store,
            sessions,
            clock,
            projectiles: Vec::new(),
            inbox: Vec::new(),
            last_tick: None,
            last_state_sent: None,
            snapshots_sent: 0,
            decode_errors: 0,
        })
    }

    /// Configuration in effect.
    #[must_use]
    pub const fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Local socket address.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.transport.local_addr()
    }

    /// The entity store.
    #[must_use]
    pub const fn store(&self) -> &EntityStore {
        &self.store
    }

    /// Mutable entity store, for spawning scenery.
    pub fn store_mut(&mut self) -> &mut EntityStore {
        &mut self.store
    }

    /// Connected sessions.
    #[must_use]
    pub const fn sessions(&self) -> &SessionTable {
        &self.sessions
    }

    /// Snapshots built and broadcast so far.
    #[must_use]
    pub const fn snapshots_sent(&self) -> u64 {
        self.snapshots_sent
    }

    /// Packets dropped because they failed to decode.
    #[must_use]
    pub const fn decode_errors(&self) -> u64 {
        self.decode_errors
    }

    /// Transport statistics.
    #[must_use]
    pub fn stats(&self) -> TransportStats {
        self.transport.stats()
    }

    /// One server tick.
    pub fn tick(&mut self) {
        let now = self.clock.now();

        let mut inbox = std::mem::take(&mut self.inbox);
        self.transport.drain(|packet| inbox.push(packet));
        for packet in inbox.drain(..) {
            self.handle_datagram(&packet, now);
        }
        self.inbox = inbox;

        #[allow(clippy::cast_possible_truncation)]
        let dt = self.last_tick.map_or(0.0, |last| (now - last).max(0.0)) as f32;
        self.last_tick = Some(now);

        self.drive_tanks(dt, now);
        self.move_projectiles(dt, now);
        self.expire_sessions(now);

        let due = self
            .last_state_sent
            .map_or(true, |last| now - last >= self.config.state_interval);
        if due {
            self.last_state_sent = Some(now);
            self.broadcast_snapshot();
        }
    }

    fn handle_datagram(&mut self, received: &ReceivedPacket, now: f64) {
        let from = received.source();
        match Packet::decode(&mut received.reader()) {
            Ok(Packet::Hello { name }) => self.handle_hello(from, name, now),
            Ok(Packet::Input(input)) => self.handle_input(from, input, now),
            Ok(other) => debug!(%from, tag = ?other.tag(), "client-bound packet ignored"),
            Err(e) => {
                self.decode_errors += 1;
                warn!(%from, error = %e, "packet dropped");
            }
        }
    }

    fn handle_hello(&mut self, from: SocketAddr, name: String, now: f64) {
        if let Some(session) = self.sessions.get_mut(from) {
            // Welcome lost in transit; the client has seen no state either.
            session.touch(now);
            let player_id = session.player_id();
            if session.take_resync(now, HELLO_RESYNC_COOLDOWN) {
                self.store.resync();
            } else {
                trace!(%from, "repeated hello within resync cooldown");
            }
            self.send_welcome(from, player_id);
            return;
        }

        if self.sessions.is_full() {
            warn!(%from, %name, "server full, hello dropped");
            return;
        }

        let entity_id = match self
            .store
            .add_entity(name.clone(), EntityKind::Tank(TankState::default()))
        {
            Ok(id) => id,
            Err(e) => {
                warn!(%from, %name, error = %e, "hello dropped");
                return;
            }
        };

        let Some(player_id) = self.sessions.insert(from, name.clone(), entity_id, now) else {
            warn!(%from, %name, "no player id available, hello dropped");
            if let Err(e) = self.store.remove_entity(entity_id) {
                warn!(error = %e, "tank of refused player missing");
            }
            return;
        };

        #[allow(clippy::cast_precision_loss)]
        let spawn = Position::new(player_id as f32 * SPAWN_SPACING, 0.0, 0.0);
        if let Err(e) = self.store.set_position(entity_id, spawn) {
            error!(error = %e, "spawned tank vanished");
        }

        // The newcomer needs a Create for everything already in the world.
        self.store.resync();

        info!(%from, %name, player_id, %entity_id, "player joined");
        self.send_welcome(from, player_id);
    }

    fn handle_input(&mut self, from: SocketAddr, input: InputState, now: f64) {
        let Some(session) = self.sessions.get_mut(from) else {
            debug!(%from, "input from unknown endpoint dropped");
            return;
        };
        session.touch(now);
        if !session.record_input(input) {
            trace!(%from, sequence = input.sequence, "stale input dropped");
        }
    }

    fn send_welcome(&self, to: SocketAddr, player_id: PlayerId) {
        match (Packet::Welcome { player_id }).to_writer(DEFAULT_PACKET_CAPACITY) {
            Ok(writer) => {
                self.transport.send(&writer, to);
            }
            Err(e) => error!(error = %e, "welcome encode failed"),
        }
    }

    fn drive_tanks(&mut self, dt: f32, now: f64) {
        for session in self.sessions.iter_mut() {
            let fire = session.take_fire_press();
            let Some(input) = session.latest_input().copied() else {
                continue;
            };
            let tank = session.entity_id();

            if let Err(e) = drive_tank(&mut self.store, tank, &input, dt) {
                warn!(error = %e, "tank update failed");
                continue;
            }
            if fire {
                match spawn_projectile(&mut self.store, tank) {
                    Ok(id) => self.projectiles.push(Projectile {
                        id,
                        expires_at: now + PROJECTILE_LIFETIME,
                    }),
                    Err(e) => debug!(error = %e, "shot not fired"),
                }
            }
        }
    }

    fn move_projectiles(&mut self, dt: f32, now: f64) {
        let store = &mut self.store;
        self.projectiles.retain(|projectile| {
            if now >= projectile.expires_at {
                if let Err(e) = store.remove_entity(projectile.id) {
                    debug!(error = %e, "projectile already gone");
                }
                return false;
            }

            let Some(entity) = store.get(projectile.id) else {
                return false;
            };
            let speed = match entity.kind() {
                EntityKind::Projectile(state) => state.speed,
                _ => 0.0,
            };
            let (fx, fz) = entity.rotation().forward_xz();
            let next = entity.position().offset(fx * speed * dt, 0.0, fz * speed * dt);
            store.set_position(projectile.id, next).is_ok()
        });
    }

    fn expire_sessions(&mut self, now: f64) {
        for session in self.sessions.expire(now, self.config.session_timeout) {
            info!(
                from = %session.addr(),
                player_id = session.player_id(),
                "session timed out"
            );
            if let Err(e) = self.store.remove_entity(session.entity_id()) {
                warn!(error = %e, "tank of expired session missing");
            }
        }
    }

    fn broadcast_snapshot(&mut self) {
        let writer = match self.store.build_snapshot() {
            Ok(writer) => writer,
            Err(e) => {
                error!(error = %e, entities = self.store.len(), "snapshot abandoned");
                return;
            }
        };

        for session in self.sessions.iter() {
            self.transport.send(&writer, session.addr());
        }
        self.snapshots_sent += 1;
        trace!(
            bytes = writer.byte_len(),
            sessions = self.sessions.len(),
            "snapshot sent"
        );
    }

    /// Stops the receive thread.
    pub fn shutdown(&mut self) {
        self.transport.stop();
    }
}

fn wrap_angle(angle: f32) -> f32 {
    (angle + PI).rem_euclid(TAU) - PI
}

/// Applies one tick of `input` to the tank `id`.
fn drive_tank(
    store: &mut EntityStore,
    id: NetworkId,
    input: &InputState,
    dt: f32,
) -> ReplicationResult<()> {
    let Some(entity) = store.get(id) else {
        return Err(crate::replication::ReplicationError::UnknownEntity(id));
    };
    let mut rotation = entity.rotation();
    let position = entity.position();
    let turret_changed = match entity.kind() {
        EntityKind::Tank(state) => (state.turret_yaw - input.turret_yaw).abs() > f32::EPSILON,
        _ => false,
    };

    if input.turn != 0.0 {
        rotation.yaw = wrap_angle(rotation.yaw + input.turn * TURN_RATE * dt);
        store.set_rotation(id, rotation)?;
    }

    if input.forward != 0.0 {
        let boost = if input.is_pressed(InputState::BOOST) {
            BOOST_MULTIPLIER
        } else {
            1.0
        };
        let step = input.forward * TANK_SPEED * boost * dt;
        let (fx, fz) = rotation.forward_xz();
        store.set_position(id, position.offset(fx * step, 0.0, fz * step))?;
    }

    if turret_changed {
        if let EntityKind::Tank(state) = store.kind_mut(id)? {
            state.turret_yaw = input.turret_yaw;
        }
    }
    Ok(())
}

/// Spawns a projectile at the tank's position, heading where its turret
/// points.
fn spawn_projectile(store: &mut EntityStore, tank: NetworkId) -> ReplicationResult<NetworkId> {
    let Some(entity) = store.get(tank) else {
        return Err(crate::replication::ReplicationError::UnknownEntity(tank));
    };
    let turret = match entity.kind() {
        EntityKind::Tank(state) => state.turret_yaw,
        _ => 0.0,
    };
    let position = entity.position();
    let heading = Rotation::from_yaw(wrap_angle(entity.rotation().yaw + turret));

    let id = store.add_entity(
        "shell",
        EntityKind::Projectile(ProjectileState {
            owner: tank,
            speed: PROJECTILE_SPEED,
        }),
    )?;
    store.set_position(id, position)?;
    store.set_rotation(id, heading)?;
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replication::{DirtyMask, ReplicationAction};
    use std::sync::Arc;
    use weave_core::ManualClock;

    fn test_server() -> GameServer {
        let config = ServerConfig {
            port: 0,
            ..ServerConfig::default()
        };
        let clock: SharedClock = Arc::new(ManualClock::new());
        GameServer::new(config, TransportConfig::default(), clock).unwrap()
    }

    fn peer() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 9))
    }

    fn all_created(server: &GameServer) -> bool {
        server
            .store()
            .iter()
            .all(|e| e.action() == ReplicationAction::Create)
    }

    fn tank_store() -> (EntityStore, NetworkId) {
        let mut store = EntityStore::new(4, ReplicationMode::Delta, 1024);
        let id = store
            .add_entity("t", EntityKind::Tank(TankState::default()))
            .unwrap();
        store.build_snapshot().unwrap();
        (store, id)
    }

    #[test]
    fn idle_input_leaves_tank_clean() {
        let (mut store, id) = tank_store();
        drive_tank(&mut store, id, &InputState::default(), 0.1).unwrap();
        assert!(store.get(id).unwrap().dirty().is_empty());
    }

    #[test]
    fn throttle_moves_along_heading() {
        let (mut store, id) = tank_store();
        let input = InputState {
            forward: 1.0,
            ..InputState::default()
        };
        drive_tank(&mut store, id, &input, 0.5).unwrap();

        let tank = store.get(id).unwrap();
        assert!((tank.position().z - TANK_SPEED * 0.5).abs() < 1e-4);
        assert_eq!(tank.dirty(), DirtyMask::POSITION);
    }

    #[test]
    fn turret_yaw_marks_state() {
        let (mut store, id) = tank_store();
        let input = InputState {
            turret_yaw: 1.0,
            ..InputState::default()
        };
        drive_tank(&mut store, id, &input, 0.1).unwrap();

        let tank = store.get(id).unwrap();
        assert_eq!(tank.dirty(), DirtyMask::STATE);
        assert!(matches!(tank.kind(), EntityKind::Tank(s) if (s.turret_yaw - 1.0).abs() < f32::EPSILON));
    }

    #[test]
    fn projectile_inherits_turret_heading() {
        let (mut store, id) = tank_store();
        if let EntityKind::Tank(state) = store.kind_mut(id).unwrap() {
            state.turret_yaw = PI / 2.0;
        }

        let shell = spawn_projectile(&mut store, id).unwrap();
        let shell = store.get(shell).unwrap();
        assert!((shell.rotation().yaw - PI / 2.0).abs() < 1e-6);
        assert!(matches!(shell.kind(), EntityKind::Projectile(p) if p.owner == id));
    }

    #[test]
    fn repeated_hello_resyncs_once_per_cooldown() {
        let mut server = test_server();
        server.handle_hello(peer(), "Alice".into(), 0.0);
        assert_eq!(server.sessions().len(), 1);
        server.store_mut().build_snapshot().unwrap();

        // First resend: the Welcome was lost, so the world is re-created.
        server.handle_hello(peer(), "Alice".into(), 0.1);
        assert!(all_created(&server));
        server.store_mut().build_snapshot().unwrap();

        for step in 2..10 {
            server.handle_hello(peer(), "Alice".into(), f64::from(step) * 0.1);
            assert!(!all_created(&server));
        }

        server.handle_hello(peer(), "Alice".into(), 1.2);
        assert!(all_created(&server));
        assert_eq!(server.sessions().len(), 1);
        assert_eq!(server.store().len(), 1);
    }

    #[test]
    fn refused_player_leaves_no_tank() {
        let mut server = test_server();
        server.sessions = SessionTable::with_first_player_id(4, u32::MAX);

        server.handle_hello(peer(), "Alice".into(), 0.0);

        assert!(server.sessions().is_empty());
        assert!(server.store().is_empty());
        assert_eq!(server.store().pending_destroys(), 1);
    }

    #[test]
    fn angles_wrap() {
        assert!((wrap_angle(PI + 0.5) - (-PI + 0.5)).abs() < 1e-5);
        assert!((wrap_angle(0.25) - 0.25).abs() < 1e-6);
    }
}
