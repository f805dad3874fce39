//! # Client Sessions
//!
//! One session per client endpoint that completed a Hello.
//!
//! ## Design
//!
//! - Keyed by socket address; a Hello from a known address is a resend, not
//!   a new player.
//! - Player IDs come from a counter starting at 1 and are never reused. Once
//!   the counter is spent no further client is admitted.
//! - A repeated Hello may ask for a world resync at most once per cooldown.
//! - Input is latest-wins, ordered by the client's sequence number.

use std::collections::HashMap;
use std::net::SocketAddr;

use crate::protocol::{InputState, PlayerId};
use crate::replication::NetworkId;

/// Server-side record of one connected client.
#[derive(Clone, Debug)]
pub struct ClientSession {
    player_id: PlayerId,
    addr: SocketAddr,
    name: String,
    entity_id: NetworkId,
    last_recv: f64,
    latest_input: Option<InputState>,
    fire_held: bool,
    resynced_at: Option<f64>,
}

impl ClientSession {
    /// Player ID sent in Welcome.
    #[inline]
    #[must_use]
    pub const fn player_id(&self) -> PlayerId {
        self.player_id
    }

    /// Client endpoint.
    #[inline]
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Name from Hello.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The player's tank.
    #[inline]
    #[must_use]
    pub const fn entity_id(&self) -> NetworkId {
        self.entity_id
    }

    /// Clock reading of the last packet from this client.
    #[inline]
    #[must_use]
    pub const fn last_recv(&self) -> f64 {
        self.last_recv
    }

    /// Most recent input, if any arrived.
    #[inline]
    #[must_use]
    pub const fn latest_input(&self) -> Option<&InputState> {
        self.latest_input.as_ref()
    }

    /// Notes that a packet arrived at `now`.
    pub fn touch(&mut self, now: f64) {
        if now > self.last_recv {
            self.last_recv = now;
        }
    }

    /// Stores `input` unless an input with a later sequence is already held.
    ///
    /// Returns false for stale input. Sequence comparison wraps, so a client
    /// may run past `u32::MAX`.
    pub fn record_input(&mut self, input: InputState) -> bool {
        if let Some(current) = &self.latest_input {
            let diff = input.sequence.wrapping_sub(current.sequence);
            if diff == 0 || diff > u32::MAX / 2 {
                return false;
            }
        }
        self.latest_input = Some(input);
        true
    }

    /// True on the first tick the fire button is seen held.
    pub fn take_fire_press(&mut self) -> bool {
        let held = self
            .latest_input
            .is_some_and(|input| input.is_pressed(InputState::FIRE));
        let pressed = held && !self.fire_held;
        self.fire_held = held;
        pressed
    }

    /// True if this session may trigger a resync at `now`, and records it.
    ///
    /// The first request always passes; later ones must be at least
    /// `cooldown` seconds apart.
    pub fn take_resync(&mut self, now: f64, cooldown: f64) -> bool {
        let allowed = self.resynced_at.map_or(true, |last| now - last >= cooldown);
        if allowed {
            self.resynced_at = Some(now);
        }
        allowed
    }

    /// True if nothing arrived for longer than `timeout` seconds.
    #[must_use]
    pub fn is_timed_out(&self, now: f64, timeout: f64) -> bool {
        now - self.last_recv > timeout
    }
}

/// All sessions, bounded by `max_clients`.
#[derive(Debug)]
pub struct SessionTable {
    sessions: HashMap<SocketAddr, ClientSession>,
    max_clients: usize,
    next_player_id: PlayerId,
}

impl SessionTable {
    /// Creates an empty table admitting at most `max_clients` sessions.
    #[must_use]
    pub fn new(max_clients: usize) -> Self {
        Self::with_first_player_id(max_clients, 1)
    }

    pub(crate) fn with_first_player_id(max_clients: usize, first: PlayerId) -> Self {
        Self {
            sessions: HashMap::with_capacity(max_clients),
            max_clients,
            next_player_id: first,
        }
    }

    /// Session count.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Returns true if there are no sessions.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Returns true if no more sessions are admitted.
    #[inline]
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.sessions.len() >= self.max_clients
    }

    /// Session for `addr`.
    #[must_use]
    pub fn get(&self, addr: SocketAddr) -> Option<&ClientSession> {
        self.sessions.get(&addr)
    }

    /// Mutable session for `addr`.
    pub fn get_mut(&mut self, addr: SocketAddr) -> Option<&mut ClientSession> {
        self.sessions.get_mut(&addr)
    }

    /// Session owning the tank `entity_id`.
    #[must_use]
    pub fn find_by_entity(&self, entity_id: NetworkId) -> Option<&ClientSession> {
        self.sessions.values().find(|s| s.entity_id == entity_id)
    }

    /// Admits a new client. Returns its player ID, or `None` if the table is
    /// full, the address already has a session or player IDs are spent.
    pub fn insert(
        &mut self,
        addr: SocketAddr,
        name: String,
        entity_id: NetworkId,
        now: f64,
    ) -> Option<PlayerId> {
        if self.is_full() || self.sessions.contains_key(&addr) {
            return None;
        }

        let player_id = self.next_player_id;
        self.next_player_id = self.next_player_id.checked_add(1)?;
        self.sessions.insert(
            addr,
            ClientSession {
                player_id,
                addr,
                name,
                entity_id,
                last_recv: now,
                latest_input: None,
                fire_held: false,
                resynced_at: None,
            },
        );
        Some(player_id)
    }

    /// Removes the session for `addr`.
    pub fn remove(&mut self, addr: SocketAddr) -> Option<ClientSession> {
        self.sessions.remove(&addr)
    }

    /// Removes and returns every session silent for longer than `timeout`.
    pub fn expire(&mut self, now: f64, timeout: f64) -> Vec<ClientSession> {
        let stale: Vec<SocketAddr> = self
            .sessions
            .values()
            .filter(|s| s.is_timed_out(now, timeout))
            .map(|s| s.addr)
            .collect();

        stale
            .into_iter()
            .filter_map(|addr| self.sessions.remove(&addr))
            .collect()
    }

    /// Sessions, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &ClientSession> {
        self.sessions.values()
    }

    /// Sessions, mutably.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ClientSession> {
        self.sessions.values_mut()
    }
}
