//! # Entity Store
//!
//! Authoritative, capacity-bounded set of replicated entities.
//!
//! ## Design
//!
//! - Storage is a [`PoolAllocator`] sized once at startup. A full pool refuses
//!   new entities; nothing is evicted.
//! - Network IDs come from a counter that only moves forward, so an ID never
//!   names two entities during the store's lifetime.
//! - Removing an entity frees its slot at once and queues a Destroy record.
//!   The next snapshot carries that record exactly once.
//! - Building a snapshot commits it: every written entity drops to `Update`
//!   with a clean dirty mask.
//! - A snapshot that would overflow is split: Destroy records go first, then
//!   changed entities, then unchanged ones, until the buffer is full. What
//!   did not fit stays pending for the next build.

use std::collections::HashMap;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, trace, warn};
use weave_core::{PoolAllocator, PoolHandle, Position, Rotation};

use crate::protocol::{clamp_name, BitWriter, CodecError, PacketTag};

use super::entity::ReplicatedEntity;
use super::kind::EntityKind;
use super::record::{DirtyMask, EntityRecord, NetworkId, ReplicationAction};

/// Entity store failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReplicationError {
    /// Every slot is in use.
    #[error("entity pool exhausted ({capacity} slots in use)")]
    PoolExhausted {
        /// Pool capacity.
        capacity: usize,
    },

    /// No in-use entity has this ID.
    #[error("no entity with network id {0}")]
    UnknownEntity(NetworkId),

    /// Every 32-bit network ID has been handed out.
    #[error("network ids exhausted")]
    IdsExhausted,
}

/// Result type for entity store operations.
pub type ReplicationResult<T> = Result<T, ReplicationError>;

/// How much of the world each snapshot describes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplicationMode {
    /// Every in-use entity with every group. Survives packet loss.
    #[default]
    Full,
    /// Creates in full, Updates only for dirty entities and only their dirty
    /// groups. A lost packet loses those changes.
    Delta,
}

/// Server-side entity store.
#[derive(Debug)]
pub struct EntityStore {
    pool: PoolAllocator<ReplicatedEntity>,
    by_id: HashMap<NetworkId, PoolHandle>,
    next_network_id: u32,
    pending_destroys: Vec<EntityRecord>,
    mode: ReplicationMode,
    snapshot_capacity: usize,
}

impl EntityStore {
    /// Creates a store with `capacity` slots whose snapshots are at most
    /// `snapshot_capacity` bytes.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn new(capacity: usize, mode: ReplicationMode, snapshot_capacity: usize) -> Self {
        Self {
            pool: PoolAllocator::new(capacity),
            by_id: HashMap::with_capacity(capacity),
            next_network_id: 1,
            pending_destroys: Vec::new(),
            mode,
            snapshot_capacity,
        }
    }

    /// Replication mode in effect.
    #[inline]
    #[must_use]
    pub const fn mode(&self) -> ReplicationMode {
        self.mode
    }

    /// Slot count.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.pool.capacity()
    }

    /// In-use entity count.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.pool.allocated_count()
    }

    /// Returns true if no entity is in use.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Free slot count.
    #[inline]
    #[must_use]
    pub fn free_slots(&self) -> usize {
        self.pool.free_count()
    }

    /// Destroy records waiting for the next snapshot.
    #[inline]
    #[must_use]
    pub fn pending_destroys(&self) -> usize {
        self.pending_destroys.len()
    }

    /// Spawns an entity in the lowest free slot.
    ///
    /// The entity starts active, at the origin, with action `Create` and
    /// every group dirty. Names longer than [`crate::MAX_NAME_LEN`] bytes are
    /// cut to fit.
    ///
    /// # Errors
    ///
    /// [`ReplicationError::PoolExhausted`] if every slot is taken,
    /// [`ReplicationError::IdsExhausted`] once the ID counter is spent.
    pub fn add_entity(
        &mut self,
        name: impl Into<String>,
        kind: EntityKind,
    ) -> ReplicationResult<NetworkId> {
        if self.pool.is_full() {
            return Err(ReplicationError::PoolExhausted {
                capacity: self.pool.capacity(),
            });
        }

        let next_network_id = self
            .next_network_id
            .checked_add(1)
            .ok_or(ReplicationError::IdsExhausted)?;

        let mut name = name.into();
        if name.len() > crate::MAX_NAME_LEN {
            name = clamp_name(&name).to_owned();
        }

        let network_id = NetworkId(self.next_network_id);
        let entity = ReplicatedEntity::spawn(network_id, name, kind);
        let handle = self
            .pool
            .allocate(entity)
            .ok_or(ReplicationError::PoolExhausted {
                capacity: self.pool.capacity(),
            })?;

        self.next_network_id = next_network_id;
        self.by_id.insert(network_id, handle);

        debug!(
            %network_id,
            slot = handle.index(),
            class = ?kind.class_type(),
            "entity spawned"
        );
        Ok(network_id)
    }

    /// Removes an entity and queues its Destroy record.
    ///
    /// The slot is free for reuse immediately.
    ///
    /// # Errors
    ///
    /// [`ReplicationError::UnknownEntity`] if no in-use entity has `id`.
    pub fn remove_entity(&mut self, id: NetworkId) -> ReplicationResult<()> {
        let handle = self
            .by_id
            .remove(&id)
            .ok_or(ReplicationError::UnknownEntity(id))?;
        let mut entity = self
            .pool
            .free(handle)
            .ok_or(ReplicationError::UnknownEntity(id))?;

        entity.release();
        self.pending_destroys.push(entity.to_record(DirtyMask::NONE));

        debug!(network_id = %id, slot = handle.index(), "entity removed");
        Ok(())
    }

    /// Looks up an in-use entity.
    #[must_use]
    pub fn get(&self, id: NetworkId) -> Option<&ReplicatedEntity> {
        let handle = *self.by_id.get(&id)?;
        self.pool.get(handle)
    }

    fn entity_mut(&mut self, id: NetworkId) -> ReplicationResult<&mut ReplicatedEntity> {
        let handle = *self
            .by_id
            .get(&id)
            .ok_or(ReplicationError::UnknownEntity(id))?;
        self.pool
            .get_mut(handle)
            .ok_or(ReplicationError::UnknownEntity(id))
    }

    /// In-use entities in slot order.
    pub fn iter(&self) -> impl Iterator<Item = &ReplicatedEntity> {
        self.pool.iter().map(|(_, entity)| entity)
    }

    /// Moves an entity. Marks POSITION dirty if the value changed.
    ///
    /// # Errors
    ///
    /// [`ReplicationError::UnknownEntity`] if no in-use entity has `id`.
    pub fn set_position(&mut self, id: NetworkId, position: Position) -> ReplicationResult<()> {
        self.entity_mut(id)?.set_position(position);
        Ok(())
    }

    /// Turns an entity. Marks ROTATION dirty if the value changed.
    ///
    /// # Errors
    ///
    /// [`ReplicationError::UnknownEntity`] if no in-use entity has `id`.
    pub fn set_rotation(&mut self, id: NetworkId, rotation: Rotation) -> ReplicationResult<()> {
        self.entity_mut(id)?.set_rotation(rotation);
        Ok(())
    }

    /// Activates or deactivates an entity.
    ///
    /// # Errors
    ///
    /// [`ReplicationError::UnknownEntity`] if no in-use entity has `id`.
    pub fn set_active(&mut self, id: NetworkId, active: bool) -> ReplicationResult<()> {
        self.entity_mut(id)?.set_active(active);
        Ok(())
    }

    /// Mutable access to the class-specific state. Marks STATE dirty.
    ///
    /// # Errors
    ///
    /// [`ReplicationError::UnknownEntity`] if no in-use entity has `id`.
    pub fn kind_mut(&mut self, id: NetworkId) -> ReplicationResult<&mut EntityKind> {
        Ok(self.entity_mut(id)?.kind_mut())
    }

    /// Makes the next snapshot carry a full Create record for every in-use
    /// entity, for receivers that joined after the original Creates went out.
    ///
    /// Receivers that already know an entity treat the repeated Create as a
    /// replacement.
    pub fn resync(&mut self) {
        for (_, entity) in self.pool.iter_mut() {
            entity.mark_for_create();
        }
    }

    /// Groups `entity` should carry in the next snapshot, or `None` if it
    /// has nothing to send.
    fn groups_for(&self, entity: &ReplicatedEntity) -> Option<DirtyMask> {
        match (self.mode, entity.action()) {
            (ReplicationMode::Full, _) | (ReplicationMode::Delta, ReplicationAction::Create) => {
                Some(DirtyMask::ALL)
            }
            (ReplicationMode::Delta, _) if entity.dirty().is_empty() => None,
            (ReplicationMode::Delta, _) => Some(entity.dirty()),
        }
    }

    /// Records the next snapshot should carry, in wire order.
    fn collect_records(&self) -> Vec<EntityRecord> {
        let mut records = Vec::with_capacity(self.pool.allocated_count() + self.pending_destroys.len());

        for (_, entity) in self.pool.iter() {
            if let Some(groups) = self.groups_for(entity) {
                records.push(entity.to_record(groups));
            }
        }

        records.extend(self.pending_destroys.iter().cloned());
        records
    }

    fn encode_snapshot(&self, records: &[EntityRecord]) -> Result<BitWriter, CodecError> {
        let mut writer = BitWriter::with_capacity(self.snapshot_capacity);
        writer.write_u32(PacketTag::State as u32)?;
        let count = u32::try_from(records.len()).map_err(|_| CodecError::Overflow {
            requested: records.len(),
            remaining: u32::MAX as usize,
        })?;
        writer.write_u32(count)?;
        for record in records {
            record.encode(&mut writer)?;
        }
        Ok(writer)
    }

    /// Builds the largest snapshot that fits, committing only what it wrote.
    ///
    /// Returns `overflow` unchanged if not a single record fits.
    fn build_partial_snapshot(&mut self, overflow: CodecError) -> Result<BitWriter, CodecError> {
        // Tag and record count.
        const HEADER_BITS: usize = 64;

        let mut scratch = BitWriter::with_capacity(self.snapshot_capacity);
        let mut budget = scratch.capacity_bits().saturating_sub(HEADER_BITS);
        let mut fits = |record: &EntityRecord| {
            scratch.reset();
            match record.encode(&mut scratch) {
                Ok(()) if scratch.bit_len() <= budget => {
                    budget -= scratch.bit_len();
                    true
                }
                _ => false,
            }
        };

        let mut records = Vec::new();
        let destroys = self
            .pending_destroys
            .iter()
            .take_while(|record| fits(*record))
            .count();
        records.extend(self.pending_destroys[..destroys].iter().cloned());

        // Changed entities first so an unchanged one never starves them.
        let mut written = Vec::new();
        for changed_pass in [true, false] {
            for (handle, entity) in self.pool.iter() {
                let changed =
                    entity.action() == ReplicationAction::Create || !entity.dirty().is_empty();
                if changed != changed_pass {
                    continue;
                }
                let Some(groups) = self.groups_for(entity) else {
                    continue;
                };
                let record = entity.to_record(groups);
                if fits(&record) {
                    records.push(record);
                    written.push(handle);
                }
            }
        }

        if records.is_empty() {
            return Err(overflow);
        }

        let writer = self.encode_snapshot(&records)?;

        for handle in &written {
            if let Some(entity) = self.pool.get_mut(*handle) {
                entity.mark_sent();
            }
        }
        self.pending_destroys.drain(..destroys);

        let changed_left = self
            .pool
            .iter()
            .filter(|(_, e)| e.action() == ReplicationAction::Create || !e.dirty().is_empty())
            .count();
        warn!(
            records = records.len(),
            changed_left,
            destroys_left = self.pending_destroys.len(),
            "snapshot split to fit"
        );
        Ok(writer)
    }

    /// Serializes one State packet and commits it.
    ///
    /// On success every written entity becomes `Update` with a clean dirty
    /// mask and every written Destroy leaves the queue. When everything does
    /// not fit, the snapshot carries as much as the buffer holds and the rest
    /// waits for the next call. On failure nothing changes.
    ///
    /// # Errors
    ///
    /// [`CodecError::Overflow`] if not even one pending record fits the
    /// configured snapshot capacity.
    pub fn build_snapshot(&mut self) -> Result<BitWriter, CodecError> {
        let records = self.collect_records();

        let writer = match self.encode_snapshot(&records) {
            Ok(writer) => writer,
            Err(overflow @ CodecError::Overflow { .. }) => {
                return self.build_partial_snapshot(overflow);
            }
            Err(e) => return Err(e),
        };

        for (_, entity) in self.pool.iter_mut() {
            entity.mark_sent();
        }
        self.pending_destroys.clear();

        trace!(records = records.len(), bytes = writer.byte_len(), "snapshot built");
        Ok(writer)
    }
}
