//! Server-side replicated entity.

use weave_core::{Position, Rotation};

use super::kind::{ClassType, EntityKind};
use super::record::{DirtyMask, EntityRecord, NetworkId, ReplicationAction};

/// An entity living in a slot of the [`EntityStore`](super::EntityStore).
///
/// Replicated fields are only reachable through setters, and every setter
/// marks the matching dirty group. That keeps the dirty mask honest without
/// relying on callers to remember.
#[derive(Clone, Debug)]
pub struct ReplicatedEntity {
    network_id: NetworkId,
    name: String,
    in_use: bool,
    active: bool,
    position: Position,
    rotation: Rotation,
    kind: EntityKind,
    dirty: DirtyMask,
    action: ReplicationAction,
}

impl ReplicatedEntity {
    pub(super) fn spawn(network_id: NetworkId, name: String, kind: EntityKind) -> Self {
        Self {
            network_id,
            name,
            in_use: true,
            active: true,
            position: Position::default(),
            rotation: Rotation::default(),
            kind,
            dirty: DirtyMask::ALL,
            action: ReplicationAction::Create,
        }
    }

    /// Network identifier.
    #[inline]
    #[must_use]
    pub const fn network_id(&self) -> NetworkId {
        self.network_id
    }

    /// Class tag.
    #[inline]
    #[must_use]
    pub const fn class_type(&self) -> ClassType {
        self.kind.class_type()
    }

    /// Display name.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// True while the entity occupies its slot.
    #[inline]
    #[must_use]
    pub const fn is_in_use(&self) -> bool {
        self.in_use
    }

    /// Whether the entity participates in the simulation.
    #[inline]
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.active
    }

    /// World position.
    #[inline]
    #[must_use]
    pub const fn position(&self) -> Position {
        self.position
    }

    /// World rotation.
    #[inline]
    #[must_use]
    pub const fn rotation(&self) -> Rotation {
        self.rotation
    }

    /// Class-specific state.
    #[inline]
    #[must_use]
    pub const fn kind(&self) -> &EntityKind {
        &self.kind
    }

    /// Groups changed since the last snapshot.
    #[inline]
    #[must_use]
    pub const fn dirty(&self) -> DirtyMask {
        self.dirty
    }

    /// Action the next record for this entity will carry.
    #[inline]
    #[must_use]
    pub const fn action(&self) -> ReplicationAction {
        self.action
    }

    pub(super) fn set_position(&mut self, position: Position) {
        if self.position != position {
            self.position = position;
            self.dirty.insert(DirtyMask::POSITION);
        }
    }

    pub(super) fn set_rotation(&mut self, rotation: Rotation) {
        if self.rotation != rotation {
            self.rotation = rotation;
            self.dirty.insert(DirtyMask::ROTATION);
        }
    }

    // The active flag rides in every non-Destroy record, so it has no group
    // of its own. Flipping it still needs a record in delta mode.
    pub(super) fn set_active(&mut self, active: bool) {
        if self.active != active {
            self.active = active;
            self.dirty.insert(DirtyMask::STATE);
        }
    }

    pub(super) fn kind_mut(&mut self) -> &mut EntityKind {
        self.dirty.insert(DirtyMask::STATE);
        &mut self.kind
    }

    pub(super) fn release(&mut self) {
        self.in_use = false;
        self.active = false;
        self.action = ReplicationAction::Destroy;
    }

    /// Builds the wire record carrying the groups in `groups`.
    pub(super) fn to_record(&self, groups: DirtyMask) -> EntityRecord {
        EntityRecord {
            network_id: self.network_id,
            class_type: self.class_type(),
            action: self.action,
            active: self.active,
            dirty: groups,
            name: if self.action == ReplicationAction::Create {
                self.name.clone()
            } else {
                String::new()
            },
            position: self.position,
            rotation: self.rotation,
            kind: self.kind,
        }
    }

    pub(super) fn mark_for_create(&mut self) {
        self.action = ReplicationAction::Create;
        self.dirty = DirtyMask::ALL;
    }

    pub(super) fn mark_sent(&mut self) {
        self.action = ReplicationAction::Update;
        self.dirty.clear();
    }
}
