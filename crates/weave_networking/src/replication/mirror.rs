//! Client-side copy of the server's replicated entities.

use std::collections::HashMap;

use tracing::debug;
use weave_core::{Position, Rotation};

use crate::protocol::StateSnapshot;

use super::kind::{ClassType, EntityKind};
use super::record::{DirtyMask, EntityRecord, NetworkId, ReplicationAction};

/// What the client knows about one remote entity.
#[derive(Clone, Debug, PartialEq)]
pub struct RemoteEntity {
    /// Entity identifier.
    pub network_id: NetworkId,
    /// Class tag.
    pub class_type: ClassType,
    /// Name from the Create record.
    pub name: String,
    /// Last replicated active flag.
    pub active: bool,
    /// Last replicated position.
    pub position: Position,
    /// Last replicated rotation.
    pub rotation: Rotation,
    /// Last replicated class state.
    pub kind: EntityKind,
}

/// Entities reconstructed from State packets.
#[derive(Debug, Default)]
pub struct ReplicaMirror {
    entities: HashMap<NetworkId, RemoteEntity>,
}

impl ReplicaMirror {
    /// Creates an empty mirror.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies every record of a snapshot in order.
    pub fn apply_snapshot(&mut self, snapshot: &StateSnapshot) {
        for record in &snapshot.records {
            self.apply(record);
        }
    }

    /// Applies one record.
    ///
    /// Create inserts (or replaces), Update merges only the groups in the
    /// record's dirty mask, Destroy removes. An Update for an entity the
    /// mirror never saw created is ignored.
    pub fn apply(&mut self, record: &EntityRecord) {
        match record.action {
            ReplicationAction::Create => {
                self.entities.insert(
                    record.network_id,
                    RemoteEntity {
                        network_id: record.network_id,
                        class_type: record.class_type,
                        name: record.name.clone(),
                        active: record.active,
                        position: record.position,
                        rotation: record.rotation,
                        kind: record.kind,
                    },
                );
            }
            ReplicationAction::Update => {
                let Some(entity) = self.entities.get_mut(&record.network_id) else {
                    debug!(network_id = %record.network_id, "update for unknown entity ignored");
                    return;
                };
                entity.active = record.active;
                if record.dirty.contains(DirtyMask::POSITION) {
                    entity.position = record.position;
                }
                if record.dirty.contains(DirtyMask::ROTATION) {
                    entity.rotation = record.rotation;
                }
                if record.dirty.contains(DirtyMask::STATE) {
                    entity.kind = record.kind;
                }
            }
            ReplicationAction::Destroy => {
                self.entities.remove(&record.network_id);
            }
        }
    }

    /// Looks up an entity.
    #[must_use]
    pub fn get(&self, id: NetworkId) -> Option<&RemoteEntity> {
        self.entities.get(&id)
    }

    /// Finds an entity by name.
    #[must_use]
    pub fn find_by_name(&self, name: &str) -> Option<&RemoteEntity> {
        self.entities.values().find(|entity| entity.name == name)
    }

    /// Known entities, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &RemoteEntity> {
        self.entities.values()
    }

    /// Number of known entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Returns true if no entity is known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Forgets everything.
    pub fn clear(&mut self) {
        self.entities.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_merges_only_dirty_groups() {
        let mut mirror = ReplicaMirror::new();
        mirror.apply(&EntityRecord {
            network_id: NetworkId(1),
            class_type: ClassType::Prop,
            action: ReplicationAction::Create,
            active: true,
            dirty: DirtyMask::ALL,
            name: "rock".to_owned(),
            position: Position::new(1.0, 1.0, 1.0),
            rotation: Rotation::from_yaw(1.0),
            kind: EntityKind::Prop,
        });

        mirror.apply(&EntityRecord {
            network_id: NetworkId(1),
            class_type: ClassType::Prop,
            action: ReplicationAction::Update,
            active: true,
            dirty: DirtyMask::POSITION,
            name: String::new(),
            position: Position::new(5.0, 0.0, 0.0),
            rotation: Rotation::default(),
            kind: EntityKind::Prop,
        });

        let rock = mirror.get(NetworkId(1)).unwrap();
        assert_eq!(rock.position, Position::new(5.0, 0.0, 0.0));
        assert_eq!(rock.rotation, Rotation::from_yaw(1.0));
        assert_eq!(rock.name, "rock");
    }

    #[test]
    fn update_for_unknown_entity_is_ignored() {
        let mut mirror = ReplicaMirror::new();
        let mut record = EntityRecord::destroy(NetworkId(4), ClassType::Prop);
        record.action = ReplicationAction::Update;
        mirror.apply(&record);
        assert!(mirror.is_empty());
    }
}
