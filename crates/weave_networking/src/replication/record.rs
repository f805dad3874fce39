//! # Entity Records
//!
//! One record per entity inside a State packet:
//!
//! ```text
//! network_id   32 bits
//! class_type    8 bits
//! action        2 bits   Create = 0, Update = 1, Destroy = 2
//! -- Destroy records end here --
//! active        1 bit
//! dirty_mask    3 bits   POSITION = 1, ROTATION = 2, STATE = 4
//! name          string   Create only
//! position      3 x f32  if POSITION
//! rotation      3 x f32  if ROTATION (pitch, yaw, roll)
//! state         payload  if STATE
//! ```

use std::fmt;

use weave_core::{Position, Rotation};

use crate::protocol::{BitReader, BitWriter, CodecError, ProtocolError};

use super::kind::{ClassType, EntityKind};

/// Server-assigned identifier of an entity on the wire.
///
/// Independent of the pool slot the entity lives in, and never reused.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NetworkId(pub u32);

impl fmt::Display for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Field groups changed since the entity was last written.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct DirtyMask(u8);

impl DirtyMask {
    /// Nothing changed.
    pub const NONE: Self = Self(0);
    /// Position changed.
    pub const POSITION: Self = Self(1 << 0);
    /// Rotation changed.
    pub const ROTATION: Self = Self(1 << 1);
    /// Class-specific state changed.
    pub const STATE: Self = Self(1 << 2);
    /// Every group.
    pub const ALL: Self = Self(0b111);

    /// Width of the mask on the wire.
    pub const BITS: u8 = 3;

    /// Builds a mask from wire bits, ignoring unknown bits.
    #[inline]
    #[must_use]
    pub const fn from_bits_truncate(bits: u8) -> Self {
        Self(bits & Self::ALL.0)
    }

    /// Raw bits.
    #[inline]
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Returns true if every group in `other` is set.
    #[inline]
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns true if no group is set.
    #[inline]
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Sets the groups in `other`.
    #[inline]
    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    /// Clears every group.
    #[inline]
    pub fn clear(&mut self) {
        self.0 = 0;
    }
}

impl std::ops::BitOr for DirtyMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// What the receiver should do with a record.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ReplicationAction {
    /// First appearance; the record carries every group and the name.
    #[default]
    Create = 0,
    /// Change to an entity the receiver already knows.
    Update = 1,
    /// The entity is gone.
    Destroy = 2,
}

impl ReplicationAction {
    /// Width of the action on the wire.
    pub const BITS: u8 = 2;
}

impl TryFrom<u8> for ReplicationAction {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Create),
            1 => Ok(Self::Update),
            2 => Ok(Self::Destroy),
            other => Err(ProtocolError::UnknownAction(other)),
        }
    }
}

/// One entity's entry in a snapshot.
///
/// Groups absent from `dirty` hold default values after decoding; receivers
/// must consult the mask before trusting them.
#[derive(Clone, Debug, PartialEq)]
pub struct EntityRecord {
    /// Entity identifier.
    pub network_id: NetworkId,
    /// Class tag.
    pub class_type: ClassType,
    /// Create / Update / Destroy.
    pub action: ReplicationAction,
    /// Whether the entity is active. Always false on Destroy records.
    pub active: bool,
    /// Groups carried by this record.
    pub dirty: DirtyMask,
    /// Entity name. Only carried by Create records.
    pub name: String,
    /// World position.
    pub position: Position,
    /// World rotation.
    pub rotation: Rotation,
    /// Class-specific state.
    pub kind: EntityKind,
}

impl EntityRecord {
    /// A Destroy record for an entity of `class_type`.
    #[must_use]
    pub fn destroy(network_id: NetworkId, class_type: ClassType) -> Self {
        Self {
            network_id,
            class_type,
            action: ReplicationAction::Destroy,
            active: false,
            dirty: DirtyMask::NONE,
            name: String::new(),
            position: Position::default(),
            rotation: Rotation::default(),
            kind: EntityKind::default_for(class_type),
        }
    }

    /// Writes the record.
    ///
    /// # Errors
    ///
    /// Propagates writer overflow.
    pub fn encode(&self, writer: &mut BitWriter) -> Result<(), CodecError> {
        writer.write_u32(self.network_id.0)?;
        writer.write_bits(u32::from(self.class_type as u8), ClassType::BITS)?;
        writer.write_bits(u32::from(self.action as u8), ReplicationAction::BITS)?;

        if self.action == ReplicationAction::Destroy {
            return Ok(());
        }

        writer.write_bool(self.active)?;
        writer.write_bits(u32::from(self.dirty.bits()), DirtyMask::BITS)?;

        if self.action == ReplicationAction::Create {
            writer.write_string(&self.name)?;
        }
        if self.dirty.contains(DirtyMask::POSITION) {
            writer.write_f32(self.position.x)?;
            writer.write_f32(self.position.y)?;
            writer.write_f32(self.position.z)?;
        }
        if self.dirty.contains(DirtyMask::ROTATION) {
            writer.write_f32(self.rotation.pitch)?;
            writer.write_f32(self.rotation.yaw)?;
            writer.write_f32(self.rotation.roll)?;
        }
        if self.dirty.contains(DirtyMask::STATE) {
            self.kind.encode(writer)?;
        }
        Ok(())
    }

    /// Reads one record.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::UnknownClass`] / [`ProtocolError::UnknownAction`] for
    /// bad tags, [`ProtocolError::Codec`] for truncated input.
    #[allow(clippy::cast_possible_truncation)]
    pub fn decode(reader: &mut BitReader<'_>) -> Result<Self, ProtocolError> {
        let network_id = NetworkId(reader.read_u32()?);
        let class_type = ClassType::try_from(reader.read_bits(ClassType::BITS)? as u8)?;
        let action = ReplicationAction::try_from(reader.read_bits(ReplicationAction::BITS)? as u8)?;

        if action == ReplicationAction::Destroy {
            return Ok(Self::destroy(network_id, class_type));
        }

        let active = reader.read_bool()?;
        let dirty = DirtyMask::from_bits_truncate(reader.read_bits(DirtyMask::BITS)? as u8);

        let name = if action == ReplicationAction::Create {
            reader.read_string()?
        } else {
            String::new()
        };

        let position = if dirty.contains(DirtyMask::POSITION) {
            Position::new(reader.read_f32()?, reader.read_f32()?, reader.read_f32()?)
        } else {
            Position::default()
        };
        let rotation = if dirty.contains(DirtyMask::ROTATION) {
            Rotation::new(reader.read_f32()?, reader.read_f32()?, reader.read_f32()?)
        } else {
            Rotation::default()
        };
        let kind = if dirty.contains(DirtyMask::STATE) {
            EntityKind::decode(class_type, reader)?
        } else {
            EntityKind::default_for(class_type)
        };

        Ok(Self {
            network_id,
            class_type,
            action,
            active,
            dirty,
            name,
            position,
            rotation,
            kind,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replication::kind::TankState;

    fn tank_record(action: ReplicationAction, dirty: DirtyMask) -> EntityRecord {
        EntityRecord {
            network_id: NetworkId(3),
            class_type: ClassType::Tank,
            action,
            active: true,
            dirty,
            name: if action == ReplicationAction::Create {
                "Alice".to_owned()
            } else {
                String::new()
            },
            position: if dirty.contains(DirtyMask::POSITION) {
                Position::new(1.0, 2.0, 3.0)
            } else {
                Position::default()
            },
            rotation: Rotation::default(),
            kind: EntityKind::Tank(TankState::default()),
        }
    }

    #[test]
    fn destroy_record_is_42_bits() {
        let mut writer = BitWriter::with_capacity(16);
        EntityRecord::destroy(NetworkId(9), ClassType::Prop)
            .encode(&mut writer)
            .unwrap();
        assert_eq!(writer.bit_len(), 32 + 8 + 2);
    }

    #[test]
    fn update_carries_only_dirty_groups() {
        let record = tank_record(ReplicationAction::Update, DirtyMask::POSITION);

        let mut writer = BitWriter::with_capacity(64);
        record.encode(&mut writer).unwrap();
        assert_eq!(writer.bit_len(), 32 + 8 + 2 + 1 + 3 + 96);

        let mut reader = BitReader::with_bit_len(writer.as_bytes(), writer.bit_len());
        assert_eq!(EntityRecord::decode(&mut reader).unwrap(), record);
    }

    #[test]
    fn create_record_round_trips() {
        let record = tank_record(ReplicationAction::Create, DirtyMask::ALL);

        let mut writer = BitWriter::with_capacity(128);
        record.encode(&mut writer).unwrap();

        let mut reader = BitReader::new(writer.as_bytes());
        assert_eq!(EntityRecord::decode(&mut reader).unwrap(), record);
    }

    #[test]
    fn unknown_action_is_a_protocol_error() {
        let mut writer = BitWriter::with_capacity(8);
        writer.write_u32(1).unwrap();
        writer.write_bits(0, 8).unwrap();
        writer.write_bits(3, 2).unwrap();

        let mut reader = BitReader::new(writer.as_bytes());
        assert_eq!(
            EntityRecord::decode(&mut reader),
            Err(ProtocolError::UnknownAction(3))
        );
    }

    #[test]
    fn dirty_mask_ops() {
        let mut mask = DirtyMask::NONE;
        assert!(mask.is_empty());
        mask.insert(DirtyMask::ROTATION);
        assert!(mask.contains(DirtyMask::ROTATION));
        assert!(!mask.contains(DirtyMask::POSITION));
        assert_eq!(DirtyMask::POSITION | DirtyMask::ROTATION | DirtyMask::STATE, DirtyMask::ALL);
        assert_eq!(DirtyMask::from_bits_truncate(0xFF), DirtyMask::ALL);
    }
}
