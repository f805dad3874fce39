//! # Entity Kinds
//!
//! Every replicated entity carries a class tag on the wire and a
//! class-specific state payload. The payload is only written when the
//! entity's STATE group is dirty.
//!
//! | Tag | Class | Payload |
//! |-----|-------|---------|
//! | 0 | Tank | turret yaw (f32), health (8 bits) |
//! | 1 | Projectile | owner network ID (32 bits), speed (f32) |
//! | 2 | Prop | none |

use crate::protocol::{BitReader, BitWriter, CodecError, ProtocolError};

use super::record::NetworkId;

/// Wire tag identifying an entity's class.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ClassType {
    /// Player-controlled tank.
    Tank = 0,
    /// Fired shell.
    Projectile = 1,
    /// Static scenery.
    Prop = 2,
}

impl ClassType {
    /// Width of the class tag on the wire.
    pub const BITS: u8 = 8;
}

impl TryFrom<u8> for ClassType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Tank),
            1 => Ok(Self::Projectile),
            2 => Ok(Self::Prop),
            other => Err(ProtocolError::UnknownClass(other)),
        }
    }
}

/// Class-specific state that knows how to put itself on the wire.
pub trait Replicate: Sized {
    /// Class tag written ahead of this payload.
    const CLASS: ClassType;

    /// Writes the payload.
    ///
    /// # Errors
    ///
    /// Propagates writer overflow.
    fn encode(&self, writer: &mut BitWriter) -> Result<(), CodecError>;

    /// Reads a payload written by [`Replicate::encode`].
    ///
    /// # Errors
    ///
    /// Propagates reader bounds errors.
    fn decode(reader: &mut BitReader<'_>) -> Result<Self, CodecError>;
}

/// Replicated state of a tank.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TankState {
    /// Turret heading relative to the hull, in radians.
    pub turret_yaw: f32,
    /// Remaining hit points.
    pub health: u8,
}

impl TankState {
    /// Hit points of a freshly spawned tank.
    pub const FULL_HEALTH: u8 = 100;
}

impl Default for TankState {
    fn default() -> Self {
        Self {
            turret_yaw: 0.0,
            health: Self::FULL_HEALTH,
        }
    }
}

impl Replicate for TankState {
    const CLASS: ClassType = ClassType::Tank;

    fn encode(&self, writer: &mut BitWriter) -> Result<(), CodecError> {
        writer.write_f32(self.turret_yaw)?;
        writer.write_u8(self.health)
    }

    fn decode(reader: &mut BitReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            turret_yaw: reader.read_f32()?,
            health: reader.read_u8()?,
        })
    }
}

/// Replicated state of a projectile.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ProjectileState {
    /// Entity that fired it.
    pub owner: NetworkId,
    /// Speed along its heading, in units per second.
    pub speed: f32,
}

impl Replicate for ProjectileState {
    const CLASS: ClassType = ClassType::Projectile;

    fn encode(&self, writer: &mut BitWriter) -> Result<(), CodecError> {
        writer.write_u32(self.owner.0)?;
        writer.write_f32(self.speed)
    }

    fn decode(reader: &mut BitReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            owner: NetworkId(reader.read_u32()?),
            speed: reader.read_f32()?,
        })
    }
}

/// Class plus class-specific state of a replicated entity.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum EntityKind {
    /// A tank.
    Tank(TankState),
    /// A projectile.
    Projectile(ProjectileState),
    /// Scenery without extra state.
    Prop,
}

impl EntityKind {
    /// Class tag for this kind.
    #[must_use]
    pub const fn class_type(&self) -> ClassType {
        match self {
            Self::Tank(_) => TankState::CLASS,
            Self::Projectile(_) => ProjectileState::CLASS,
            Self::Prop => ClassType::Prop,
        }
    }

    /// Default state for `class`, used when a record arrives without a
    /// STATE group.
    #[must_use]
    pub fn default_for(class: ClassType) -> Self {
        match class {
            ClassType::Tank => Self::Tank(TankState::default()),
            ClassType::Projectile => Self::Projectile(ProjectileState::default()),
            ClassType::Prop => Self::Prop,
        }
    }

    /// Writes the class payload.
    ///
    /// # Errors
    ///
    /// Propagates writer overflow.
    pub fn encode(&self, writer: &mut BitWriter) -> Result<(), CodecError> {
        match self {
            Self::Tank(state) => state.encode(writer),
            Self::Projectile(state) => state.encode(writer),
            Self::Prop => Ok(()),
        }
    }

    /// Reads the payload for `class`.
    ///
    /// # Errors
    ///
    /// Propagates reader bounds errors.
    pub fn decode(class: ClassType, reader: &mut BitReader<'_>) -> Result<Self, CodecError> {
        Ok(match class {
            ClassType::Tank => Self::Tank(TankState::decode(reader)?),
            ClassType::Projectile => Self::Projectile(ProjectileState::decode(reader)?),
            ClassType::Prop => Self::Prop,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_tags_match_wire_values() {
        assert_eq!(ClassType::Tank as u8, 0);
        assert_eq!(ClassType::Projectile as u8, 1);
        assert_eq!(ClassType::Prop as u8, 2);
        assert_eq!(ClassType::try_from(1).unwrap(), ClassType::Projectile);
        assert_eq!(ClassType::try_from(9), Err(ProtocolError::UnknownClass(9)));
    }

    #[test]
    fn payload_decodes_with_its_class() {
        let kind = EntityKind::Projectile(ProjectileState {
            owner: NetworkId(12),
            speed: 40.0,
        });

        let mut writer = BitWriter::with_capacity(16);
        kind.encode(&mut writer).unwrap();

        let mut reader = BitReader::new(writer.as_bytes());
        let decoded = EntityKind::decode(kind.class_type(), &mut reader).unwrap();
        assert_eq!(decoded, kind);
    }

    #[test]
    fn prop_has_no_payload() {
        let mut writer = BitWriter::with_capacity(4);
        EntityKind::Prop.encode(&mut writer).unwrap();
        assert!(writer.is_empty());
    }
}
