//! # Packet Definitions
//!
//! Every datagram starts with a 32-bit [`PacketTag`] followed by a
//! tag-specific payload.
//!
//! ```text
//! Hello   (0)  name: string
//! Welcome (1)  player_id: u32
//! State   (2)  count: u32, then `count` entity records
//! Input   (3)  sequence: u32, forward: i8, turn: i8,
//!              turret_yaw: 16-bit quantized, buttons: u8
//! ```

use std::f32::consts::PI;

use crate::replication::EntityRecord;
use crate::MAX_NAME_LEN;

use super::bitstream::{BitReader, BitWriter};
use super::error::{CodecError, ProtocolError};

/// Identifier of a connected player, assigned by the server's Welcome.
pub type PlayerId = u32;

/// Cuts `name` to at most [`MAX_NAME_LEN`] bytes on a char boundary.
#[must_use]
pub fn clamp_name(name: &str) -> &str {
    if name.len() <= MAX_NAME_LEN {
        return name;
    }
    let mut end = MAX_NAME_LEN;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    &name[..end]
}

/// Leading tag of every packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum PacketTag {
    /// Client asks to join.
    Hello = 0,
    /// Server assigns a player ID.
    Welcome = 1,
    /// Server world snapshot.
    State = 2,
    /// Client input.
    Input = 3,
}

impl TryFrom<u32> for PacketTag {
    type Error = ProtocolError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Hello),
            1 => Ok(Self::Welcome),
            2 => Ok(Self::State),
            3 => Ok(Self::Input),
            other => Err(ProtocolError::UnknownTag(other)),
        }
    }
}

/// Sampled player controls.
///
/// Stick axes travel as signed 8-bit values scaled by 127, so zero and the
/// extremes survive the trip exactly. Turret yaw is quantized to 16 bits over
/// `[-PI, PI]`.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct InputState {
    /// Increases with every Input packet a client sends.
    pub sequence: u32,
    /// Throttle in `[-1, 1]`.
    pub forward: f32,
    /// Hull turn in `[-1, 1]`, positive is clockwise.
    pub turn: f32,
    /// Turret heading relative to the hull, in radians.
    pub turret_yaw: f32,
    /// Button bitfield.
    pub buttons: u8,
}

impl InputState {
    /// Fire the main gun.
    pub const FIRE: u8 = 1 << 0;
    /// Speed boost.
    pub const BOOST: u8 = 1 << 1;

    const AXIS_SCALE: f32 = 127.0;
    const TURRET_BITS: u8 = 16;

    /// Returns true if every button in `mask` is held.
    #[inline]
    #[must_use]
    pub const fn is_pressed(&self, mask: u8) -> bool {
        self.buttons & mask == mask
    }

    /// Presses or releases the buttons in `mask`.
    #[inline]
    pub fn set_button(&mut self, mask: u8, pressed: bool) {
        if pressed {
            self.buttons |= mask;
        } else {
            self.buttons &= !mask;
        }
    }

    /// Returns true if no axis is deflected and no button is held.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.forward == 0.0 && self.turn == 0.0 && self.buttons == 0
    }

    #[allow(clippy::cast_possible_truncation)]
    fn axis_to_wire(value: f32) -> i8 {
        (value.clamp(-1.0, 1.0) * Self::AXIS_SCALE).round() as i8
    }

    fn axis_from_wire(value: i8) -> f32 {
        (f32::from(value) / Self::AXIS_SCALE).clamp(-1.0, 1.0)
    }

    fn wrap_angle(angle: f32) -> f32 {
        if (-PI..=PI).contains(&angle) {
            angle
        } else {
            (angle + PI).rem_euclid(2.0 * PI) - PI
        }
    }

    /// Writes the payload (without tag).
    ///
    /// # Errors
    ///
    /// Propagates writer overflow.
    pub fn encode(&self, writer: &mut BitWriter) -> Result<(), CodecError> {
        writer.write_u32(self.sequence)?;
        writer.write_i8(Self::axis_to_wire(self.forward))?;
        writer.write_i8(Self::axis_to_wire(self.turn))?;
        writer.write_quantized_f32(Self::wrap_angle(self.turret_yaw), -PI, PI, Self::TURRET_BITS)?;
        writer.write_u8(self.buttons)
    }

    /// Reads a payload written by [`InputState::encode`].
    ///
    /// # Errors
    ///
    /// Propagates reader bounds errors.
    pub fn decode(reader: &mut BitReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            sequence: reader.read_u32()?,
            forward: Self::axis_from_wire(reader.read_i8()?),
            turn: Self::axis_from_wire(reader.read_i8()?),
            turret_yaw: reader.read_quantized_f32(-PI, PI, Self::TURRET_BITS)?,
            buttons: reader.read_u8()?,
        })
    }
}

/// Decoded State packet.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StateSnapshot {
    /// Records in wire order: in-use entities by slot, then Destroy notices.
    /// A snapshot split to fit its buffer puts Destroy notices first.
    pub records: Vec<EntityRecord>,
}

/// Upper bound on records reserved up front while decoding; the rest grow on
/// demand so a forged count cannot force a large allocation.
const RECORD_PREALLOC: usize = 64;

impl StateSnapshot {
    /// Writes the record count and every record (without tag).
    ///
    /// # Errors
    ///
    /// Propagates writer overflow.
    pub fn encode(&self, writer: &mut BitWriter) -> Result<(), CodecError> {
        let count = u32::try_from(self.records.len()).map_err(|_| CodecError::Overflow {
            requested: self.records.len(),
            remaining: u32::MAX as usize,
        })?;
        writer.write_u32(count)?;
        for record in &self.records {
            record.encode(writer)?;
        }
        Ok(())
    }

    /// Reads a payload written by [`StateSnapshot::encode`].
    ///
    /// # Errors
    ///
    /// Fails on the first malformed record.
    pub fn decode(reader: &mut BitReader<'_>) -> Result<Self, ProtocolError> {
        let count = reader.read_u32()? as usize;
        let mut records = Vec::with_capacity(count.min(RECORD_PREALLOC));
        for _ in 0..count {
            records.push(EntityRecord::decode(reader)?);
        }
        Ok(Self { records })
    }
}

/// A decoded packet.
#[derive(Clone, Debug, PartialEq)]
pub enum Packet {
    /// Client join request.
    Hello {
        /// Display name of the player.
        name: String,
    },
    /// Join accepted.
    Welcome {
        /// Player ID assigned by the server.
        player_id: PlayerId,
    },
    /// World snapshot.
    State(StateSnapshot),
    /// Player controls.
    Input(InputState),
}

impl Packet {
    /// Tag written ahead of this packet's payload.
    #[must_use]
    pub const fn tag(&self) -> PacketTag {
        match self {
            Self::Hello { .. } => PacketTag::Hello,
            Self::Welcome { .. } => PacketTag::Welcome,
            Self::State(_) => PacketTag::State,
            Self::Input(_) => PacketTag::Input,
        }
    }

    /// Appends tag and payload to `writer`.
    ///
    /// # Errors
    ///
    /// Propagates writer overflow.
    pub fn encode(&self, writer: &mut BitWriter) -> Result<(), CodecError> {
        writer.write_u32(self.tag() as u32)?;
        match self {
            Self::Hello { name } => writer.write_string(name),
            Self::Welcome { player_id } => writer.write_u32(*player_id),
            Self::State(snapshot) => snapshot.encode(writer),
            Self::Input(input) => input.encode(writer),
        }
    }

    /// Encodes into a fresh writer of `capacity` bytes.
    ///
    /// # Errors
    ///
    /// [`CodecError::Overflow`] if the packet is larger than `capacity`.
    pub fn to_writer(&self, capacity: usize) -> Result<BitWriter, CodecError> {
        let mut writer = BitWriter::with_capacity(capacity);
        self.encode(&mut writer)?;
        Ok(writer)
    }

    /// Decodes one packet from the front of `reader`.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::UnknownTag`] for an unknown tag,
    /// [`ProtocolError::NameTooLong`] for a Hello name over
    /// [`MAX_NAME_LEN`], otherwise whatever the payload decoder reports.
    pub fn decode(reader: &mut BitReader<'_>) -> Result<Self, ProtocolError> {
        let tag = PacketTag::try_from(reader.read_u32()?)?;
        Ok(match tag {
            PacketTag::Hello => {
                let name = reader.read_string()?;
                if name.len() > MAX_NAME_LEN {
                    return Err(ProtocolError::NameTooLong {
                        len: name.len(),
                        max: MAX_NAME_LEN,
                    });
                }
                Self::Hello { name }
            }
            PacketTag::Welcome => Self::Welcome {
                player_id: reader.read_u32()?,
            },
            PacketTag::State => Self::State(StateSnapshot::decode(reader)?),
            PacketTag::Input => Self::Input(InputState::decode(reader)?),
        })
    }

    /// Decodes a whole datagram.
    ///
    /// # Errors
    ///
    /// As for [`Packet::decode`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        Self::decode(&mut BitReader::new(bytes))
    }
}
