//! # Network Protocol
//!
//! Bit-packed packet definitions.
//!
//! ## Packet Structure
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Tag (32 bits): Hello = 0, Welcome = 1, State = 2, Input = 3  │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Payload (positional, bit-granular, LSB-first)                │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design Philosophy
//!
//! - Every bit counts: fields are written at the width they need
//! - No self-description: reader and writer agree on field order
//! - A malformed packet is dropped, never half-applied

mod bitstream;
mod error;
mod packets;

pub use bitstream::{BitReader, BitWriter, MAX_BITS_PER_CALL};
pub use error::{CodecError, CodecResult, ProtocolError, ProtocolResult};
pub use packets::{clamp_name, InputState, Packet, PacketTag, PlayerId, StateSnapshot};
