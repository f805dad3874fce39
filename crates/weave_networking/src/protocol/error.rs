//! Codec and protocol errors.

use thiserror::Error;

/// Bit-level encode/decode failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// A read asked for more bits than the buffer holds.
    #[error("read of {requested} bits exceeds the {remaining} bits left in the buffer")]
    OutOfBounds {
        /// Bits requested.
        requested: usize,
        /// Bits left to read.
        remaining: usize,
    },

    /// A write did not fit in the writer's capacity.
    #[error("write of {requested} bits exceeds the {remaining} bits of capacity left")]
    Overflow {
        /// Bits requested.
        requested: usize,
        /// Bits left to write.
        remaining: usize,
    },

    /// Bit width outside `1..=32`.
    #[error("bit width {0} is outside 1..=32")]
    InvalidWidth(u8),

    /// String bytes are not UTF-8.
    #[error("string payload is not valid UTF-8")]
    InvalidUtf8,

    /// String longer than a 32-bit length prefix can describe.
    #[error("string of {0} bytes does not fit a 32-bit length prefix")]
    StringTooLong(usize),
}

/// Packet-level failures. A packet that fails to decode is dropped; the
/// connection and every other packet are unaffected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Bit-level failure while decoding or encoding.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Packet tag outside the known set.
    #[error("unknown packet tag {0}")]
    UnknownTag(u32),

    /// Entity class tag outside the known set.
    #[error("unknown entity class {0}")]
    UnknownClass(u8),

    /// Replication action outside Create / Update / Destroy.
    #[error("unknown replication action {0}")]
    UnknownAction(u8),

    /// A Hello carried a name longer than [`crate::MAX_NAME_LEN`].
    #[error("name of {len} bytes exceeds the {max} byte limit")]
    NameTooLong {
        /// Bytes received.
        len: usize,
        /// Bytes allowed.
        max: usize,
    },

    /// A second Welcome named a different player ID.
    #[error("welcome for player {received} conflicts with assigned player {assigned}")]
    ConflictingWelcome {
        /// ID accepted from the first Welcome.
        assigned: u32,
        /// ID carried by the rejected Welcome.
        received: u32,
    },
}

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;
