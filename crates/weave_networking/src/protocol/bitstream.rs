//! # Bit Stream
//!
//! Bit-granular write and read cursors over a byte buffer.
//!
//! ## Layout
//!
//! Values are written least significant bit first. Bit `n` of the stream is
//! bit `n % 8` of byte `n / 8`. Every multi-bit value goes out LSB first, so a
//! 3-bit field followed by a 5-bit field fills exactly one byte with the
//! first field in the low bits.
//!
//! The format is positional: nothing on the wire says what a field is. The
//! reader must issue the same sequence of typed calls, with the same widths,
//! as the writer. Only strings carry a length prefix.
//!
//! ## Failure
//!
//! A [`BitWriter`] has a fixed capacity chosen at construction. A write that
//! does not fit returns [`CodecError::Overflow`] and leaves the cursor where it
//! was; the caller abandons the packet. A [`BitReader`] never reads past the
//! bits it was given and reports [`CodecError::OutOfBounds`] instead.

use super::error::CodecError;

/// Widest value a single `write_bits` / `read_bits` call handles.
pub const MAX_BITS_PER_CALL: u8 = 32;

#[inline]
fn check_width(bits: u8) -> Result<(), CodecError> {
    if bits == 0 || bits > MAX_BITS_PER_CALL {
        return Err(CodecError::InvalidWidth(bits));
    }
    Ok(())
}

#[inline]
const fn mask(bits: u8) -> u32 {
    if bits >= 32 {
        u32::MAX
    } else {
        (1u32 << bits) - 1
    }
}

/// Outbound bit stream with a fixed byte capacity.
///
/// The buffer is allocated once. [`BitWriter::reset`] rewinds it for reuse.
#[derive(Clone, Debug)]
pub struct BitWriter {
    buffer: Box<[u8]>,
    bit_position: usize,
}

impl BitWriter {
    /// Creates an empty writer that can hold `capacity_bytes` bytes.
    #[must_use]
    pub fn with_capacity(capacity_bytes: usize) -> Self {
        Self {
            buffer: vec![0u8; capacity_bytes].into_boxed_slice(),
            bit_position: 0,
        }
    }

    /// Rewinds the writer and zeroes the written bytes.
    pub fn reset(&mut self) {
        let used = self.byte_len();
        self.buffer[..used].fill(0);
        self.bit_position = 0;
    }

    /// Bits written so far.
    #[inline]
    #[must_use]
    pub const fn bit_len(&self) -> usize {
        self.bit_position
    }

    /// Bytes written so far, rounded up.
    #[inline]
    #[must_use]
    pub const fn byte_len(&self) -> usize {
        (self.bit_position + 7) / 8
    }

    /// Total capacity in bits.
    #[inline]
    #[must_use]
    pub fn capacity_bits(&self) -> usize {
        self.buffer.len() * 8
    }

    /// Bits that can still be written.
    #[inline]
    #[must_use]
    pub fn remaining_bits(&self) -> usize {
        self.capacity_bits() - self.bit_position
    }

    /// Returns true if nothing has been written.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.bit_position == 0
    }

    /// The written bytes. Unused high bits of the last byte are zero.
    #[inline]
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer[..self.byte_len()]
    }

    #[inline]
    fn reserve(&self, requested: usize) -> Result<(), CodecError> {
        if requested > self.remaining_bits() {
            return Err(CodecError::Overflow {
                requested,
                remaining: self.remaining_bits(),
            });
        }
        Ok(())
    }

    /// Writes the low `bits` bits of `value`.
    ///
    /// # Errors
    ///
    /// [`CodecError::InvalidWidth`] if `bits` is not in `1..=32`,
    /// [`CodecError::Overflow`] if the bits do not fit.
    pub fn write_bits(&mut self, value: u32, bits: u8) -> Result<(), CodecError> {
        check_width(bits)?;
        self.reserve(usize::from(bits))?;

        let value = value & mask(bits);
        for i in 0..bits {
            if (value >> i) & 1 == 1 {
                let byte_idx = self.bit_position / 8;
                let bit_idx = self.bit_position % 8;
                self.buffer[byte_idx] |= 1 << bit_idx;
            }
            self.bit_position += 1;
        }

        Ok(())
    }

    /// Writes a single bit.
    ///
    /// # Errors
    ///
    /// [`CodecError::Overflow`] if the buffer is full.
    #[inline]
    pub fn write_bool(&mut self, value: bool) -> Result<(), CodecError> {
        self.write_bits(u32::from(value), 1)
    }

    /// Writes 8 bits.
    ///
    /// # Errors
    ///
    /// [`CodecError::Overflow`] if the value does not fit.
    #[inline]
    pub fn write_u8(&mut self, value: u8) -> Result<(), CodecError> {
        self.write_bits(u32::from(value), 8)
    }

    /// Writes 16 bits.
    ///
    /// # Errors
    ///
    /// [`CodecError::Overflow`] if the value does not fit.
    #[inline]
    pub fn write_u16(&mut self, value: u16) -> Result<(), CodecError> {
        self.write_bits(u32::from(value), 16)
    }

    /// Writes 32 bits.
    ///
    /// # Errors
    ///
    /// [`CodecError::Overflow`] if the value does not fit.
    #[inline]
    pub fn write_u32(&mut self, value: u32) -> Result<(), CodecError> {
        self.write_bits(value, 32)
    }

    /// Writes a two's complement `i8`.
    ///
    /// # Errors
    ///
    /// [`CodecError::Overflow`] if the value does not fit.
    #[inline]
    #[allow(clippy::cast_sign_loss)]
    pub fn write_i8(&mut self, value: i8) -> Result<(), CodecError> {
        self.write_u8(value as u8)
    }

    /// Writes a two's complement `i16`.
    ///
    /// # Errors
    ///
    /// [`CodecError::Overflow`] if the value does not fit.
    #[inline]
    #[allow(clippy::cast_sign_loss)]
    pub fn write_i16(&mut self, value: i16) -> Result<(), CodecError> {
        self.write_u16(value as u16)
    }

    /// Writes a two's complement `i32`.
    ///
    /// # Errors
    ///
    /// [`CodecError::Overflow`] if the value does not fit.
    #[inline]
    #[allow(clippy::cast_sign_loss)]
    pub fn write_i32(&mut self, value: i32) -> Result<(), CodecError> {
        self.write_u32(value as u32)
    }

    /// Writes the IEEE-754 bits of `value`.
    ///
    /// # Errors
    ///
    /// [`CodecError::Overflow`] if the value does not fit.
    #[inline]
    pub fn write_f32(&mut self, value: f32) -> Result<(), CodecError> {
        self.write_u32(value.to_bits())
    }

    /// Writes a float clamped to `[min, max]` using `bits` bits.
    ///
    /// Decoding with the same range and width reproduces the value to within
    /// `(max - min) / (2^bits - 1)`.
    ///
    /// # Errors
    ///
    /// [`CodecError::InvalidWidth`] or [`CodecError::Overflow`], as for
    /// [`BitWriter::write_bits`].
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn write_quantized_f32(
        &mut self,
        value: f32,
        min: f32,
        max: f32,
        bits: u8,
    ) -> Result<(), CodecError> {
        check_width(bits)?;
        let range = max - min;
        let normalized = if range > 0.0 {
            ((value - min) / range).clamp(0.0, 1.0)
        } else {
            0.0
        };
        let steps = mask(bits) as f32;
        let quantized = (normalized * steps).round() as u32;
        self.write_bits(quantized, bits)
    }

    /// Writes a 32-bit byte length followed by the UTF-8 bytes. No terminator.
    ///
    /// The whole string is checked against the remaining capacity before
    /// anything is written.
    ///
    /// # Errors
    ///
    /// [`CodecError::StringTooLong`] if the length does not fit in 32 bits,
    /// [`CodecError::Overflow`] if the string does not fit the buffer.
    pub fn write_string(&mut self, value: &str) -> Result<(), CodecError> {
        let bytes = value.as_bytes();
        let len = u32::try_from(bytes.len()).map_err(|_| CodecError::StringTooLong(bytes.len()))?;
        self.reserve(32 + bytes.len() * 8)?;

        self.write_u32(len)?;
        for &byte in bytes {
            self.write_u8(byte)?;
        }
        Ok(())
    }
}

/// Inbound bit stream over a received buffer.
#[derive(Clone, Debug)]
pub struct BitReader<'a> {
    buffer: &'a [u8],
    bit_len: usize,
    position: usize,
}

impl<'a> BitReader<'a> {
    /// Reads every bit of `buffer`.
    #[must_use]
    pub fn new(buffer: &'a [u8]) -> Self {
        Self {
            buffer,
            bit_len: buffer.len() * 8,
            position: 0,
        }
    }

    /// Reads only the first `bit_len` bits of `buffer`.
    ///
    /// `bit_len` is clamped to the buffer's size.
    #[must_use]
    pub fn with_bit_len(buffer: &'a [u8], bit_len: usize) -> Self {
        Self {
            buffer,
            bit_len: bit_len.min(buffer.len() * 8),
            position: 0,
        }
    }

    /// Bits consumed so far.
    #[inline]
    #[must_use]
    pub const fn position(&self) -> usize {
        self.position
    }

    /// Bits left to read.
    #[inline]
    #[must_use]
    pub const fn remaining_bits(&self) -> usize {
        self.bit_len - self.position
    }

    #[inline]
    fn require(&self, requested: usize) -> Result<(), CodecError> {
        if requested > self.remaining_bits() {
            return Err(CodecError::OutOfBounds {
                requested,
                remaining: self.remaining_bits(),
            });
        }
        Ok(())
    }

    /// Reads `bits` bits into the low bits of a `u32`.
    ///
    /// # Errors
    ///
    /// [`CodecError::InvalidWidth`] if `bits` is not in `1..=32`,
    /// [`CodecError::OutOfBounds`] if fewer than `bits` bits remain.
    pub fn read_bits(&mut self, bits: u8) -> Result<u32, CodecError> {
        check_width(bits)?;
        self.require(usize::from(bits))?;

        let mut value = 0u32;
        for i in 0..bits {
            let byte = self.buffer[self.position / 8];
            let bit = (byte >> (self.position % 8)) & 1;
            value |= u32::from(bit) << i;
            self.position += 1;
        }
        Ok(value)
    }

    /// Reads a single bit.
    ///
    /// # Errors
    ///
    /// [`CodecError::OutOfBounds`] at the end of the stream.
    #[inline]
    pub fn read_bool(&mut self) -> Result<bool, CodecError> {
        Ok(self.read_bits(1)? == 1)
    }

    /// Reads 8 bits.
    ///
    /// # Errors
    ///
    /// [`CodecError::OutOfBounds`] if fewer than 8 bits remain.
    #[inline]
    #[allow(clippy::cast_possible_truncation)]
    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.read_bits(8)? as u8)
    }

    /// Reads 16 bits.
    ///
    /// # Errors
    ///
    /// [`CodecError::OutOfBounds`] if fewer than 16 bits remain.
    #[inline]
    #[allow(clippy::cast_possible_truncation)]
    pub fn read_u16(&mut self) -> Result<u16, CodecError> {
        Ok(self.read_bits(16)? as u16)
    }

    /// Reads 32 bits.
    ///
    /// # Errors
    ///
    /// [`CodecError::OutOfBounds`] if fewer than 32 bits remain.
    #[inline]
    pub fn read_u32(&mut self) -> Result<u32, CodecError> {
        self.read_bits(32)
    }

    /// Reads a two's complement `i8`.
    ///
    /// # Errors
    ///
    /// [`CodecError::OutOfBounds`] if fewer than 8 bits remain.
    #[inline]
    #[allow(clippy::cast_possible_wrap)]
    pub fn read_i8(&mut self) -> Result<i8, CodecError> {
        Ok(self.read_u8()? as i8)
    }

    /// Reads a two's complement `i16`.
    ///
    /// # Errors
    ///
    /// [`CodecError::OutOfBounds`] if fewer than 16 bits remain.
    #[inline]
    #[allow(clippy::cast_possible_wrap)]
    pub fn read_i16(&mut self) -> Result<i16, CodecError> {
        Ok(self.read_u16()? as i16)
    }

    /// Reads a two's complement `i32`.
    ///
    /// # Errors
    ///
    /// [`CodecError::OutOfBounds`] if fewer than 32 bits remain.
    #[inline]
    #[allow(clippy::cast_possible_wrap)]
    pub fn read_i32(&mut self) -> Result<i32, CodecError> {
        Ok(self.read_u32()? as i32)
    }

    /// Reads an IEEE-754 `f32`.
    ///
    /// # Errors
    ///
    /// [`CodecError::OutOfBounds`] if fewer than 32 bits remain.
    #[inline]
    pub fn read_f32(&mut self) -> Result<f32, CodecError> {
        Ok(f32::from_bits(self.read_u32()?))
    }

    /// Reads a float written by [`BitWriter::write_quantized_f32`] with the
    /// same range and width.
    ///
    /// # Errors
    ///
    /// [`CodecError::InvalidWidth`] or [`CodecError::OutOfBounds`].
    #[allow(clippy::cast_precision_loss)]
    pub fn read_quantized_f32(&mut self, min: f32, max: f32, bits: u8) -> Result<f32, CodecError> {
        let quantized = self.read_bits(bits)?;
        let normalized = quantized as f32 / mask(bits) as f32;
        Ok(min + normalized * (max - min))
    }

    /// Reads a string written by [`BitWriter::write_string`].
    ///
    /// The length prefix is checked against the remaining bits before any
    /// allocation, so a hostile length cannot force a large buffer. On error
    /// the cursor is left where it was, length prefix included.
    ///
    /// # Errors
    ///
    /// [`CodecError::OutOfBounds`] if the prefix or the bytes run past the
    /// end, [`CodecError::InvalidUtf8`] if the bytes are not UTF-8.
    pub fn read_string(&mut self) -> Result<String, CodecError> {
        let start = self.position;
        let result = self.read_string_body();
        if result.is_err() {
            self.position = start;
        }
        result
    }

    fn read_string_body(&mut self) -> Result<String, CodecError> {
        let len = self.read_u32()? as usize;
        self.require(len.saturating_mul(8))?;

        let mut bytes = Vec::with_capacity(len);
        for _ in 0..len {
            bytes.push(self.read_u8()?);
        }
        String::from_utf8(bytes).map_err(|_| CodecError::InvalidUtf8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fields_pack_lsb_first() {
        let mut writer = BitWriter::with_capacity(4);
        writer.write_bits(0b101, 3).unwrap();
        writer.write_bits(0b11110, 5).unwrap();

        assert_eq!(writer.byte_len(), 1);
        assert_eq!(writer.as_bytes(), &[0b1111_0101]);
    }

    #[test]
    fn mixed_sequence_round_trips() {
        let mut writer = BitWriter::with_capacity(64);
        writer.write_bool(true).unwrap();
        writer.write_u8(200).unwrap();
        writer.write_bits(5, 3).unwrap();
        writer.write_i16(-1234).unwrap();
        writer.write_u32(0xDEAD_BEEF).unwrap();
        writer.write_f32(-3.25).unwrap();
        writer.write_string("héllo").unwrap();
        writer.write_i32(i32::MIN).unwrap();
        writer.write_i8(-7).unwrap();
        writer.write_u16(65_535).unwrap();

        let mut reader = BitReader::with_bit_len(writer.as_bytes(), writer.bit_len());
        assert!(reader.read_bool().unwrap());
        assert_eq!(reader.read_u8().unwrap(), 200);
        assert_eq!(reader.read_bits(3).unwrap(), 5);
        assert_eq!(reader.read_i16().unwrap(), -1234);
        assert_eq!(reader.read_u32().unwrap(), 0xDEAD_BEEF);
        assert_eq!(reader.read_f32().unwrap().to_bits(), (-3.25f32).to_bits());
        assert_eq!(reader.read_string().unwrap(), "héllo");
        assert_eq!(reader.read_i32().unwrap(), i32::MIN);
        assert_eq!(reader.read_i8().unwrap(), -7);
        assert_eq!(reader.read_u16().unwrap(), 65_535);
        assert_eq!(reader.remaining_bits(), 0);
    }

    #[test]
    fn write_bits_masks_high_bits() {
        let mut writer = BitWriter::with_capacity(1);
        writer.write_bits(0xFF, 4).unwrap();
        writer.write_bits(0, 4).unwrap();
        assert_eq!(writer.as_bytes(), &[0x0F]);
    }

    #[test]
    fn quantized_float_within_one_step() {
        let mut writer = BitWriter::with_capacity(8);
        writer.write_quantized_f32(42.5, -100.0, 100.0, 16).unwrap();
        assert_eq!(writer.byte_len(), 2);

        let mut reader = BitReader::new(writer.as_bytes());
        let value = reader.read_quantized_f32(-100.0, 100.0, 16).unwrap();
        let step = 200.0 / 65_535.0;
        assert!((value - 42.5).abs() <= step);
    }

    #[test]
    fn quantized_float_clamps() {
        let mut writer = BitWriter::with_capacity(2);
        writer.write_quantized_f32(9.0, -1.0, 1.0, 8).unwrap();

        let mut reader = BitReader::new(writer.as_bytes());
        assert!((reader.read_quantized_f32(-1.0, 1.0, 8).unwrap() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn read_past_end_is_out_of_bounds() {
        let mut writer = BitWriter::with_capacity(4);
        writer.write_bits(3, 5).unwrap();

        let mut reader = BitReader::with_bit_len(writer.as_bytes(), writer.bit_len());
        assert_eq!(
            reader.read_u8(),
            Err(CodecError::OutOfBounds {
                requested: 8,
                remaining: 5
            })
        );
        // A failed read consumes nothing.
        assert_eq!(reader.read_bits(5).unwrap(), 3);
    }

    #[test]
    fn write_past_capacity_is_overflow() {
        let mut writer = BitWriter::with_capacity(1);
        writer.write_bits(0, 6).unwrap();

        assert_eq!(
            writer.write_u8(1),
            Err(CodecError::Overflow {
                requested: 8,
                remaining: 2
            })
        );
        assert_eq!(writer.bit_len(), 6);
    }

    #[test]
    fn invalid_widths_are_rejected() {
        let mut writer = BitWriter::with_capacity(8);
        assert_eq!(writer.write_bits(1, 0), Err(CodecError::InvalidWidth(0)));
        assert_eq!(writer.write_bits(1, 33), Err(CodecError::InvalidWidth(33)));

        let mut reader = BitReader::new(&[0xFF; 8]);
        assert_eq!(reader.read_bits(40), Err(CodecError::InvalidWidth(40)));
    }

    #[test]
    fn hostile_string_length_is_rejected_without_allocating() {
        let mut writer = BitWriter::with_capacity(8);
        writer.write_u32(u32::MAX).unwrap();
        writer.write_u8(b'a').unwrap();

        let mut reader = BitReader::new(writer.as_bytes());
        assert!(matches!(
            reader.read_string(),
            Err(CodecError::OutOfBounds { .. })
        ));
        assert_eq!(reader.position(), 0);
        assert_eq!(reader.read_u32().unwrap(), u32::MAX);
    }

    #[test]
    fn string_that_does_not_fit_leaves_writer_untouched() {
        let mut writer = BitWriter::with_capacity(6);
        assert!(matches!(
            writer.write_string("too long"),
            Err(CodecError::Overflow { .. })
        ));
        assert!(writer.is_empty());
    }

    #[test]
    fn invalid_utf8_is_reported() {
        let mut writer = BitWriter::with_capacity(8);
        writer.write_u32(2).unwrap();
        writer.write_u8(0xC3).unwrap();
        writer.write_u8(0x28).unwrap();

        let mut reader = BitReader::new(writer.as_bytes());
        assert_eq!(reader.read_string(), Err(CodecError::InvalidUtf8));
        assert_eq!(reader.position(), 0);
    }

    #[test]
    fn reset_allows_reuse() {
        let mut writer = BitWriter::with_capacity(2);
        writer.write_u16(0xFFFF).unwrap();
        writer.reset();
        writer.write_bits(1, 1).unwrap();
        assert_eq!(writer.as_bytes(), &[0x01]);
    }
}
