//! Bit-field access over a decrypted notification.
//!
//! Bits are numbered MSB-first across the whole buffer, so bit 0 is the top
//! bit of byte 0. Fields of up to 8 bits are plain bit slices; 16 and 32 bit
//! fields are assembled from consecutive (possibly unaligned) bytes in the
//! requested byte order.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BitReaderError {
    #[error("unsupported bit word width: {0}")]
    UnsupportedWidth(usize),
    #[error("bit range {start}..{end} exceeds message of {len} bytes")]
    OutOfBounds { start: usize, end: usize, len: usize },
}

#[derive(Debug, Clone, Copy)]
pub struct BitReader<'a> {
    bytes: &'a [u8],
}

impl<'a> BitReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    pub fn len_bits(&self) -> usize {
        self.bytes.len() * 8
    }

    pub fn get_bit_word(
        &self,
        start_bit: usize,
        length_bits: usize,
        little_endian: bool,
    ) -> Result<u32, BitReaderError> {
        match length_bits {
            1..=8 => self.slice(start_bit, length_bits),
            16 => {
                let bytes = [self.byte_at(start_bit)?, self.byte_at(start_bit + 8)?];
                Ok(u32::from(if little_endian {
                    u16::from_le_bytes(bytes)
                } else {
                    u16::from_be_bytes(bytes)
                }))
            }
            32 => {
                let bytes = [
                    self.byte_at(start_bit)?,
                    self.byte_at(start_bit + 8)?,
                    self.byte_at(start_bit + 16)?,
                    self.byte_at(start_bit + 24)?,
                ];
                Ok(if little_endian {
                    u32::from_le_bytes(bytes)
                } else {
                    u32::from_be_bytes(bytes)
                })
            }
            other => Err(BitReaderError::UnsupportedWidth(other)),
        }
    }

    /// Shorthand for big-endian / sub-byte fields
    pub fn bits(&self, start_bit: usize, length_bits: usize) -> Result<u32, BitReaderError> {
        self.get_bit_word(start_bit, length_bits, false)
    }

    fn byte_at(&self, start_bit: usize) -> Result<u8, BitReaderError> {
        // Bounded to 8 bits, always fits
        self.slice(start_bit, 8).map(|v| v as u8)
    }

    fn slice(&self, start_bit: usize, length_bits: usize) -> Result<u32, BitReaderError> {
        let end = start_bit + length_bits;
        if end > self.len_bits() {
            return Err(BitReaderError::OutOfBounds {
                start: start_bit,
                end,
                len: self.bytes.len(),
            });
        }
        Ok((start_bit..end).fold(0u32, |acc, bit| {
            let byte = self.bytes[bit / 8];
            (acc << 1) | u32::from((byte >> (7 - bit % 8)) & 1)
        }))
    }
}
