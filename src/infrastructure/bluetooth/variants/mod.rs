//! Protocol Variants
//!
//! Each cube generation speaks its own binary dialect over the same event
//! model. A variant turns one decrypted notification into
//! generation-neutral [`DecodedMessage`]s and builds the plaintext command
//! buffers the firmware expects. Move ordering is not the variant's
//! concern; see [`crate::domain::sequencer`].

pub mod gen2;
pub mod gen3;
pub mod gen4;

use crate::domain::facelets::{self, FaceletError};
use crate::domain::models::{
    AngularVelocity, BatteryEvent, CubeCommand, Face, FaceletsEvent, GyroEvent, HardwareEvent,
    MoveEvent, Quaternion,
};
use crate::infrastructure::bluetooth::bit_reader::{BitReader, BitReaderError};
use crate::infrastructure::bluetooth::protocol::CubeGeneration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Malformed(#[from] BitReaderError),
    #[error("invalid cube state: {0}")]
    InvalidState(#[from] FaceletError),
}

/// One logical message extracted from a notification.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedMessage {
    /// Live move
    Move(MoveEvent),
    /// Replayed moves, newest first
    MoveHistory(Vec<MoveEvent>),
    Facelets(FaceletsEvent),
    Gyro(GyroEvent),
    Battery(BatteryEvent),
    Hardware(HardwareEvent),
    /// The cube asked the host to drop the connection
    Disconnect,
}

pub trait ProtocolVariant: Send + Sync {
    fn generation(&self) -> CubeGeneration;

    /// Plaintext command buffer, or `None` if this generation has no such command
    fn create_command_message(&mut self, command: CubeCommand) -> Option<Vec<u8>>;

    /// Plaintext move history request, or `None` if history replay is unsupported
    fn request_move_history(&self, start_serial: u8, count: u8) -> Option<Vec<u8>>;

    fn supports_move_history(&self) -> bool {
        true
    }

    /// Decode one decrypted notification. Unknown message types yield nothing.
    fn decode(&mut self, message: &[u8], timestamp: i64)
        -> Result<Vec<DecodedMessage>, ProtocolError>;
}

/// Face codes of live moves on Gen3/Gen4 (one-hot, indexed by face)
pub(crate) const ONE_HOT_FACE_CODES: [u32; 6] = [2, 32, 8, 1, 16, 4];

/// Face codes of replayed moves on Gen3/Gen4 (indexed by face)
pub(crate) const HISTORY_FACE_CODES: [u32; 6] = [1, 5, 3, 0, 4, 2];

/// Common tail of every firmware reset command
pub(crate) const RESET_PAYLOAD: [u8; 11] = [
    0x05, 0x39, 0x77, 0x00, 0x00, 0x01, 0x23, 0x45, 0x67, 0x89, 0xAB,
];

pub(crate) fn face_from_code(codes: &[u32; 6], code: u32) -> Option<Face> {
    codes
        .iter()
        .position(|&c| c == code)
        .and_then(Face::from_index)
}

/// Fixed-size zeroed buffer with `prefix` written at offset 0
pub(crate) fn command_buffer(len: usize, prefix: &[u8]) -> Vec<u8> {
    let mut msg = vec![0u8; len];
    msg[..prefix.len()].copy_from_slice(prefix);
    msg
}

/// Align a history window to firmware expectations: replies always start
/// at an odd serial, carry an even number of moves, and must not cross the
/// 255 -> 0 edge (moves beyond it come back as zero bytes).
pub(crate) fn history_window(start_serial: u8, count: u8) -> (u8, u8) {
    let start = if start_serial % 2 == 0 {
        start_serial.wrapping_sub(1)
    } else {
        start_serial
    };
    let count = u16::from(count) + u16::from(count % 2);
    let count = count.min(u16::from(start) + 1).min(u16::from(u8::MAX));
    (start, count as u8)
}

/// Bit offsets of the facelet fields inside a snapshot message
pub(crate) struct FaceletLayout {
    pub cp: usize,
    pub co: usize,
    pub ep: usize,
    pub eo: usize,
}

pub(crate) fn decode_facelets(
    reader: &BitReader<'_>,
    layout: &FaceletLayout,
    serial: u8,
    timestamp: i64,
) -> Result<FaceletsEvent, ProtocolError> {
    let mut cp = [0u8; 7];
    let mut co = [0u8; 7];
    for i in 0..7 {
        cp[i] = reader.bits(layout.cp + i * 3, 3)? as u8;
        co[i] = reader.bits(layout.co + i * 2, 2)? as u8;
    }
    let mut ep = [0u8; 11];
    let mut eo = [0u8; 11];
    for i in 0..11 {
        ep[i] = reader.bits(layout.ep + i * 4, 4)? as u8;
        eo[i] = reader.bits(layout.eo + i, 1)? as u8;
    }

    let (facelets, state) = facelets::reconstruct(&cp, &co, &ep, &eo)?;
    Ok(FaceletsEvent {
        serial,
        timestamp,
        facelets,
        state,
    })
}

/// Quaternion as four consecutive sign-magnitude 16-bit words (w, x, y, z)
/// followed by three sign-magnitude 4-bit angular velocity nibbles (x, y, z)
pub(crate) fn decode_gyro(
    reader: &BitReader<'_>,
    quaternion_start: usize,
    velocity_start: usize,
    timestamp: i64,
) -> Result<GyroEvent, ProtocolError> {
    let component = |index: usize| -> Result<f32, ProtocolError> {
        let raw = reader.get_bit_word(quaternion_start + index * 16, 16, false)?;
        let sign = 1.0 - (raw >> 15) as f32 * 2.0;
        Ok(sign * (raw & 0x7FFF) as f32 / 0x7FFF as f32)
    };
    let velocity = |index: usize| -> Result<f32, ProtocolError> {
        let raw = reader.bits(velocity_start + index * 4, 4)?;
        let sign = 1.0 - (raw >> 3) as f32 * 2.0;
        Ok(sign * (raw & 0x7) as f32)
    };

    Ok(GyroEvent {
        timestamp,
        quaternion: Quaternion {
            w: component(0)?,
            x: component(1)?,
            y: component(2)?,
            z: component(3)?,
        },
        velocity: AngularVelocity {
            x: velocity(0)?,
            y: velocity(1)?,
            z: velocity(2)?,
        },
    })
}

/// `count` single-byte characters starting at `start_bit`, trailing NULs removed
pub(crate) fn read_ascii(
    reader: &BitReader<'_>,
    start_bit: usize,
    count: usize,
) -> Result<String, ProtocolError> {
    let name = (0..count)
        .map(|i| reader.bits(start_bit + i * 8, 8).map(|b| char::from(b as u8)))
        .collect::<Result<String, _>>()?;
    Ok(name.trim_end_matches('\0').to_string())
}

pub(crate) fn battery_event(level: u32, timestamp: i64) -> BatteryEvent {
    BatteryEvent {
        timestamp,
        level: level.min(100) as u8,
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    /// Builds plaintext notifications field by field, MSB-first like the cubes.
    pub struct BitWriter {
        bytes: Vec<u8>,
    }

    impl BitWriter {
        pub fn new(len: usize) -> Self {
            Self {
                bytes: vec![0u8; len],
            }
        }

        pub fn put(&mut self, start_bit: usize, length_bits: usize, value: u32) -> &mut Self {
            for i in 0..length_bits {
                let bit = (value >> (length_bits - 1 - i)) & 1;
                let pos = start_bit + i;
                if bit == 1 {
                    self.bytes[pos / 8] |= 0x80 >> (pos % 8);
                } else {
                    self.bytes[pos / 8] &= !(0x80 >> (pos % 8));
                }
            }
            self
        }

        pub fn put_le16(&mut self, start_bit: usize, value: u16) -> &mut Self {
            let [lo, hi] = value.to_le_bytes();
            self.put(start_bit, 8, u32::from(lo))
                .put(start_bit + 8, 8, u32::from(hi))
        }

        pub fn put_le32(&mut self, start_bit: usize, value: u32) -> &mut Self {
            for (i, byte) in value.to_le_bytes().into_iter().enumerate() {
                self.put(start_bit + i * 8, 8, u32::from(byte));
            }
            self
        }

        /// Solved-cube facelet fields at the given offsets
        pub fn put_solved_state(&mut self, cp: usize, co: usize, ep: usize, eo: usize) -> &mut Self {
            for i in 0..7 {
                self.put(cp + i * 3, 3, i as u32);
                self.put(co + i * 2, 2, 0);
            }
            for i in 0..11 {
                self.put(ep + i * 4, 4, i as u32);
                self.put(eo + i, 1, 0);
            }
            self
        }

        pub fn build(&self) -> Vec<u8> {
            self.bytes.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_window_alignment() {
        // Odd start, even count: unchanged
        assert_eq!(history_window(9, 4), (9, 4));
        // Even start moves down to the odd serial below
        assert_eq!(history_window(10, 4), (9, 4));
        // Odd count rounds up
        assert_eq!(history_window(9, 3), (9, 4));
        // Never cross the 255 -> 0 edge
        assert_eq!(history_window(3, 8), (3, 4));
        assert_eq!(history_window(0, 2), (255, 2));
        assert_eq!(history_window(1, 1), (1, 2));
    }

    #[test]
    fn test_face_codes() {
        assert_eq!(face_from_code(&ONE_HOT_FACE_CODES, 32), Some(Face::R));
        assert_eq!(face_from_code(&ONE_HOT_FACE_CODES, 3), None);
        assert_eq!(face_from_code(&HISTORY_FACE_CODES, 5), Some(Face::R));
        assert_eq!(face_from_code(&HISTORY_FACE_CODES, 7), None);
    }

    #[test]
    fn test_gyro_sign_magnitude() {
        let msg = test_support::BitWriter::new(12)
            .put(0, 16, 0x7FFF) // w = 1.0
            .put(16, 16, 0x8000 | 0x7FFF) // x = -1.0
            .put(32, 16, 0) // y = 0
            .put(48, 16, 0x3FFF) // z ~ 0.5
            .put(64, 4, 0b0011) // vx = 3
            .put(68, 4, 0b1010) // vy = -2
            .put(72, 4, 0)
            .build();
        let gyro = decode_gyro(&BitReader::new(&msg), 0, 64, 7).unwrap();
        assert_eq!(gyro.quaternion.w, 1.0);
        assert_eq!(gyro.quaternion.x, -1.0);
        assert_eq!(gyro.quaternion.y, 0.0);
        assert!((gyro.quaternion.z - 0.5).abs() < 0.001);
        assert_eq!(gyro.velocity.x, 3.0);
        assert_eq!(gyro.velocity.y, -2.0);
        assert_eq!(gyro.velocity.z, 0.0);
    }

    #[test]
    fn test_read_ascii_trims_padding() {
        let msg = [b'G', b'A', b'N', 0, 0];
        assert_eq!(read_ascii(&BitReader::new(&msg), 0, 5).unwrap(), "GAN");
    }
}
