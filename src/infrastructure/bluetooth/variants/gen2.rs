//! Gen2 protocol (GAN356 i Carry, GAN11, GAN12, Monster Go AI, ...).
//!
//! Message type is a 4-bit tag at bit 0. Move notifications carry the last
//! seven moves with per-move elapsed times, which covers short notification
//! losses without a history request; there is no history command.

use super::{
    battery_event, command_buffer, decode_facelets, decode_gyro, read_ascii, DecodedMessage,
    FaceletLayout, ProtocolError, ProtocolVariant, RESET_PAYLOAD,
};
use crate::domain::models::{CubeCommand, Direction, Face, HardwareEvent, MoveEvent};
use crate::infrastructure::bluetooth::bit_reader::BitReader;
use crate::infrastructure::bluetooth::protocol::CubeGeneration;
use tracing::trace;

const COMMAND_LENGTH: usize = 20;

/// Moves packed into a single move notification
const PACKED_MOVES: u8 = 7;

mod message_type {
    pub const GYRO: u32 = 0x01;
    pub const MOVE: u32 = 0x02;
    pub const FACELETS: u32 = 0x04;
    pub const HARDWARE: u32 = 0x05;
    pub const BATTERY: u32 = 0x09;
    pub const DISCONNECT: u32 = 0x0D;
}

const FACELET_LAYOUT: FaceletLayout = FaceletLayout {
    cp: 12,
    co: 33,
    ep: 47,
    eo: 91,
};

#[derive(Debug, Default)]
pub struct Gen2Protocol {
    /// Serial of the newest move seen on the wire
    last_serial: Option<u8>,
    last_move_timestamp: i64,
    /// Accumulated device clock
    cube_timestamp: u64,
}

impl Gen2Protocol {
    pub fn new() -> Self {
        Self::default()
    }

    fn decode_moves(
        &mut self,
        reader: &BitReader<'_>,
        timestamp: i64,
    ) -> Result<Vec<DecodedMessage>, ProtocolError> {
        let serial = reader.bits(4, 8)? as u8;
        let count = match self.last_serial {
            Some(last) => serial.wrapping_sub(last).min(PACKED_MOVES),
            None => 1,
        };
        self.last_serial = Some(serial);

        let mut moves = Vec::with_capacity(usize::from(count));
        // Oldest first; index 0 is the newest move
        for i in (0..usize::from(count)).rev() {
            let face = reader.bits(12 + 5 * i, 4)?;
            let direction = reader.bits(16 + 5 * i, 1)?;
            let mut elapsed = i64::from(reader.bits(47 + 16 * i, 16)?);
            if elapsed == 0 {
                // 16-bit device timer overflowed, fall back to host time
                elapsed = (timestamp - self.last_move_timestamp).max(0);
            }
            self.cube_timestamp = self.cube_timestamp.saturating_add(elapsed as u64);

            let (Some(face), Some(direction)) = (
                Face::from_index(face as usize),
                Direction::from_bit(direction),
            ) else {
                trace!(face, "Skipping move with unknown face");
                continue;
            };
            let mut mv = MoveEvent::new(serial.wrapping_sub(i as u8), face, direction, timestamp)
                .with_cube_timestamp(self.cube_timestamp);
            if i == 0 {
                mv = mv.with_local_timestamp(timestamp);
            }
            moves.push(DecodedMessage::Move(mv));
        }

        if count > 0 {
            self.last_move_timestamp = timestamp;
        }
        Ok(moves)
    }

    fn decode_hardware(
        reader: &BitReader<'_>,
        timestamp: i64,
    ) -> Result<HardwareEvent, ProtocolError> {
        let hw_major = reader.bits(8, 8)?;
        let hw_minor = reader.bits(16, 8)?;
        let sw_major = reader.bits(24, 8)?;
        let sw_minor = reader.bits(32, 8)?;
        Ok(HardwareEvent {
            timestamp,
            name: read_ascii(reader, 40, 8)?,
            hardware_version: format!("{hw_major}.{hw_minor}"),
            software_version: format!("{sw_major}.{sw_minor}"),
            product_date: None,
            gyro_supported: reader.bits(104, 1)? == 1,
        })
    }
}

impl ProtocolVariant for Gen2Protocol {
    fn generation(&self) -> CubeGeneration {
        CubeGeneration::Gen2
    }

    fn create_command_message(&mut self, command: CubeCommand) -> Option<Vec<u8>> {
        let msg = match command {
            CubeCommand::RequestFacelets => command_buffer(COMMAND_LENGTH, &[0x04]),
            CubeCommand::RequestHardware => command_buffer(COMMAND_LENGTH, &[0x05]),
            CubeCommand::RequestBattery => command_buffer(COMMAND_LENGTH, &[0x09]),
            CubeCommand::RequestReset => {
                let mut msg = command_buffer(COMMAND_LENGTH, &[0x0A]);
                msg[1..1 + RESET_PAYLOAD.len()].copy_from_slice(&RESET_PAYLOAD);
                msg
            }
        };
        Some(msg)
    }

    fn request_move_history(&self, _start_serial: u8, _count: u8) -> Option<Vec<u8>> {
        None
    }

    fn supports_move_history(&self) -> bool {
        false
    }

    fn decode(
        &mut self,
        message: &[u8],
        timestamp: i64,
    ) -> Result<Vec<DecodedMessage>, ProtocolError> {
        let reader = BitReader::new(message);
        let event_type = reader.bits(0, 4)?;

        match event_type {
            message_type::GYRO => Ok(vec![DecodedMessage::Gyro(decode_gyro(
                &reader, 4, 68, timestamp,
            )?)]),
            message_type::MOVE => self.decode_moves(&reader, timestamp),
            message_type::FACELETS => {
                let serial = reader.bits(4, 8)? as u8;
                let facelets = decode_facelets(&reader, &FACELET_LAYOUT, serial, timestamp)?;
                if self.last_serial.is_none() {
                    self.last_serial = Some(serial);
                }
                Ok(vec![DecodedMessage::Facelets(facelets)])
            }
            message_type::HARDWARE => Ok(vec![DecodedMessage::Hardware(Self::decode_hardware(
                &reader, timestamp,
            )?)]),
            message_type::BATTERY => Ok(vec![DecodedMessage::Battery(battery_event(
                reader.bits(8, 8)?,
                timestamp,
            ))]),
            message_type::DISCONNECT => Ok(vec![DecodedMessage::Disconnect]),
            other => {
                trace!(event_type = other, "Ignoring unknown Gen2 message");
                Ok(Vec::new())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::facelets::SOLVED_FACELETS;
    use crate::infrastructure::bluetooth::variants::test_support::BitWriter;

    fn move_message(serial: u8, moves: &[(u32, u32, u32)]) -> Vec<u8> {
        let mut writer = BitWriter::new(20);
        writer.put(0, 4, message_type::MOVE).put(4, 8, u32::from(serial));
        // moves[0] is the newest
        for (i, &(face, direction, elapsed)) in moves.iter().enumerate() {
            writer
                .put(12 + 5 * i, 4, face)
                .put(16 + 5 * i, 1, direction)
                .put(47 + 16 * i, 16, elapsed);
        }
        writer.build()
    }

    fn moves(decoded: &[DecodedMessage]) -> Vec<&MoveEvent> {
        decoded
            .iter()
            .filter_map(|m| match m {
                DecodedMessage::Move(mv) => Some(mv),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_command_messages() {
        let mut protocol = Gen2Protocol::new();
        let facelets = protocol
            .create_command_message(CubeCommand::RequestFacelets)
            .unwrap();
        assert_eq!(facelets.len(), 20);
        assert_eq!(facelets[0], 0x04);
        assert!(facelets[1..].iter().all(|&b| b == 0));

        let reset = protocol.create_command_message(CubeCommand::RequestReset).unwrap();
        assert_eq!(
            reset,
            vec![
                0x0A, 0x05, 0x39, 0x77, 0x00, 0x00, 0x01, 0x23, 0x45, 0x67, 0x89, 0xAB, 0, 0, 0,
                0, 0, 0, 0, 0
            ]
        );
        assert!(protocol.request_move_history(9, 4).is_none());
    }

    #[test]
    fn test_single_move() {
        let mut protocol = Gen2Protocol::new();
        // R' as the newest move
        let decoded = protocol
            .decode(&move_message(12, &[(1, 1, 150)]), 1_000)
            .unwrap();
        let decoded = moves(&decoded);
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].serial, 12);
        assert_eq!(decoded[0].face, Face::R);
        assert_eq!(decoded[0].direction, Direction::CounterClockwise);
        assert_eq!(decoded[0].notation, "R'");
        assert_eq!(decoded[0].cube_timestamp, Some(150));
        assert_eq!(decoded[0].local_timestamp, Some(1_000));
    }

    #[test]
    fn test_packed_moves_recover_missed() {
        let mut protocol = Gen2Protocol::new();
        protocol.decode(&move_message(10, &[(0, 0, 100)]), 0).unwrap();

        // Serial jumped by 3: the two older packed moves are replayed first
        let msg = move_message(13, &[(2, 0, 30), (3, 1, 20), (4, 0, 10)]);
        let decoded = protocol.decode(&msg, 500).unwrap();
        let decoded = moves(&decoded);
        let serials: Vec<u8> = decoded.iter().map(|m| m.serial).collect();
        assert_eq!(serials, vec![11, 12, 13]);
        assert_eq!(decoded[0].notation, "L");
        assert_eq!(decoded[1].notation, "D'");
        assert_eq!(decoded[2].notation, "F");
        assert_eq!(decoded[0].local_timestamp, None);
        assert_eq!(decoded[2].local_timestamp, Some(500));
        assert_eq!(decoded[2].cube_timestamp, Some(160));
    }

    #[test]
    fn test_repeated_serial_yields_nothing() {
        let mut protocol = Gen2Protocol::new();
        protocol.decode(&move_message(10, &[(0, 0, 100)]), 0).unwrap();
        let decoded = protocol.decode(&move_message(10, &[(0, 0, 100)]), 10).unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn test_solved_facelets() {
        let msg = BitWriter::new(20)
            .put(0, 4, message_type::FACELETS)
            .put(4, 8, 77)
            .put_solved_state(12, 33, 47, 91)
            .build();
        let decoded = Gen2Protocol::new().decode(&msg, 0).unwrap();
        match &decoded[..] {
            [DecodedMessage::Facelets(f)] => {
                assert_eq!(f.serial, 77);
                assert_eq!(f.facelets, SOLVED_FACELETS);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_hardware() {
        let mut writer = BitWriter::new(20);
        writer
            .put(0, 4, message_type::HARDWARE)
            .put(8, 8, 1)
            .put(16, 8, 2)
            .put(24, 8, 3)
            .put(32, 8, 4)
            .put(104, 1, 1);
        for (i, b) in b"GAN356i".iter().enumerate() {
            writer.put(40 + i * 8, 8, u32::from(*b));
        }
        let decoded = Gen2Protocol::new().decode(&writer.build(), 0).unwrap();
        match &decoded[..] {
            [DecodedMessage::Hardware(hw)] => {
                assert_eq!(hw.name, "GAN356i");
                assert_eq!(hw.hardware_version, "1.2");
                assert_eq!(hw.software_version, "3.4");
                assert!(hw.gyro_supported);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_battery_clamped() {
        let msg = BitWriter::new(20)
            .put(0, 4, message_type::BATTERY)
            .put(8, 8, 130)
            .build();
        let decoded = Gen2Protocol::new().decode(&msg, 0).unwrap();
        assert!(matches!(&decoded[..], [DecodedMessage::Battery(b)] if b.level == 100));
    }

    #[test]
    fn test_disconnect_and_unknown() {
        let mut protocol = Gen2Protocol::new();
        let disconnect = BitWriter::new(20).put(0, 4, 0x0D).build();
        assert_eq!(
            protocol.decode(&disconnect, 0).unwrap(),
            vec![DecodedMessage::Disconnect]
        );
        let unknown = BitWriter::new(20).put(0, 4, 0x0F).build();
        assert!(protocol.decode(&unknown, 0).unwrap().is_empty());
    }

    #[test]
    fn test_zero_elapsed_uses_host_clock() {
        let mut protocol = Gen2Protocol::new();
        protocol.decode(&move_message(10, &[(0, 0, 100)]), 1_000).unwrap();

        // Device timer wrapped: 250 ms of host time passed since the last move
        let decoded = protocol.decode(&move_message(11, &[(1, 0, 0)]), 1_250).unwrap();
        let decoded = moves(&decoded);
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].serial, 11);
        assert_eq!(decoded[0].cube_timestamp, Some(350));
    }

    #[test]
    fn test_gyro_message_offsets() {
        let msg = BitWriter::new(20)
            .put(0, 4, message_type::GYRO)
            .put(4, 16, 0x7FFF) // w = 1.0
            .put(20, 16, 0x8000 | 0x7FFF) // x = -1.0
            .put(68, 4, 0b1011) // vx = -3
            .put(72, 4, 0b0010) // vy = 2
            .build();
        let decoded = Gen2Protocol::new().decode(&msg, 42).unwrap();
        match &decoded[..] {
            [DecodedMessage::Gyro(gyro)] => {
                assert_eq!(gyro.timestamp, 42);
                assert_eq!(gyro.quaternion.w, 1.0);
                assert_eq!(gyro.quaternion.x, -1.0);
                assert_eq!(gyro.quaternion.y, 0.0);
                assert_eq!(gyro.quaternion.z, 0.0);
                assert_eq!(gyro.velocity.x, -3.0);
                assert_eq!(gyro.velocity.y, 2.0);
                assert_eq!(gyro.velocity.z, 0.0);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
