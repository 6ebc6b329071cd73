//! Gen3 protocol (GAN356 i Carry 2).
//!
//! Notifications start with magic byte `0x55`, a type byte and a data length
//! byte. Lost moves are recovered with an explicit history request.

use super::{
    battery_event, command_buffer, decode_facelets, face_from_code, history_window, read_ascii,
    DecodedMessage, FaceletLayout, ProtocolError, ProtocolVariant, HISTORY_FACE_CODES,
    ONE_HOT_FACE_CODES, RESET_PAYLOAD,
};
use crate::domain::models::{CubeCommand, Direction, HardwareEvent, MoveEvent};
use crate::infrastructure::bluetooth::bit_reader::BitReader;
use crate::infrastructure::bluetooth::protocol::CubeGeneration;
use tracing::trace;

const COMMAND_LENGTH: usize = 16;
const MAGIC: u32 = 0x55;
const COMMAND_PREFIX: u8 = 0x68;

mod message_type {
    pub const MOVE: u32 = 0x01;
    pub const FACELETS: u32 = 0x02;
    pub const MOVE_HISTORY: u32 = 0x06;
    pub const HARDWARE: u32 = 0x07;
    pub const BATTERY: u32 = 0x10;
    pub const DISCONNECT: u32 = 0x11;
}

const FACELET_LAYOUT: FaceletLayout = FaceletLayout {
    cp: 40,
    co: 61,
    ep: 77,
    eo: 121,
};

#[derive(Debug, Default)]
pub struct Gen3Protocol;

impl Gen3Protocol {
    pub fn new() -> Self {
        Self
    }

    fn decode_move(
        reader: &BitReader<'_>,
        timestamp: i64,
    ) -> Result<Vec<DecodedMessage>, ProtocolError> {
        let cube_timestamp = reader.get_bit_word(24, 32, true)?;
        let serial = reader.get_bit_word(56, 16, true)? as u8;
        let direction = reader.bits(72, 2)?;
        let face_code = reader.bits(74, 6)?;

        let (Some(face), Some(direction)) = (
            face_from_code(&ONE_HOT_FACE_CODES, face_code),
            Direction::from_bit(direction),
        ) else {
            trace!(face_code, direction, "Dropping move with unknown encoding");
            return Ok(Vec::new());
        };

        let mv = MoveEvent::new(serial, face, direction, timestamp)
            .with_local_timestamp(timestamp)
            .with_cube_timestamp(u64::from(cube_timestamp));
        Ok(vec![DecodedMessage::Move(mv)])
    }

    fn decode_history(
        reader: &BitReader<'_>,
        data_length: u32,
        timestamp: i64,
    ) -> Result<Vec<DecodedMessage>, ProtocolError> {
        let start_serial = reader.bits(24, 8)? as u8;
        let count = (data_length.saturating_sub(1) * 2) as usize;
        let available = reader.len_bits().saturating_sub(32) / 4;

        let mut moves = Vec::with_capacity(count.min(available));
        for i in 0..count.min(available) {
            let face = face_from_code(&HISTORY_FACE_CODES, reader.bits(32 + 4 * i, 3)?);
            let direction = Direction::from_bit(reader.bits(35 + 4 * i, 1)?);
            if let (Some(face), Some(direction)) = (face, direction) {
                moves.push(MoveEvent::new(
                    start_serial.wrapping_sub(i as u8),
                    face,
                    direction,
                    timestamp,
                ));
            }
        }
        Ok(vec![DecodedMessage::MoveHistory(moves)])
    }

    fn decode_hardware(
        reader: &BitReader<'_>,
        timestamp: i64,
    ) -> Result<HardwareEvent, ProtocolError> {
        let sw_major = reader.bits(72, 4)?;
        let sw_minor = reader.bits(76, 4)?;
        let hw_major = reader.bits(80, 4)?;
        let hw_minor = reader.bits(84, 4)?;
        Ok(HardwareEvent {
            timestamp,
            name: read_ascii(reader, 32, 5)?,
            hardware_version: format!("{hw_major}.{hw_minor}"),
            software_version: format!("{sw_major}.{sw_minor}"),
            product_date: None,
            gyro_supported: false,
        })
    }
}

impl ProtocolVariant for Gen3Protocol {
    fn generation(&self) -> CubeGeneration {
        CubeGeneration::Gen3
    }

    fn create_command_message(&mut self, command: CubeCommand) -> Option<Vec<u8>> {
        let msg = match command {
            CubeCommand::RequestFacelets => command_buffer(COMMAND_LENGTH, &[COMMAND_PREFIX, 0x01]),
            CubeCommand::RequestHardware => command_buffer(COMMAND_LENGTH, &[COMMAND_PREFIX, 0x04]),
            CubeCommand::RequestBattery => command_buffer(COMMAND_LENGTH, &[COMMAND_PREFIX, 0x07]),
            CubeCommand::RequestReset => {
                let mut msg = command_buffer(COMMAND_LENGTH, &[COMMAND_PREFIX, 0x05]);
                msg[2..2 + RESET_PAYLOAD.len()].copy_from_slice(&RESET_PAYLOAD);
                msg
            }
        };
        Some(msg)
    }

    fn request_move_history(&self, start_serial: u8, count: u8) -> Option<Vec<u8>> {
        let (start, count) = history_window(start_serial, count);
        Some(command_buffer(
            COMMAND_LENGTH,
            &[COMMAND_PREFIX, 0x03, start, 0, count, 0],
        ))
    }

    fn decode(
        &mut self,
        message: &[u8],
        timestamp: i64,
    ) -> Result<Vec<DecodedMessage>, ProtocolError> {
        let reader = BitReader::new(message);
        let magic = reader.bits(0, 8)?;
        let event_type = reader.bits(8, 8)?;
        let data_length = reader.bits(16, 8)?;

        if magic != MAGIC || data_length == 0 {
            trace!(magic, data_length, "Ignoring non-state Gen3 message");
            return Ok(Vec::new());
        }

        match event_type {
            message_type::MOVE => Self::decode_move(&reader, timestamp),
            message_type::MOVE_HISTORY => Self::decode_history(&reader, data_length, timestamp),
            message_type::FACELETS => {
                let serial = reader.get_bit_word(24, 16, true)? as u8;
                let facelets = decode_facelets(&reader, &FACELET_LAYOUT, serial, timestamp)?;
                Ok(vec![DecodedMessage::Facelets(facelets)])
            }
            message_type::HARDWARE => Ok(vec![DecodedMessage::Hardware(Self::decode_hardware(
                &reader, timestamp,
            )?)]),
            message_type::BATTERY => Ok(vec![DecodedMessage::Battery(battery_event(
                reader.bits(24, 8)?,
                timestamp,
            ))]),
            message_type::DISCONNECT => Ok(vec![DecodedMessage::Disconnect]),
            other => {
                trace!(event_type = other, "Ignoring unknown Gen3 message");
                Ok(Vec::new())
            }
        }
    }
}
