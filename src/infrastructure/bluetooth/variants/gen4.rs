//! Gen4 protocol (GAN12 ui Maglev, GAN14 Maglev, MoYu AI 2023).
//!
//! Type byte at offset 0, data length byte at offset 1. Hardware identity is
//! spread over several sub-messages that are collected before a single
//! hardware event is published.

use super::{
    battery_event, command_buffer, decode_facelets, decode_gyro, face_from_code, history_window,
    read_ascii, DecodedMessage, FaceletLayout, ProtocolError, ProtocolVariant,
    HISTORY_FACE_CODES, ONE_HOT_FACE_CODES, RESET_PAYLOAD,
};
use crate::domain::models::{CubeCommand, Direction, HardwareEvent, MoveEvent};
use crate::infrastructure::bluetooth::bit_reader::BitReader;
use crate::infrastructure::bluetooth::protocol::CubeGeneration;
use tracing::{debug, trace};

const COMMAND_LENGTH: usize = 20;

mod message_type {
    pub const MOVE: u32 = 0x01;
    pub const MOVE_HISTORY: u32 = 0xD1;
    pub const DISCONNECT: u32 = 0xEA;
    pub const GYRO: u32 = 0xEC;
    pub const FACELETS: u32 = 0xED;
    pub const BATTERY: u32 = 0xEF;
    pub const PRODUCT_DATE: u32 = 0xFA;
    pub const HARDWARE_UNKNOWN: u32 = 0xFB;
    pub const HARDWARE_NAME: u32 = 0xFC;
    pub const SOFTWARE_VERSION: u32 = 0xFD;
    pub const HARDWARE_VERSION: u32 = 0xFE;
}

const FACELET_LAYOUT: FaceletLayout = FaceletLayout {
    cp: 32,
    co: 53,
    ep: 69,
    eo: 113,
};

/// Models known to carry a gyroscope
const GYRO_MODELS: &[&str] = &["GAN12uiFrameless"];

/// Hardware sub-messages received since the last hardware request
#[derive(Debug, Default)]
struct HardwareInfo {
    product_date: Option<String>,
    name: Option<String>,
    software_version: Option<String>,
    hardware_version: Option<String>,
}

impl HardwareInfo {
    /// Consume the collected fields once every required sub-message arrived
    fn take_complete(&mut self, timestamp: i64) -> Option<HardwareEvent> {
        if self.product_date.is_none()
            || self.name.is_none()
            || self.software_version.is_none()
            || self.hardware_version.is_none()
        {
            return None;
        }
        let info = std::mem::take(self);
        let name = info.name.unwrap_or_default();
        Some(HardwareEvent {
            timestamp,
            gyro_supported: GYRO_MODELS.contains(&name.as_str()),
            name,
            hardware_version: info.hardware_version.unwrap_or_default(),
            software_version: info.software_version.unwrap_or_default(),
            product_date: info.product_date,
        })
    }
}

#[derive(Debug, Default)]
pub struct Gen4Protocol {
    hardware: HardwareInfo,
}

impl Gen4Protocol {
    pub fn new() -> Self {
        Self::default()
    }

    fn decode_move(
        reader: &BitReader<'_>,
        timestamp: i64,
    ) -> Result<Vec<DecodedMessage>, ProtocolError> {
        let cube_timestamp = reader.get_bit_word(16, 32, true)?;
        let serial = reader.get_bit_word(48, 16, true)? as u8;
        let direction = reader.bits(64, 2)?;
        let face_code = reader.bits(66, 6)?;

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
        let start_serial = reader.bits(16, 8)? as u8;
        let count = (data_length.saturating_sub(1) * 2) as usize;
        let count = count.min(reader.len_bits().saturating_sub(24) / 4);

        let mut moves = Vec::with_capacity(count);
        for i in 0..count {
            let face = face_from_code(&HISTORY_FACE_CODES, reader.bits(24 + 4 * i, 3)?);
            let direction = Direction::from_bit(reader.bits(27 + 4 * i, 1)?);
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

    fn decode_hardware_part(
        &mut self,
        reader: &BitReader<'_>,
        event_type: u32,
        data_length: u32,
        timestamp: i64,
    ) -> Result<Vec<DecodedMessage>, ProtocolError> {
        match event_type {
            message_type::PRODUCT_DATE => {
                let year = reader.get_bit_word(24, 16, true)?;
                let month = reader.bits(40, 8)?;
                let day = reader.bits(48, 8)?;
                self.hardware.product_date = Some(format!("{year:04}-{month:02}-{day:02}"));
            }
            message_type::HARDWARE_NAME => {
                let len = data_length.saturating_sub(1) as usize;
                self.hardware.name = Some(read_ascii(reader, 24, len)?);
            }
            message_type::SOFTWARE_VERSION => {
                let major = reader.bits(24, 4)?;
                let minor = reader.bits(28, 4)?;
                self.hardware.software_version = Some(format!("{major}.{minor}"));
            }
            message_type::HARDWARE_VERSION => {
                let major = reader.bits(24, 4)?;
                let minor = reader.bits(28, 4)?;
                self.hardware.hardware_version = Some(format!("{major}.{minor}"));
            }
            message_type::HARDWARE_UNKNOWN => trace!("Ignoring undocumented hardware field"),
            _ => trace!(event_type, "Ignoring hardware sub-message"),
        }

        Ok(self
            .hardware
            .take_complete(timestamp)
            .map(|hw| {
                debug!(name = %hw.name, "Hardware info complete");
                vec![DecodedMessage::Hardware(hw)]
            })
            .unwrap_or_default())
    }
}

impl ProtocolVariant for Gen4Protocol {
    fn generation(&self) -> CubeGeneration {
        CubeGeneration::Gen4
    }

    fn create_command_message(&mut self, command: CubeCommand) -> Option<Vec<u8>> {
        let msg = match command {
            CubeCommand::RequestFacelets => {
                command_buffer(COMMAND_LENGTH, &[0xDD, 0x04, 0x00, 0xED, 0x00, 0x00])
            }
            CubeCommand::RequestHardware => {
                self.hardware = HardwareInfo::default();
                command_buffer(COMMAND_LENGTH, &[0xDF, 0x03, 0x00, 0x00, 0x00])
            }
            CubeCommand::RequestBattery => {
                command_buffer(COMMAND_LENGTH, &[0xDD, 0x04, 0x00, 0xEF, 0x00, 0x00])
            }
            CubeCommand::RequestReset => {
                let mut msg = command_buffer(COMMAND_LENGTH, &[0xD2, 0x0D]);
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
            &[0xD1, 0x04, start, 0, count, 0],
        ))
    }

    fn decode(
        &mut self,
        message: &[u8],
        timestamp: i64,
    ) -> Result<Vec<DecodedMessage>, ProtocolError> {
        let reader = BitReader::new(message);
        let event_type = reader.bits(0, 8)?;
        let data_length = reader.bits(8, 8)?;

        match event_type {
            message_type::MOVE => Self::decode_move(&reader, timestamp),
            message_type::MOVE_HISTORY => Self::decode_history(&reader, data_length, timestamp),
            message_type::FACELETS => {
                let serial = reader.get_bit_word(16, 16, true)? as u8;
                let facelets = decode_facelets(&reader, &FACELET_LAYOUT, serial, timestamp)?;
                Ok(vec![DecodedMessage::Facelets(facelets)])
            }
            message_type::PRODUCT_DATE..=message_type::HARDWARE_VERSION => {
                self.decode_hardware_part(&reader, event_type, data_length, timestamp)
            }
            message_type::GYRO => Ok(vec![DecodedMessage::Gyro(decode_gyro(
                &reader, 16, 80, timestamp,
            )?)]),
            message_type::BATTERY => {
                let level = reader.bits(8 + data_length as usize * 8, 8)?;
                Ok(vec![DecodedMessage::Battery(battery_event(level, timestamp))])
            }
            message_type::DISCONNECT => Ok(vec![DecodedMessage::Disconnect]),
            other => {
                trace!(event_type = other, "Ignoring unknown Gen4 message");
                Ok(Vec::new())
            }
        }
    }
}
