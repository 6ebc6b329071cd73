//! GAN Cube Protocol
//!
//! Identifiers, static key material and addressing shared by all cube
//! generations. Per-generation message layouts live in [`super::variants`].

use crate::infrastructure::bluetooth::variants::{
    gen2::Gen2Protocol, gen3::Gen3Protocol, gen4::Gen4Protocol, ProtocolVariant,
};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Gen2 primary service (Nordic UART style UUID)
pub const GEN2_SERVICE_UUID: Uuid = Uuid::from_u128(0x6e400001_b5a3_f393_e0a9_e50e24dc4179);
pub const GEN2_COMMAND_CHAR_UUID: Uuid = Uuid::from_u128(0x28be4a4a_cd67_11e9_a32f_2a2ae2dbcce4);
pub const GEN2_STATE_CHAR_UUID: Uuid = Uuid::from_u128(0x28be4cb6_cd67_11e9_a32f_2a2ae2dbcce4);

pub const GEN3_SERVICE_UUID: Uuid = Uuid::from_u128(0x8653000a_43e6_47b7_9cb0_5fc21d4ae340);
pub const GEN3_COMMAND_CHAR_UUID: Uuid = Uuid::from_u128(0x8653000c_43e6_47b7_9cb0_5fc21d4ae340);
pub const GEN3_STATE_CHAR_UUID: Uuid = Uuid::from_u128(0x8653000b_43e6_47b7_9cb0_5fc21d4ae340);

pub const GEN4_SERVICE_UUID: Uuid = Uuid::from_u128(0x00000010_0000_fff7_fff6_fff5fff4fff0);
pub const GEN4_COMMAND_CHAR_UUID: Uuid = Uuid::from_u128(0x0000fff5_0000_1000_8000_00805f9b34fb);
pub const GEN4_STATE_CHAR_UUID: Uuid = Uuid::from_u128(0x0000fff6_0000_1000_8000_00805f9b34fb);

/// Advertised name prefixes of supported cubes
pub const DEVICE_NAME_PREFIXES: &[&str] = &["GAN", "MG", "AiCube"];

/// Name prefix of MoYu AI 2023 cubes, which use their own key
pub const MOYU_AI_NAME_PREFIX: &str = "AiCube";

/// Base AES key material before MAC salting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CipherKey {
    pub key: [u8; 16],
    pub iv: [u8; 16],
}

/// Key used by GAN Gen2, Gen3 and Gen4 cubes
pub const GAN_CIPHER_KEY: CipherKey = CipherKey {
    key: [
        0x01, 0x02, 0x42, 0x28, 0x31, 0x91, 0x16, 0x07, 0x20, 0x05, 0x18, 0x54, 0x42, 0x11, 0x12,
        0x53,
    ],
    iv: [
        0x11, 0x03, 0x32, 0x28, 0x21, 0x01, 0x76, 0x27, 0x20, 0x95, 0x78, 0x14, 0x32, 0x12, 0x02,
        0x43,
    ],
};

/// Key used by MoYu AI 2023
pub const MOYU_AI_CIPHER_KEY: CipherKey = CipherKey {
    key: [
        0x05, 0x12, 0x02, 0x45, 0x02, 0x01, 0x29, 0x56, 0x12, 0x78, 0x12, 0x76, 0x81, 0x01, 0x08,
        0x03,
    ],
    iv: [
        0x01, 0x44, 0x28, 0x06, 0x86, 0x21, 0x22, 0x28, 0x51, 0x05, 0x08, 0x31, 0x82, 0x02, 0x21,
        0x06,
    ],
};

/// Pick the base key for a device from its advertised name
pub fn cipher_key_for_name(name: Option<&str>) -> &'static CipherKey {
    match name {
        Some(n) if n.starts_with(MOYU_AI_NAME_PREFIX) => &MOYU_AI_CIPHER_KEY,
        _ => &GAN_CIPHER_KEY,
    }
}

/// Hardware protocol generation, selected by the primary service UUID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CubeGeneration {
    Gen2,
    Gen3,
    Gen4,
}

impl CubeGeneration {
    pub const ALL: [CubeGeneration; 3] = [Self::Gen2, Self::Gen3, Self::Gen4];

    pub fn from_service_uuid(uuid: &Uuid) -> Option<Self> {
        Self::ALL.into_iter().find(|g| g.service_uuid() == *uuid)
    }

    /// First generation whose service appears in `services`
    pub fn from_services<'a>(services: impl IntoIterator<Item = &'a Uuid>) -> Option<Self> {
        services.into_iter().find_map(Self::from_service_uuid)
    }

    pub fn service_uuid(self) -> Uuid {
        match self {
            Self::Gen2 => GEN2_SERVICE_UUID,
            Self::Gen3 => GEN3_SERVICE_UUID,
            Self::Gen4 => GEN4_SERVICE_UUID,
        }
    }

    /// Characteristic the cube receives commands on
    pub fn command_char_uuid(self) -> Uuid {
        match self {
            Self::Gen2 => GEN2_COMMAND_CHAR_UUID,
            Self::Gen3 => GEN3_COMMAND_CHAR_UUID,
            Self::Gen4 => GEN4_COMMAND_CHAR_UUID,
        }
    }

    /// Characteristic the cube notifies state on
    pub fn state_char_uuid(self) -> Uuid {
        match self {
            Self::Gen2 => GEN2_STATE_CHAR_UUID,
            Self::Gen3 => GEN3_STATE_CHAR_UUID,
            Self::Gen4 => GEN4_STATE_CHAR_UUID,
        }
    }

    /// Fresh decoder for this generation
    pub fn create_variant(self) -> Box<dyn ProtocolVariant> {
        match self {
            Self::Gen2 => Box::new(Gen2Protocol::new()),
            Self::Gen3 => Box::new(Gen3Protocol::new()),
            Self::Gen4 => Box::new(Gen4Protocol::new()),
        }
    }
}

impl fmt::Display for CubeGeneration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gen2 => write!(f, "Gen2"),
            Self::Gen3 => write!(f, "Gen3"),
            Self::Gen4 => write!(f, "Gen4"),
        }
    }
}

/// Six-byte Bluetooth device address, most significant byte first as
/// conventionally written (`AB:12:...`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MacAddress(pub [u8; 6]);

impl MacAddress {
    /// Cipher salt: the address bytes in reverse order
    pub fn salt(&self) -> [u8; 6] {
        let mut salt = self.0;
        salt.reverse();
        salt
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid MAC address: {0}")]
pub struct MacParseError(String);

impl FromStr for MacAddress {
    type Err = MacParseError;

    /// Accepts `:`, `-` or whitespace separated hex octets
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let octets: Vec<&str> = s
            .split(|c: char| c == ':' || c == '-' || c.is_whitespace())
            .filter(|part| !part.is_empty())
            .collect();
        if octets.len() != 6 {
            return Err(MacParseError(s.to_string()));
        }
        let mut bytes = [0u8; 6];
        for (dst, octet) in bytes.iter_mut().zip(octets) {
            *dst = u8::from_str_radix(octet, 16).map_err(|_| MacParseError(s.to_string()))?;
        }
        Ok(Self(bytes))
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}
