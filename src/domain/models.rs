use serde::{Deserialize, Serialize};
use std::fmt;

/// Cube faces in the canonical URFDLB order used by every wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Face {
    U,
    R,
    F,
    D,
    L,
    B,
}

impl Face {
    pub const ORDER: [Face; 6] = [Face::U, Face::R, Face::F, Face::D, Face::L, Face::B];

    /// Face for an index into "URFDLB"
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ORDER.get(index).copied()
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn as_char(self) -> char {
        match self {
            Self::U => 'U',
            Self::R => 'R',
            Self::F => 'F',
            Self::D => 'D',
            Self::L => 'L',
            Self::B => 'B',
        }
    }
}

impl fmt::Display for Face {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// Turn direction as transmitted by the cube (0 = CW, 1 = CCW)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Clockwise = 0,
    CounterClockwise = 1,
}

impl Direction {
    pub fn from_bit(bit: u32) -> Option<Self> {
        match bit {
            0 => Some(Self::Clockwise),
            1 => Some(Self::CounterClockwise),
            _ => None,
        }
    }

    pub fn suffix(self) -> &'static str {
        match self {
            Self::Clockwise => "",
            Self::CounterClockwise => "'",
        }
    }
}

/// A single face turn reported by the cube.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MoveEvent {
    /// Mod-256 move counter
    pub serial: u8,
    /// Host time at which the notification carrying this move was handled (Unix ms)
    pub timestamp: i64,
    /// Host time of the live notification, absent for moves recovered from history
    pub local_timestamp: Option<i64>,
    /// Device-relative clock in ms, when the generation reports one
    pub cube_timestamp: Option<u64>,
    pub face: Face,
    pub direction: Direction,
    /// Face letter with an apostrophe for counter-clockwise turns, e.g. `R'`
    pub notation: String,
}

impl MoveEvent {
    pub fn new(serial: u8, face: Face, direction: Direction, timestamp: i64) -> Self {
        Self {
            serial,
            timestamp,
            local_timestamp: None,
            cube_timestamp: None,
            face,
            direction,
            notation: format!("{}{}", face.as_char(), direction.suffix()),
        }
    }

    pub fn with_local_timestamp(mut self, local_timestamp: i64) -> Self {
        self.local_timestamp = Some(local_timestamp);
        self
    }

    pub fn with_cube_timestamp(mut self, cube_timestamp: u64) -> Self {
        self.cube_timestamp = Some(cube_timestamp);
        self
    }
}

/// Corner/edge permutation and orientation, checksum elements included.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CubeState {
    pub cp: [u8; 8],
    pub co: [u8; 8],
    pub ep: [u8; 12],
    pub eo: [u8; 12],
}

impl CubeState {
    pub fn solved() -> Self {
        Self {
            cp: [0, 1, 2, 3, 4, 5, 6, 7],
            co: [0; 8],
            ep: [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11],
            eo: [0; 12],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FaceletsEvent {
    pub serial: u8,
    pub timestamp: i64,
    /// 54 stickers in URFDLB face order
    pub facelets: String,
    pub state: CubeState,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Quaternion {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct AngularVelocity {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GyroEvent {
    pub timestamp: i64,
    pub quaternion: Quaternion,
    pub velocity: AngularVelocity,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatteryEvent {
    pub timestamp: i64,
    /// Percent, clamped to 100
    pub level: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HardwareEvent {
    pub timestamp: i64,
    pub name: String,
    pub hardware_version: String,
    pub software_version: String,
    pub product_date: Option<String>,
    pub gyro_supported: bool,
}

/// Unified event stream published by a device session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CubeEvent {
    Move(MoveEvent),
    Facelets(FaceletsEvent),
    Gyro(GyroEvent),
    Battery(BatteryEvent),
    Hardware(HardwareEvent),
    Disconnect { timestamp: i64 },
}

/// Commands a consumer can send to the cube.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CubeCommand {
    RequestFacelets,
    RequestHardware,
    RequestBattery,
    /// Reset the cube's internal state to solved
    RequestReset,
}

/// Current host time in Unix milliseconds
pub fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_move_notation() {
        let mv = MoveEvent::new(3, Face::R, Direction::CounterClockwise, 0);
        assert_eq!(mv.notation, "R'");
        let mv = MoveEvent::new(4, Face::U, Direction::Clockwise, 0);
        assert_eq!(mv.notation, "U");
    }

    #[test]
    fn test_face_index_round_trip() {
        for (i, face) in Face::ORDER.iter().enumerate() {
            assert_eq!(face.index(), i);
            assert_eq!(Face::from_index(i), Some(*face));
        }
        assert_eq!(Face::from_index(6), None);
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = CubeEvent::Battery(BatteryEvent {
            timestamp: 10,
            level: 87,
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "BATTERY");
        assert_eq!(json["level"], 87);
    }
}
