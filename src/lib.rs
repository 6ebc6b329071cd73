//! # gan_cube_protocol
//!
//! Async driver for GAN smart cubes over Bluetooth Low Energy. It decrypts
//! and decodes cube notifications and reconciles lost or reordered moves
//! into an ordered, gap-free event stream.
//!
//! ## Supported hardware
//!
//! | Generation | Cubes | Move history |
//! |---|---|---|
//! | Gen2 | GAN Mini ui FreePlay, GAN12 ui, GAN356 i3, Monster Go 3Ai | no |
//! | Gen3 | GAN356 i Carry 2 | yes |
//! | Gen4 | GAN12 ui Maglev, GAN14 Maglev, MoYu AI 2023 | yes |
//!
//! The generation is picked from the cube's primary GATT service.
//!
//! ## Module overview
//!
//! | Module | Purpose |
//! |---|---|
//! | [`prelude`] | Glob import of the commonly needed types |
//! | [`domain`] | Events, facelet reconstruction, move sequencing, settings |
//! | [`infrastructure::bluetooth`] | Cipher, decoders, session and connect flow |
//! | [`infrastructure::logging`] | `tracing` subscriber setup |

pub mod domain;
pub mod infrastructure;

/// Convenience re-exports for downstream crates.
pub mod prelude {
    // ── Events and commands ──────────────────────────────────────────────────
    pub use crate::domain::models::{
        BatteryEvent, CubeCommand, CubeEvent, CubeState, Direction, Face, FaceletsEvent,
        GyroEvent, HardwareEvent, MoveEvent,
    };
    pub use crate::domain::settings::{Settings, SettingsService};

    // ── Connection and session ───────────────────────────────────────────────
    pub use crate::infrastructure::bluetooth::connection::{
        ConnectionConfig, ConnectionError, CubeConnection, CubeDevice, GanCubeConnector, GattLink,
    };
    pub use crate::infrastructure::bluetooth::scanner::{
        is_supported_device_name, AdvertisementSource, MacResolver, ManufacturerData,
    };
    pub use crate::infrastructure::bluetooth::session::{
        CubeTransport, SessionHandle, TransportError, TransportEvent,
    };

    // ── Protocol ─────────────────────────────────────────────────────────────
    pub use crate::infrastructure::bluetooth::cipher::GanCipher;
    pub use crate::infrastructure::bluetooth::driver::ProtocolDriver;
    pub use crate::infrastructure::bluetooth::protocol::{CubeGeneration, MacAddress};
}
