//! Bluetooth Module
//!
//! Protocol driver for GAN smart cubes. The BLE stack itself stays with the
//! caller, behind the [`connection::CubeDevice`] and
//! [`session::CubeTransport`] traits.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                       DeviceSession                       │
//! │   (one task per cube - event stream + SessionHandle)      │
//! └─────────────────────┬────────────────────────────────────┘
//!                       │
//!         ┌─────────────┼──────────────┐
//!         │             │              │
//!         ▼             ▼              ▼
//! ┌────────────┐  ┌────────────┐  ┌─────────────────┐
//! │   Cipher   │  │   Driver   │  │    Scanner /    │
//! │            │  │            │  │   Connection    │
//! │ - AES-CBC  │  │ - Variant  │  │ - Name filter   │
//! │ - MAC salt │  │ - Sequencer│  │ - MAC lookup    │
//! └────────────┘  └─────┬──────┘  └─────────────────┘
//!                       │
//!                 ┌─────┴──────┐
//!                 │  Variants  │
//!                 │ Gen2/3/4   │
//!                 │ BitReader  │
//!                 └────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - Service UUIDs, key material, generations and MAC addresses
//! - [`cipher`] - Per-device message encryption
//! - [`bit_reader`] - Bit-field access over decrypted messages
//! - [`variants`] - Per-generation message decoders and command builders
//! - [`driver`] - Variant plus move sequencer
//! - [`session`] - Session task, transport trait and caller handle
//! - [`scanner`] - Device filtering and MAC resolution
//! - [`connection`] - Connect flow from a discovered device to a session

pub mod bit_reader;
pub mod cipher;
pub mod connection;
pub mod driver;
pub mod protocol;
pub mod scanner;
pub mod session;
pub mod variants;

// Re-export main entry points for convenience
pub use connection::{CubeConnection, GanCubeConnector};
pub use session::SessionHandle;
