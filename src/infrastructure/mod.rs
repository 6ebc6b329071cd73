//! Infrastructure layer: Bluetooth protocol plumbing and logging setup.

pub mod bluetooth;
pub mod logging;
