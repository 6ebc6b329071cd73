//! Domain layer: cube events, state reconstruction and move sequencing.
//! Nothing here touches Bluetooth or cryptography.

pub mod facelets;
pub mod models;
pub mod sequencer;
pub mod settings;
