//! gan-decode: offline decoder for captured cube notifications.
//!
//! # Usage
//!
//! ```bash
//! # One hex-encoded (encrypted) notification per line
//! gan-decode --generation gen3 --mac AB:12:CD:34:56:78 < capture.txt
//!
//! # MoYu AI cubes use their own key, selected by advertised name
//! gan-decode --generation gen4 --mac AB:12:CD:34:56:78 --name AiCube-1234 < capture.txt
//! ```
//!
//! Each decoded event is written to stdout as one JSON object per line.
//! Logs go to stderr.

use anyhow::Context;
use clap::{Parser, ValueEnum};
use gan_cube_protocol::domain::models::{now_millis, CubeEvent};
use gan_cube_protocol::domain::settings::{Settings, SettingsService};
use gan_cube_protocol::infrastructure::bluetooth::cipher::GanCipher;
use gan_cube_protocol::infrastructure::bluetooth::driver::ProtocolDriver;
use gan_cube_protocol::infrastructure::bluetooth::protocol::{
    cipher_key_for_name, CubeGeneration, MacAddress,
};
use gan_cube_protocol::infrastructure::logging::init_logger;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum GenerationArg {
    Gen2,
    Gen3,
    Gen4,
}

impl From<GenerationArg> for CubeGeneration {
    fn from(arg: GenerationArg) -> Self {
        match arg {
            GenerationArg::Gen2 => CubeGeneration::Gen2,
            GenerationArg::Gen3 => CubeGeneration::Gen3,
            GenerationArg::Gen4 => CubeGeneration::Gen4,
        }
    }
}

/// Decode captured GAN cube notifications into JSON events
#[derive(Parser, Debug)]
#[command(name = "gan-decode")]
#[command(version)]
struct Args {
    /// Protocol generation of the captured cube
    #[arg(short, long, value_enum)]
    generation: GenerationArg,

    /// Cube MAC address, e.g. AB:12:CD:34:56:78
    #[arg(short, long)]
    mac: String,

    /// Advertised device name (selects the key for MoYu AI cubes)
    #[arg(short, long)]
    name: Option<String>,

    /// Input lines are already decrypted
    #[arg(long)]
    plaintext: bool,

    /// Settings file (defaults to the user config directory)
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Log level override (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,
}

fn load_settings(path: Option<PathBuf>) -> Settings {
    match path {
        Some(path) => SettingsService::with_path(path).get().clone(),
        None => SettingsService::new()
            .map(|service| service.get().clone())
            .unwrap_or_default(),
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut settings = load_settings(args.settings);
    if let Some(level) = args.log_level {
        settings.log_settings.level = level;
    }
    let _log_guard = init_logger(&settings.log_settings)?;

    let generation = CubeGeneration::from(args.generation);
    let mac: MacAddress = args.mac.parse()?;
    let cipher = GanCipher::for_device(cipher_key_for_name(args.name.as_deref()), &mac);
    let mut driver = ProtocolDriver::for_generation(generation, settings.sequencer_config());
    info!(%generation, %mac, "Decoding notifications from stdin");

    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut out = stdout.lock();

    for (index, line) in stdin.lock().lines().enumerate() {
        let line_no = index + 1;
        let line = line.context("Failed to read stdin")?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let raw = match hex::decode(line.replace([' ', ':'], "")) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(line = line_no, error = %e, "Skipping line that is not hex");
                continue;
            }
        };
        let message = if args.plaintext {
            raw
        } else {
            match cipher.decrypt(&raw) {
                Ok(message) => message,
                Err(e) => {
                    warn!(line = line_no, error = %e, "Skipping undecryptable notification");
                    continue;
                }
            }
        };
        debug!(line = line_no, plain = %hex::encode(&message), "Decrypted");

        let outcome = match driver.handle_state_event(&message, now_millis()) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(line = line_no, error = %e, "Skipping malformed notification");
                continue;
            }
        };
        for command in &outcome.commands {
            info!(line = line_no, command = %hex::encode(command), "Cube would be asked for move history");
        }
        for event in &outcome.events {
            serde_json::to_writer(&mut out, event)?;
            writeln!(out)?;
        }
        if outcome.disconnect {
            let event = CubeEvent::Disconnect {
                timestamp: now_millis(),
            };
            serde_json::to_writer(&mut out, &event)?;
            writeln!(out)?;
            info!(line = line_no, "Session ended");
            break;
        }
    }

    out.flush()?;
    Ok(())
}
