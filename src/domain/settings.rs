use crate::domain::models::CubeCommand;
use crate::domain::sequencer::SequencerConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Logging outputs. Every field is optional in the settings file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// `EnvFilter` directive, e.g. `info` or `gan_cube_protocol=debug`
    pub level: String,
    pub console_logging_enabled: bool,
    pub file_logging_enabled: bool,
    pub log_dir: PathBuf,
    pub file_name_prefix: String,
    /// "minutely", "hourly", "daily" or "never"
    pub rotation: String,
    pub show_target: bool,
    pub show_thread_ids: bool,
    pub show_file_line: bool,
    pub ansi_colors: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            console_logging_enabled: true,
            file_logging_enabled: false,
            log_dir: PathBuf::from("logs"),
            file_name_prefix: "gan_cube".to_string(),
            rotation: "daily".to_string(),
            show_target: true,
            show_thread_ids: false,
            show_file_line: false,
            ansi_colors: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    // Logging Settings
    #[serde(default)]
    pub log_settings: LogSettings,

    // Move sequencing
    #[serde(default = "default_move_buffer_limit")]
    pub move_buffer_limit: usize,
    #[serde(default = "default_missed_move_window_ms")]
    pub missed_move_window_ms: i64,

    // Connection Settings
    #[serde(default = "default_mac_advertisement_timeout_ms")]
    pub mac_advertisement_timeout_ms: u64,
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
    #[serde(default = "default_initial_commands")]
    pub initial_commands: Vec<CubeCommand>,

    // Debug Settings
    #[serde(default)]
    pub debug_raw_data_logging: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_settings: LogSettings::default(),
            move_buffer_limit: default_move_buffer_limit(),
            missed_move_window_ms: default_missed_move_window_ms(),
            mac_advertisement_timeout_ms: default_mac_advertisement_timeout_ms(),
            event_channel_capacity: default_event_channel_capacity(),
            initial_commands: default_initial_commands(),
            debug_raw_data_logging: false,
        }
    }
}

impl Settings {
    /// Sequencer tuning; history support is filled in per generation
    pub fn sequencer_config(&self) -> SequencerConfig {
        SequencerConfig {
            move_buffer_limit: self.move_buffer_limit,
            missed_move_window_ms: self.missed_move_window_ms,
            ..SequencerConfig::default()
        }
    }
}

fn default_move_buffer_limit() -> usize {
    16
}
fn default_missed_move_window_ms() -> i64 {
    500
}
fn default_mac_advertisement_timeout_ms() -> u64 {
    10_000
}
fn default_event_channel_capacity() -> usize {
    256
}
fn default_initial_commands() -> Vec<CubeCommand> {
    vec![
        CubeCommand::RequestHardware,
        CubeCommand::RequestFacelets,
        CubeCommand::RequestBattery,
    ]
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        Ok(Self::with_path(settings_path))
    }

    /// Load from an explicit path, falling back to defaults when the file
    /// is missing or unreadable
    pub fn with_path(settings_path: PathBuf) -> Self {
        let settings = Self::load_from_file(&settings_path).unwrap_or_default();
        Self {
            settings,
            settings_path,
        }
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("GanCube");
        fs::create_dir_all(&path)?;
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &Path) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)?;
        Ok(())
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn get_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_fields_use_defaults() {
        let settings: Settings = serde_json::from_str(r#"{"move_buffer_limit": 32}"#).unwrap();
        assert_eq!(settings.move_buffer_limit, 32);
        assert_eq!(settings.missed_move_window_ms, 500);
        assert_eq!(settings.mac_advertisement_timeout_ms, 10_000);
        assert_eq!(settings.log_settings.level, "info");
        assert_eq!(settings.initial_commands.len(), 3);
    }

    #[test]
    fn test_sequencer_config_from_settings() {
        let settings = Settings {
            move_buffer_limit: 8,
            missed_move_window_ms: 250,
            ..Settings::default()
        };
        let config = settings.sequencer_config();
        assert_eq!(config.move_buffer_limit, 8);
        assert_eq!(config.missed_move_window_ms, 250);
        assert!(config.history_supported);
    }

    #[test]
    fn test_save_and_reload() {
        let path = std::env::temp_dir().join(format!("gan_cube_settings_{}.json", std::process::id()));
        let mut service = SettingsService::with_path(path.clone());
        service.get_mut().event_channel_capacity = 64;
        service.save().unwrap();

        let reloaded = SettingsService::with_path(path.clone());
        assert_eq!(reloaded.get().event_channel_capacity, 64);
        let _ = fs::remove_file(path);
    }
}
