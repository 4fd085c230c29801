//! Application configuration loaded from defaults, a TOML file and the environment.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::save::SaveManager;

/// Directory under `~/.config` holding the configuration file.
pub const CONFIG_DIR: &str = "wormhole-chests";
/// Configuration file name.
pub const CONFIG_FILE: &str = "config.toml";
/// Prefix for environment overrides, e.g. `WORMHOLE_FREE_MODE=true`.
pub const ENV_PREFIX: &str = "WORMHOLE";

const DEFAULT_CONFIG: &str = r#"# Wormhole chests configuration.

# Disables the cost of creating or linking wormhole chests. Cheat, not recommended.
free_mode = false

# Whether the wormhole unlock is active. When false every chest behaves normally.
enabled = true

# Directory holding one folder of save files per world.
# data_root = "/path/to/WormholeChests"

[layout]
# Horizontal position of the channel box in a chest's GUI.
channel_box_x_offset = 32.0
# Vertical position of the channel box in a chest's GUI.
channel_box_y_offset = -355.0
# Width of the channel box in a chest's GUI.
channel_box_width = 240.0
# Horizontal position of the Create / Link button in a chest's GUI.
create_button_x_offset = 444.0
"#;

/// Placement of the channel form drawn by the host GUI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    /// Horizontal offset of the channel box from screen centre.
    pub channel_box_x_offset: f32,
    /// Vertical offset of the channel box from screen centre.
    pub channel_box_y_offset: f32,
    /// Width of the channel box and the create/link button.
    pub channel_box_width: f32,
    /// Offset of the create/link button from the channel box.
    pub create_button_x_offset: f32,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            channel_box_x_offset: 32.0,
            channel_box_y_offset: -355.0,
            channel_box_width: 240.0,
            create_button_x_offset: 444.0,
        }
    }
}

/// Runtime configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Waive the create/link cost.
    pub free_mode: bool,
    /// Unlock gate; when false the service ignores every host event.
    pub enabled: bool,
    /// Override for the save root.
    pub data_root: Option<PathBuf>,
    /// GUI layout, passed through to the host.
    pub layout: LayoutConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            free_mode: false,
            enabled: true,
            data_root: None,
            layout: LayoutConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load from the default config file and the environment.
    pub fn load() -> Result<Self> {
        Self::load_from(config_path())
    }

    /// Load from `path` (optional) and the environment.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let settings = Config::builder()
            .add_source(
                File::from(path)
                    .format(FileFormat::Toml)
                    .required(false),
            )
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("failed to read config {}", path.display()))?;
        settings
            .try_deserialize()
            .with_context(|| format!("failed to parse config {}", path.display()))
    }

    /// Directory holding per-world save folders.
    pub fn save_root(&self) -> PathBuf {
        self.data_root
            .clone()
            .unwrap_or_else(SaveManager::default_root)
    }
}

/// Location of the configuration file.
pub fn config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CONFIG_DIR)
        .join(CONFIG_FILE)
}

/// Directory for log files, kept apart from the save root so no world name
/// can collide with it.
pub fn log_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CONFIG_DIR)
        .join("logs")
}

/// Write a commented default configuration if none exists yet.
pub fn ensure_default_config() -> Result<PathBuf> {
    let path = config_path();
    write_default_config(&path)?;
    Ok(path)
}

/// Write the default configuration to `path` unless the file already exists.
pub fn write_default_config(path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    if path.exists() {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(path, DEFAULT_CONFIG).with_context(|| format!("failed to write {}", path.display()))
}
