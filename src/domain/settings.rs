use crate::domain::grid::{GridDimensions, GridIndexing, BOLT_ON_HEIGHT, BOLT_ON_WIDTH};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_false")]
    pub file_logging_enabled: bool,
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_prefix")]
    pub file_name_prefix: String,
    #[serde(default = "default_false")]
    pub show_file_line: bool,
    #[serde(default = "default_false")]
    pub show_thread_ids: bool,
    #[serde(default = "default_true")]
    pub show_target: bool,
    #[serde(default = "default_true")]
    pub ansi_colors: bool,
    #[serde(default = "default_rotation")]
    pub rotation: String, // "daily", "hourly", "minutely", "never"
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            file_logging_enabled: default_false(),
            console_logging_enabled: default_true(),
            log_dir: default_log_dir(),
            file_name_prefix: default_prefix(),
            show_file_line: default_false(),
            show_thread_ids: default_false(),
            show_target: default_true(),
            ansi_colors: default_true(),
            rotation: default_rotation(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_log_dir() -> String {
    "logs".to_string()
}
fn default_prefix() -> String {
    "kilter_connector".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    // Logging Settings
    #[serde(default)]
    pub log_settings: LogSettings,

    // Board
    #[serde(default)]
    pub last_peer_address: Option<String>,
    #[serde(default = "default_color")]
    pub default_color: String,

    // Catalog Settings
    #[serde(default)]
    pub catalog_path: Option<PathBuf>,
    #[serde(default = "default_layout_id")]
    pub layout_id: i64,
    #[serde(default = "default_product_id")]
    pub product_id: i64,
    #[serde(default = "default_product_size_id")]
    pub product_size_id: i64,

    // Grid Settings
    #[serde(default = "default_grid_width")]
    pub grid_width: usize,
    #[serde(default = "default_grid_height")]
    pub grid_height: usize,
    #[serde(default)]
    pub grid_indexing: GridIndexing,

    // Advanced BLE Settings
    #[serde(default = "default_service_uuid")]
    pub ble_service_uuid: String,
    #[serde(default = "default_write_uuid")]
    pub ble_write_char_uuid: String,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_frame_delay_ms")]
    pub inter_frame_delay_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_scan_duration_ms")]
    pub scan_duration_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_settings: LogSettings::default(),

            last_peer_address: None,
            default_color: default_color(),

            catalog_path: None,
            layout_id: default_layout_id(),
            product_id: default_product_id(),
            product_size_id: default_product_size_id(),

            grid_width: default_grid_width(),
            grid_height: default_grid_height(),
            grid_indexing: GridIndexing::default(),

            ble_service_uuid: default_service_uuid(),
            ble_write_char_uuid: default_write_uuid(),
            chunk_size: default_chunk_size(),
            inter_frame_delay_ms: default_frame_delay_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            scan_duration_ms: default_scan_duration_ms(),
        }
    }
}

impl Settings {
    pub fn grid_dimensions(&self) -> GridDimensions {
        GridDimensions {
            width: self.grid_width,
            height: self.grid_height,
        }
    }

    pub fn inter_frame_delay(&self) -> Duration {
        Duration::from_millis(self.inter_frame_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn scan_duration(&self) -> Duration {
        Duration::from_millis(self.scan_duration_ms)
    }
}

fn default_color() -> String {
    "FF0000".to_string()
}
fn default_layout_id() -> i64 {
    1
}
fn default_product_id() -> i64 {
    1
}
fn default_product_size_id() -> i64 {
    28
}
fn default_grid_width() -> usize {
    BOLT_ON_WIDTH
}
fn default_grid_height() -> usize {
    BOLT_ON_HEIGHT
}
fn default_service_uuid() -> String {
    "6e400001-b5a3-f393-e0a9-e50e24dcca9e".to_string()
}
fn default_write_uuid() -> String {
    "6e400002-b5a3-f393-e0a9-e50e24dcca9e".to_string()
}
fn default_chunk_size() -> usize {
    20
}
fn default_frame_delay_ms() -> u64 {
    400
}
fn default_connect_timeout_ms() -> u64 {
    10_000
}
fn default_scan_duration_ms() -> u64 {
    5_000
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        Ok(Self::at(settings_path))
    }

    /// Use an explicit settings file; missing or unreadable files fall back to defaults
    pub fn at(settings_path: PathBuf) -> Self {
        let settings = Self::load_from_file(&settings_path).unwrap_or_default();
        Self {
            settings,
            settings_path,
        }
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("KilterConnector");
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
        if let Some(parent) = self.settings_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.settings_path
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn get_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    pub fn remember_peer(&mut self, address: &str) -> anyhow::Result<()> {
        if self.settings.last_peer_address.as_deref() != Some(address) {
            self.settings.last_peer_address = Some(address.to_string());
            self.save()?;
        }
        Ok(())
    }
}
