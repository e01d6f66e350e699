use crate::domain::models::BdAddr;
use anyhow::Context;
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
    "btwindrx".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

/// Which transport reaches the wind station
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Native Bluetooth RFCOMM socket
    Rfcomm,
    /// Serial-over-TCP bridge in front of the RFCOMM link
    Tcp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkSettings {
    #[serde(default = "default_transport")]
    pub transport: TransportKind,
    #[serde(default = "default_device_address")]
    pub device_address: String,
    #[serde(default = "default_rfcomm_channel")]
    pub rfcomm_channel: u8,
    #[serde(default = "default_tcp_address")]
    pub tcp_address: String,

    // Timing
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    #[serde(default = "default_backoff_initial_ms")]
    pub backoff_initial_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    #[serde(default = "default_backoff_jitter_ms")]
    pub backoff_jitter_ms: u64,

    #[serde(default = "default_max_frame_len")]
    pub max_frame_len: usize,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            transport: default_transport(),
            device_address: default_device_address(),
            rfcomm_channel: default_rfcomm_channel(),
            tcp_address: default_tcp_address(),
            connect_timeout_ms: default_connect_timeout_ms(),
            read_timeout_ms: default_read_timeout_ms(),
            backoff_initial_ms: default_backoff_initial_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            backoff_jitter_ms: default_backoff_jitter_ms(),
            max_frame_len: default_max_frame_len(),
        }
    }
}

impl LinkSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// Reject combinations the link cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.read_timeout_ms == 0 {
            anyhow::bail!("read_timeout_ms must be greater than zero");
        }
        if self.backoff_max_ms < self.backoff_initial_ms {
            anyhow::bail!(
                "backoff_max_ms ({}) is below backoff_initial_ms ({})",
                self.backoff_max_ms,
                self.backoff_initial_ms
            );
        }
        if self.max_frame_len < 2 {
            anyhow::bail!("max_frame_len must allow at least an empty object");
        }
        if self.transport == TransportKind::Rfcomm {
            self.device_address
                .parse::<BdAddr>()
                .with_context(|| format!("invalid device_address {:?}", self.device_address))?;
        }
        Ok(())
    }
}

fn default_transport() -> TransportKind {
    TransportKind::Rfcomm
}
fn default_device_address() -> String {
    "00:18:E4:0C:68:00".to_string()
}
fn default_rfcomm_channel() -> u8 {
    1
}
fn default_tcp_address() -> String {
    "127.0.0.1:7777".to_string()
}
fn default_connect_timeout_ms() -> u64 {
    10_000
}
fn default_read_timeout_ms() -> u64 {
    100
}
fn default_backoff_initial_ms() -> u64 {
    500
}
fn default_backoff_max_ms() -> u64 {
    30_000
}
fn default_backoff_jitter_ms() -> u64 {
    250
}
fn default_max_frame_len() -> usize {
    1024
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub link: LinkSettings,

    // Logging Settings
    #[serde(default)]
    pub log_settings: LogSettings,
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
    /// Why the file on disk was ignored; logging is not up yet at load time
    load_error: Option<anyhow::Error>,
}

impl SettingsService {
    /// Load from the default location under the user's config directory.
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        Ok(Self::load(settings_path))
    }

    /// Load from an explicit path. A missing or unreadable file yields
    /// defaults; the reason is kept in [`Self::load_error`].
    pub fn load(settings_path: PathBuf) -> Self {
        let (settings, load_error) = if settings_path.exists() {
            match Self::load_from_file(&settings_path) {
                Ok(settings) => (settings, None),
                Err(e) => (Settings::default(), Some(e)),
            }
        } else {
            (Settings::default(), None)
        };

        Self {
            settings,
            settings_path,
            load_error,
        }
    }

    pub fn load_error(&self) -> Option<&anyhow::Error> {
        self.load_error.as_ref()
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("btwindrx");
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &Path) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    /// Write the current settings. Refuses to replace a file that failed to
    /// load, so a typo never turns into a file full of defaults.
    pub fn save(&self) -> anyhow::Result<()> {
        if let Some(e) = &self.load_error {
            anyhow::bail!(
                "not overwriting {}: it could not be loaded ({:#})",
                self.settings_path.display(),
                e
            );
        }
        if let Some(parent) = self.settings_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)
            .with_context(|| format!("writing {}", self.settings_path.display()))?;
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
}
