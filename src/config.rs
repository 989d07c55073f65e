//! Configuration types for the shell runtime.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration for the shell runtime.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ShellConfig {
    /// Remote agent gateway connection.
    pub gateway: GatewayConfig,
    /// Alert / mail polling cadence.
    pub polling: PollingConfig,
    /// Microphone capture settings.
    pub audio: AudioConfig,
    /// Confirmation prompt behaviour.
    pub confirmation: ConfirmationConfig,
}

/// Remote gateway settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Base URL of the agent process (no trailing path).
    pub base_url: String,
    /// Timeout for poll, dismiss and text-turn requests.
    pub request_timeout_secs: u64,
    /// Timeout for audio uploads (transcription + agent answer).
    pub upload_timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8765".to_owned(),
            request_timeout_secs: 30,
            upload_timeout_secs: 120,
        }
    }
}

impl GatewayConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_timeout_secs)
    }
}

/// Polling settings shared by every live collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Seconds between shared ticks.
    pub interval_secs: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self { interval_secs: 5 }
    }
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Audio capture configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Input device name (None = system default).
    pub input_device: Option<String>,
    /// Sample rate of the uploaded recording in Hz.
    pub sample_rate: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_device: None,
            sample_rate: 16_000,
        }
    }
}

/// Confirmation prompt configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfirmationConfig {
    /// Seconds to wait for a decision before answering "no".
    pub timeout_secs: u64,
}

impl Default for ConfirmationConfig {
    fn default() -> Self {
        Self { timeout_secs: 120 }
    }
}

impl ConfirmationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl ShellConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::error::ShellError::Config(e.to_string()))
    }

    /// Load from `path` if it exists, otherwise return defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but is unreadable or invalid.
    pub fn load_or_default(path: &Path) -> crate::error::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let config = Self::from_file(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &Path) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::ShellError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject values the runtime cannot operate with.
    ///
    /// # Errors
    ///
    /// Returns [`ShellError::Config`](crate::error::ShellError::Config) naming the bad field.
    pub fn validate(&self) -> crate::error::Result<()> {
        use crate::error::ShellError;

        if self.gateway.base_url.trim().is_empty() {
            return Err(ShellError::Config("gateway.base_url cannot be empty".into()));
        }
        if self.polling.interval_secs == 0 {
            return Err(ShellError::Config(
                "polling.interval_secs must be at least 1".into(),
            ));
        }
        if self.audio.sample_rate == 0 {
            return Err(ShellError::Config("audio.sample_rate must be non-zero".into()));
        }
        Ok(())
    }

    /// Default config file: `<config dir>/aide/config.toml`.
    ///
    /// The directory is `AIDE_CONFIG_DIR` when set, otherwise the platform
    /// config directory (`~/.config` on Linux, `~/Library/Application Support`
    /// on macOS).
    ///
    /// # Errors
    ///
    /// Returns [`ShellError::Config`](crate::error::ShellError::Config) when the
    /// platform has no config directory and no override is set.
    pub fn default_config_path() -> crate::error::Result<PathBuf> {
        resolve_config_path(
            std::env::var_os("AIDE_CONFIG_DIR").map(PathBuf::from),
            dirs::config_dir(),
        )
    }
}

fn resolve_config_path(
    override_dir: Option<PathBuf>,
    platform_dir: Option<PathBuf>,
) -> crate::error::Result<PathBuf> {
    if let Some(dir) = override_dir {
        return Ok(dir.join("config.toml"));
    }
    platform_dir
        .map(|dir| dir.join("aide").join("config.toml"))
        .ok_or_else(|| {
            crate::error::ShellError::Config(
                "no platform config directory; set AIDE_CONFIG_DIR or AIDE_CONFIG".into(),
            )
        })
}
