//! Application configuration management

use anyhow::{Context, Result, anyhow};
use monitor::MonitorConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub general: GeneralSettings,
    /// Poll loop and metadata lookup tuning
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub tui: TuiSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneralSettings {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "GeneralSettings::default_log_level")]
    pub log_level: String,
    /// Write logs to this file instead of stderr (`~` is expanded)
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
            log_file: None,
        }
    }
}

impl GeneralSettings {
    fn default_log_level() -> String {
        "info".to_string()
    }
}

/// Interactive terminal UI settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TuiSettings {
    /// Redraw interval in milliseconds
    #[serde(default = "TuiSettings::default_tick_rate")]
    pub tick_rate_ms: u64,
    /// Share of the screen height given to the device tree (0 < ratio < 1)
    #[serde(default = "TuiSettings::default_split_ratio")]
    pub split_ratio: f64,
}

impl Default for TuiSettings {
    fn default() -> Self {
        Self {
            tick_rate_ms: Self::default_tick_rate(),
            split_ratio: Self::default_split_ratio(),
        }
    }
}

impl TuiSettings {
    fn default_tick_rate() -> u64 {
        250
    }

    fn default_split_ratio() -> f64 {
        0.7
    }

    pub fn tick_rate(&self) -> Duration {
        Duration::from_millis(self.tick_rate_ms)
    }
}

impl AppConfig {
    /// Load configuration from the specified path
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            expand_path(&p)
        } else {
            // Try standard locations in order
            let candidates = vec![
                Self::default_path(),
                PathBuf::from("/etc/usb-tree/config.toml"),
            ];

            candidates
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found, using defaults"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config = Self::parse(&content)
            .with_context(|| format!("Invalid config file: {}", config_path.display()))?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to load config: {:#}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Parse and validate a TOML document
    pub fn parse(content: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(content).context("Failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        // Create parent directories if they don't exist
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("usb-tree").join("config.toml")
        } else {
            PathBuf::from(".config/usb-tree/config.toml")
        }
    }

    /// Log file used by the TUI when none is configured
    pub fn default_log_file() -> PathBuf {
        if let Some(data_dir) = dirs::data_local_dir() {
            data_dir.join("usb-tree").join("usb-tree.log")
        } else {
            PathBuf::from("/tmp/usb-tree.log")
        }
    }

    /// Configured log file with `~` expanded
    pub fn log_file(&self) -> Option<PathBuf> {
        self.general.log_file.as_deref().map(expand_path)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        validate_log_level(&self.general.log_level)?;

        self.monitor
            .validate()
            .map_err(|e| anyhow!("Invalid [monitor] section: {}", e))?;

        if self.tui.tick_rate_ms == 0 {
            return Err(anyhow!("tick_rate_ms must be greater than 0"));
        }
        if !(self.tui.split_ratio > 0.0 && self.tui.split_ratio < 1.0) {
            return Err(anyhow!(
                "split_ratio must be between 0 and 1 (exclusive), got {}",
                self.tui.split_ratio
            ));
        }

        Ok(())
    }
}

/// Check a log level given in the config file or on the command line
pub fn validate_log_level(level: &str) -> Result<()> {
    if !VALID_LOG_LEVELS.contains(&level) {
        return Err(anyhow!(
            "Invalid log level '{}', must be one of: {}",
            level,
            VALID_LOG_LEVELS.join(", ")
        ));
    }
    Ok(())
}

/// Expand a leading `~` in a path
pub fn expand_path(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    PathBuf::from(shellexpand::tilde(raw.as_ref()).as_ref())
}
