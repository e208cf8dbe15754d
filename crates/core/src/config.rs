//! Application Configuration
//!
//! Settings that come from `config.toml`:
//! - where the adb executable lives and which arguments it always gets
//! - poll intervals used while waiting for a web view to appear

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{DroidlinkError, Result};

/// ADB configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdbConfig {
    /// Path or command name of adb. Supports `$VAR`, `~/` and `./` forms.
    pub executable_path: Option<String>,
    /// Arguments placed before every adb command (e.g. `["-H", "10.0.0.5"]`)
    pub extra_args: Vec<String>,
    /// Android SDK root; `platform-tools/adb` inside it is used when
    /// `executable_path` is not set
    pub sdk_path: Option<PathBuf>,
}

impl AdbConfig {
    /// The executable as configured, before path resolution
    pub fn executable(&self) -> String {
        if let Some(ref path) = self.executable_path {
            return path.clone();
        }
        if let Some(ref sdk) = self.sdk_path {
            let adb = if cfg!(windows) { "adb.exe" } else { "adb" };
            return sdk.join("platform-tools").join(adb).to_string_lossy().to_string();
        }
        "adb".to_string()
    }
}

/// Debug attach configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    /// Interval between searches of all devices for a package
    pub package_poll_interval_ms: u64,
    /// Interval between searches of a single device
    pub webview_poll_interval_ms: u64,
    /// How long to wait for a web view on a single device when the
    /// request carries no `connectTimeout`
    pub default_webview_timeout_ms: u64,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            package_poll_interval_ms: 500,
            webview_poll_interval_ms: 1000,
            default_webview_timeout_ms: 1000,
        }
    }
}

/// Main application configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Configuration version for migrations
    pub version: u32,
    pub adb: AdbConfig,
    pub debug: DebugConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            version: 1,
            adb: AdbConfig::default(),
            debug: DebugConfig::default(),
        }
    }
}

impl AppConfig {
    /// Get the configuration directory path
    pub fn config_dir() -> Option<PathBuf> {
        ProjectDirs::from("dev", "droidlink", "droidlink")
            .map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the configuration file path
    pub fn config_file() -> Option<PathBuf> {
        Self::config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Load configuration from the default location, writing defaults on
    /// first run
    pub async fn load() -> Result<Self> {
        let config_file = Self::config_file()
            .ok_or_else(|| DroidlinkError::Config("Cannot determine config path".into()))?;
        Self::load_from(&config_file).await
    }

    /// Load configuration from `path`, creating it with defaults if missing
    pub async fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            debug!("Loading config from {:?}", path);
            let contents = tokio::fs::read_to_string(path).await?;
            let config: AppConfig = toml::from_str(&contents)?;
            Ok(config)
        } else {
            info!("Config file not found, using defaults");
            let config = AppConfig::default();
            config.save_to(path).await?;
            Ok(config)
        }
    }

    /// Save configuration to the default location
    pub async fn save(&self) -> Result<()> {
        let config_file = Self::config_file()
            .ok_or_else(|| DroidlinkError::Config("Cannot determine config path".into()))?;
        self.save_to(&config_file).await
    }

    /// Save configuration to `path`
    pub async fn save_to(&self, path: &Path) -> Result<()> {
        // Ensure directory exists
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let contents = toml::to_string_pretty(self)?;
        tokio::fs::write(path, contents).await?;

        debug!("Config saved to {:?}", path);
        Ok(())
    }
}
