// SMB Launcher - Settings Module
// Base directory resolution and optional settings.toml

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

/// Environment variable overriding the base directory
pub const HOME_ENV: &str = "SMB_LAUNCHER_HOME";

const APP_DIR_NAME: &str = "smb-launcher";
const PROFILES_FILE: &str = "server_config.json";
const SETTINGS_FILE: &str = "settings.toml";

/// Locations of the persisted files, resolved once at startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppPaths {
    base_dir: PathBuf,
}

impl AppPaths {
    /// Resolve the base directory: explicit override, then `SMB_LAUNCHER_HOME`,
    /// then the platform config directory.
    pub fn resolve(override_dir: Option<PathBuf>) -> Result<Self> {
        if let Some(dir) = override_dir {
            return Ok(Self::at(dir));
        }

        if let Some(dir) = std::env::var_os(HOME_ENV).filter(|v| !v.is_empty()) {
            return Ok(Self::at(PathBuf::from(dir)));
        }

        let config_dir = dirs::config_dir()
            .ok_or_else(|| Error::Config("Could not determine config directory".to_string()))?;
        Ok(Self::at(config_dir.join(APP_DIR_NAME)))
    }

    pub fn at(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Path of the JSON profile list
    pub fn profiles_file(&self) -> PathBuf {
        self.base_dir.join(PROFILES_FILE)
    }

    /// Path of the optional settings file
    pub fn settings_file(&self) -> PathBuf {
        self.base_dir.join(SETTINGS_FILE)
    }
}

/// Connection and mount settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Settings {
    /// Directory under which shares are expected to be mounted
    #[serde(default = "default_mount_root")]
    pub mount_root: PathBuf,

    /// SMB port used when the address has none (445 direct, 139 NetBIOS)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Bound on TCP connect and on each read/write, in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// NTLM domain used when the username has no `DOMAIN\` prefix
    #[serde(default)]
    pub workgroup: String,

    /// Open the mounted share in the file manager after connecting
    #[serde(default = "default_open_browser")]
    pub open_browser: bool,
}

fn default_mount_root() -> PathBuf {
    if cfg!(target_os = "macos") {
        PathBuf::from("/Volumes")
    } else {
        PathBuf::from("/mnt")
    }
}

fn default_port() -> u16 {
    crate::smb::DEFAULT_PORT
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_open_browser() -> bool {
    true
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            mount_root: default_mount_root(),
            port: default_port(),
            connect_timeout_secs: default_connect_timeout(),
            workgroup: String::new(),
            open_browser: default_open_browser(),
        }
    }
}

impl Settings {
    /// Load settings from file, falling back to defaults when it is absent
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No settings file at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)?;
        let settings: Self = toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))?;

        settings.validate()?;
        debug!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(Error::Config("Port must be greater than 0".to_string()));
        }
        if self.connect_timeout_secs == 0 {
            return Err(Error::Config(
                "connect_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.mount_root.as_os_str().is_empty() {
            return Err(Error::Config("mount_root cannot be empty".to_string()));
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}
