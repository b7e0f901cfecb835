//! User settings
//!
//! Loaded once from `lobbynet.toml`. Every field has a default so a missing
//! or partial file still yields a usable configuration.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::variant::HostVariant;

/// Default lobby server port
pub const DEFAULT_SERVER_PORT: u16 = 61111;

/// Settings file name inside the config directory
pub const SETTINGS_FILE: &str = "lobbynet.toml";

/// Top-level settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Enables debug entries in the subsystem log files
    pub debug_mode: bool,
    /// Which build of the host we run inside
    pub host_variant: HostVariant,
    /// Where subsystem log files are written. Defaults to the data directory.
    pub log_dir: Option<PathBuf>,
    pub lobby: LobbySettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            debug_mode: false,
            host_variant: HostVariant::Akella,
            log_dir: None,
            lobby: LobbySettings::default(),
        }
    }
}

/// Lobby connection settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LobbySettings {
    pub server: ServerSettings,
    pub client: ClientSettings,
}

/// Lobby server endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub ip: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            ip: "127.0.0.1".to_string(),
            port: DEFAULT_SERVER_PORT,
        }
    }
}

/// Local peer endpoint
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    /// Local port the peer listens on. 0 picks an ephemeral port.
    pub port: u16,
}

impl Settings {
    /// Parse settings from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Load settings from a file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Load settings, falling back to defaults if the file does not exist
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::from_toml_str(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "Settings file not found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Default settings file location
    pub fn default_path() -> Result<PathBuf> {
        Ok(project_dirs()?.config_dir().join(SETTINGS_FILE))
    }

    /// Directory subsystem log files go to
    pub fn resolved_log_dir(&self) -> Result<PathBuf> {
        match &self.log_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(project_dirs()?.data_dir().to_path_buf()),
        }
    }

    /// Lobby server address as `ip:port`
    pub fn server_endpoint(&self) -> String {
        format!("{}:{}", self.lobby.server.ip, self.lobby.server.port)
    }
}

fn project_dirs() -> Result<ProjectDirs> {
    ProjectDirs::from("dev", "onyx", "lobbynet").ok_or(Error::NoDataDir)
}
