//! TOML configuration for the editor.
//!
//! Read from an explicit path or the platform-appropriate config file:
//! - Windows:  `%APPDATA%\TunnelMap\config.toml`
//! - Linux:    `~/.config/tunnelmap/config.toml`
//! - macOS:    `~/Library/Application Support/TunnelMap/config.toml`
//!
//! ```toml
//! [editor]
//! log_level = "info"
//! preflight_timeout_secs = 10
//! handshake_timeout_secs = 25
//! error_message_limit = 120
//!
//! [[masters]]
//! id = "m1"
//! name = "edge-a"
//! api_url = "https://master1.example.com:9090/api"
//! api_key = "secret"
//! ```
//!
//! Every field has a `#[serde(default = "...")]`, so a missing file or a file
//! with only some keys still yields a usable configuration.  The file is only
//! ever read; credentials are never written back.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use tunnelmap_core::{LogLevel, MasterConfig};

use crate::application::submit::SubmitSettings;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level editor configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EditorConfig {
    #[serde(default)]
    pub editor: EditorSettings,
    #[serde(default)]
    pub masters: Vec<MasterEntry>,
}

/// Behaviour of the editor and its submission cycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EditorSettings {
    /// `tracing` level used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// How long the preflight check waits for the first event.
    #[serde(default = "default_preflight_timeout_secs")]
    pub preflight_timeout_secs: u64,
    /// How long the handshake listener waits for a confirmation line.
    #[serde(default = "default_handshake_timeout_secs")]
    pub handshake_timeout_secs: u64,
    /// Provider error messages longer than this are cut for display.
    #[serde(default = "default_error_message_limit")]
    pub error_message_limit: usize,
}

/// A configured control API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MasterEntry {
    pub id: String,
    /// Display name; the id is used when empty.
    #[serde(default)]
    pub name: String,
    pub api_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_master_log_level")]
    pub default_log_level: LogLevel,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_preflight_timeout_secs() -> u64 {
    10
}
fn default_handshake_timeout_secs() -> u64 {
    25
}
fn default_error_message_limit() -> usize {
    120
}
fn default_master_log_level() -> LogLevel {
    LogLevel::Info
}

impl Default for EditorSettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            preflight_timeout_secs: default_preflight_timeout_secs(),
            handshake_timeout_secs: default_handshake_timeout_secs(),
            error_message_limit: default_error_message_limit(),
        }
    }
}

impl EditorSettings {
    pub fn submit_settings(&self) -> SubmitSettings {
        SubmitSettings {
            preflight_timeout: Duration::from_secs(self.preflight_timeout_secs),
            handshake_timeout: Duration::from_secs(self.handshake_timeout_secs),
            error_message_limit: self.error_message_limit,
        }
    }
}

impl MasterEntry {
    pub fn to_master_config(&self) -> MasterConfig {
        let mut config = MasterConfig::new(self.id.clone(), self.api_url.clone())
            .with_api_key(self.api_key.clone());
        if !self.name.trim().is_empty() {
            config.name = self.name.clone();
        }
        config.default_log_level = self.default_log_level;
        config
    }
}

impl EditorConfig {
    pub fn master_configs(&self) -> Vec<MasterConfig> {
        self.masters.iter().map(MasterEntry::to_master_config).collect()
    }
}

// ── Loading ───────────────────────────────────────────────────────────────────

/// Resolves the full path to the default config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot be
/// determined.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(platform_config_dir()
        .ok_or(ConfigError::NoPlatformConfigDir)?
        .join("config.toml"))
}

/// Loads the configuration from `path`, or from [`config_file_path`] when
/// `path` is `None`.  A missing file yields [`EditorConfig::default`].
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: Option<&Path>) -> Result<EditorConfig, ConfigError> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => config_file_path()?,
    };

    match std::fs::read_to_string(&path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(EditorConfig::default()),
        Err(e) => Err(ConfigError::Io { path, source: e }),
    }
}

/// Resolves the platform config directory including the `TunnelMap` subdirectory.
fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("TunnelMap"))
    }

    #[cfg(target_os = "linux")]
    {
        // XDG_CONFIG_HOME or ~/.config
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("tunnelmap"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("TunnelMap")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
