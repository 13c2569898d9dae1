//! Configuration and settings management

use crate::controller::SessionConfig;
use crate::model::DeleteOptions;
use crate::pagination::PaginationConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub session: SessionSettings,
    #[serde(default)]
    pub pagination: PaginationSettings,
    #[serde(default)]
    pub cleanup: CleanupSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Seconds without progress before a scan is failed; 0 disables the watchdog
    #[serde(default = "default_stall_timeout_secs")]
    pub stall_timeout_secs: u64,
    #[serde(default = "default_error_display_secs")]
    pub error_display_secs: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            stall_timeout_secs: default_stall_timeout_secs(),
            error_display_secs: default_error_display_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaginationSettings {
    #[serde(default = "default_page_size")]
    pub initial_page_size: u64,
    #[serde(default = "default_page_size")]
    pub page_size: u64,
    #[serde(default = "default_virtualize_threshold")]
    pub virtualize_threshold: u64,
}

impl Default for PaginationSettings {
    fn default() -> Self {
        Self {
            initial_page_size: default_page_size(),
            page_size: default_page_size(),
            virtualize_threshold: default_virtualize_threshold(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanupSettings {
    #[serde(default = "default_move_to_recycle_bin")]
    pub move_to_recycle_bin: bool,
}

impl Default for CleanupSettings {
    fn default() -> Self {
        Self {
            move_to_recycle_bin: default_move_to_recycle_bin(),
        }
    }
}

fn default_stall_timeout_secs() -> u64 {
    300
}

fn default_error_display_secs() -> u64 {
    5
}

fn default_page_size() -> u64 {
    100
}

fn default_virtualize_threshold() -> u64 {
    200
}

fn default_move_to_recycle_bin() -> bool {
    true
}

impl Settings {
    /// Load settings from a file, or return defaults if file doesn't exist
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings from {}", path.display()))?;

        let settings: Settings = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse settings from {}", path.display()))?;

        Ok(settings)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }

        let contents = self.to_toml()?;

        std::fs::write(path, contents)
            .with_context(|| format!("Failed to write settings to {}", path.display()))?;

        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize settings")
    }

    /// `<config dir>/tidyscan/settings.toml`
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tidyscan")
            .join("settings.toml")
    }

    /// Expand `~` in a user-supplied path
    pub fn resolve_path(raw: &str) -> PathBuf {
        PathBuf::from(shellexpand::tilde(raw).to_string())
    }

    pub fn session_config(&self) -> SessionConfig {
        let stall = self.session.stall_timeout_secs;
        SessionConfig {
            stall_timeout: (stall > 0).then(|| Duration::from_secs(stall)),
            error_display: Duration::from_secs(self.session.error_display_secs),
        }
    }

    pub fn pagination_config(&self) -> PaginationConfig {
        PaginationConfig {
            initial_page_size: self.pagination.initial_page_size.max(1),
            page_size: self.pagination.page_size.max(1),
            virtualize_threshold: self.pagination.virtualize_threshold,
        }
    }

    pub fn delete_options(&self) -> DeleteOptions {
        DeleteOptions {
            move_to_recycle_bin: self.cleanup.move_to_recycle_bin,
        }
    }
}

mod dirs {
    use std::path::PathBuf;

    pub fn config_dir() -> Option<PathBuf> {
        #[cfg(target_os = "macos")]
        {
            std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config"))
        }
        #[cfg(target_os = "linux")]
        {
            std::env::var_os("XDG_CONFIG_HOME")
                .map(PathBuf::from)
                .or_else(|| {
                    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config"))
                })
        }
        #[cfg(target_os = "windows")]
        {
            std::env::var_os("APPDATA").map(PathBuf::from)
        }
        #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
        {
            None
        }
    }
}
