//! Path management for dbvault
//!
//! Provides platform path resolution for configuration and the default
//! backup directory.
//!
//! ## Path Resolution Order
//!
//! 1. `DBVAULT_HOME` environment variable (if set)
//! 2. The platform configuration directory reported by `directories`
//!    (`$XDG_CONFIG_HOME/dbvault`, `~/Library/Application Support/dbvault`,
//!    `%APPDATA%\dbvault`)

use std::path::PathBuf;

use directories::ProjectDirs;

use crate::error::VaultError;

/// Environment variable overriding the base directory
pub const HOME_ENV: &str = "DBVAULT_HOME";

/// Manages all paths used by dbvault
#[derive(Debug, Clone)]
pub struct VaultPaths {
    /// Base directory for configuration and default backup storage
    base_dir: PathBuf,
}

impl VaultPaths {
    /// Create a new VaultPaths instance
    ///
    /// # Errors
    ///
    /// Returns an error if no platform configuration directory can be determined.
    pub fn new() -> Result<Self, VaultError> {
        let base_dir = match std::env::var(HOME_ENV) {
            Ok(custom) if !custom.trim().is_empty() => PathBuf::from(custom),
            _ => resolve_default_path()?,
        };

        Ok(Self { base_dir })
    }

    /// Create VaultPaths with a custom base directory (useful for testing)
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Get the base directory
    pub fn base_dir(&self) -> &PathBuf {
        &self.base_dir
    }

    /// Default backup directory when the settings don't name one
    pub fn default_backup_dir(&self) -> PathBuf {
        self.base_dir.join("backups")
    }

    /// Get the path to the settings file
    pub fn settings_file(&self) -> PathBuf {
        self.base_dir.join("config.json")
    }

    /// Ensure the base directory exists
    pub fn ensure_directories(&self) -> Result<(), VaultError> {
        std::fs::create_dir_all(&self.base_dir)
            .map_err(|e| VaultError::Io(format!("Failed to create base directory: {}", e)))
    }
}

fn resolve_default_path() -> Result<PathBuf, VaultError> {
    ProjectDirs::from("", "", "dbvault")
        .map(|dirs| dirs.config_dir().to_path_buf())
        .ok_or_else(|| VaultError::Config("Could not determine a configuration directory".into()))
}
