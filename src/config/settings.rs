//! Settings for dbvault
//!
//! Manages the process-wide configuration: where artifacts live, how many are
//! retained, when the scheduled backup fires, and how the external dump and
//! restore utilities are invoked. Settings are read once at startup from
//! `config.json` and then overridden by environment variables.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::paths::VaultPaths;
use crate::error::VaultError;
use crate::scheduler::CronSchedule;

/// Cron expression used when none is configured or the configured one is invalid
pub const DEFAULT_SCHEDULE: &str = "0 2 * * *";

/// Default number of artifacts kept by retention
pub const DEFAULT_MAX_BACKUPS: usize = 30;

/// Default cap on captured subprocess output (stdout + stderr)
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024;

const ENV_BACKUP_DIR: &str = "DBVAULT_BACKUP_DIR";
const ENV_MAX_BACKUPS: &str = "DBVAULT_MAX_BACKUPS";
const ENV_SCHEDULE: &str = "DBVAULT_SCHEDULE";
const ENV_SCHEDULE_ENABLED: &str = "DBVAULT_SCHEDULE_ENABLED";
const ENV_DATABASE_URL: &str = "DATABASE_URL";

/// How an external utility is invoked
///
/// Arguments may contain the placeholders `{target}` (connection target),
/// `{output}` (dump destination) and `{input}` (restore source).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSettings {
    /// Program name or path
    pub program: String,
    /// Argument template
    #[serde(default)]
    pub args: Vec<String>,
    /// Hard deadline for the subprocess
    pub timeout_secs: u64,
}

impl CommandSettings {
    /// Default `pg_dump` invocation
    pub fn default_dump() -> Self {
        Self {
            program: "pg_dump".to_string(),
            args: vec![
                "--dbname={target}".to_string(),
                "--file={output}".to_string(),
                "--no-owner".to_string(),
                "--no-acl".to_string(),
            ],
            timeout_secs: 5 * 60,
        }
    }

    /// Default `psql` invocation
    pub fn default_restore() -> Self {
        Self {
            program: "psql".to_string(),
            args: vec![
                "--dbname={target}".to_string(),
                "--file={input}".to_string(),
                "--single-transaction".to_string(),
                "--set".to_string(),
                "ON_ERROR_STOP=1".to_string(),
            ],
            timeout_secs: 10 * 60,
        }
    }

    /// Timeout as a Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Scheduled backup settings as written in the config file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleSettings {
    /// 5-field cron expression, evaluated in UTC
    #[serde(default = "default_cron")]
    pub cron: String,
    /// Whether the scheduled backup runs at all
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            cron: default_cron(),
            enabled: true,
        }
    }
}

/// Admin HTTP listener settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8085,
        }
    }
}

/// Validated schedule configuration, built once at startup
#[derive(Debug, Clone)]
pub struct ScheduleConfig {
    /// Parsed schedule (the default when the configured one was invalid)
    pub schedule: CronSchedule,
    /// Whether scheduled backups are enabled
    pub enabled: bool,
    /// Maximum number of artifacts kept
    pub max_backups: usize,
}

/// Settings for dbvault
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Schema version for migration support
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,

    /// Artifact directory; defaults to `<base>/backups`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_dir: Option<PathBuf>,

    /// Maximum number of artifacts kept after each create
    #[serde(default = "default_max_backups")]
    pub max_backups: usize,

    /// Scheduled backup settings
    #[serde(default)]
    pub schedule: ScheduleSettings,

    /// Connection target handed opaquely to the dump/restore utilities
    #[serde(default)]
    pub database_url: String,

    /// Dump utility invocation
    #[serde(default = "CommandSettings::default_dump")]
    pub dump: CommandSettings,

    /// Restore utility invocation
    #[serde(default = "CommandSettings::default_restore")]
    pub restore: CommandSettings,

    /// Cap on captured subprocess output, split evenly between stdout and stderr
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,

    /// Dump the live database before every restore
    #[serde(default)]
    pub safety_backup_before_restore: bool,

    /// Admin HTTP listener
    #[serde(default)]
    pub server: ServerSettings,
}

fn default_schema_version() -> u32 {
    1
}

fn default_cron() -> String {
    DEFAULT_SCHEDULE.to_string()
}

fn default_true() -> bool {
    true
}

fn default_max_backups() -> usize {
    DEFAULT_MAX_BACKUPS
}

fn default_max_output_bytes() -> usize {
    DEFAULT_MAX_OUTPUT_BYTES
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            schema_version: default_schema_version(),
            backup_dir: None,
            max_backups: default_max_backups(),
            schedule: ScheduleSettings::default(),
            database_url: String::new(),
            dump: CommandSettings::default_dump(),
            restore: CommandSettings::default_restore(),
            max_output_bytes: default_max_output_bytes(),
            safety_backup_before_restore: false,
            server: ServerSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings from disk, or use defaults if the file doesn't exist
    pub fn load_or_create(paths: &VaultPaths) -> Result<Self, VaultError> {
        let settings_path = paths.settings_file();

        if settings_path.exists() {
            let contents = std::fs::read_to_string(&settings_path).map_err(|e| {
                VaultError::Io(format!("Failed to read settings file: {}", e))
            })?;

            let settings: Settings = serde_json::from_str(&contents).map_err(|e| {
                VaultError::Config(format!("Failed to parse settings file: {}", e))
            })?;

            Ok(settings)
        } else {
            // Don't save yet - let caller decide when to persist
            Ok(Settings::default())
        }
    }

    /// Load settings from disk and apply environment overrides
    pub fn load(paths: &VaultPaths) -> Result<Self, VaultError> {
        let mut settings = Self::load_or_create(paths)?;
        settings.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(settings)
    }

    /// Save settings to disk
    pub fn save(&self, paths: &VaultPaths) -> Result<(), VaultError> {
        paths.ensure_directories()?;

        let contents = serde_json::to_string_pretty(self).map_err(|e| {
            VaultError::Config(format!("Failed to serialize settings: {}", e))
        })?;

        std::fs::write(paths.settings_file(), contents).map_err(|e| {
            VaultError::Io(format!("Failed to write settings file: {}", e))
        })?;

        Ok(())
    }

    /// Apply overrides from an environment-like lookup
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), VaultError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup(ENV_BACKUP_DIR).filter(|v| !v.trim().is_empty()) {
            self.backup_dir = Some(PathBuf::from(dir));
        }

        if let Some(raw) = lookup(ENV_MAX_BACKUPS) {
            self.max_backups = raw.trim().parse().map_err(|_| {
                VaultError::Config(format!("{} must be a non-negative integer, got '{}'", ENV_MAX_BACKUPS, raw))
            })?;
        }

        if let Some(cron) = lookup(ENV_SCHEDULE).filter(|v| !v.trim().is_empty()) {
            self.schedule.cron = cron;
        }

        if let Some(raw) = lookup(ENV_SCHEDULE_ENABLED) {
            self.schedule.enabled = parse_flag(&raw).ok_or_else(|| {
                VaultError::Config(format!("{} must be a boolean, got '{}'", ENV_SCHEDULE_ENABLED, raw))
            })?;
        }

        if let Some(url) = lookup(ENV_DATABASE_URL) {
            self.database_url = url;
        }

        Ok(())
    }

    /// Resolve the artifact directory
    pub fn backup_dir(&self, paths: &VaultPaths) -> PathBuf {
        self.backup_dir
            .clone()
            .unwrap_or_else(|| paths.default_backup_dir())
    }

    /// Build the validated schedule configuration
    ///
    /// An invalid cron expression falls back to [`DEFAULT_SCHEDULE`] with a
    /// warning; it never fails startup.
    pub fn schedule_config(&self) -> ScheduleConfig {
        let schedule = match self.schedule.cron.parse::<CronSchedule>() {
            Ok(schedule) => schedule,
            Err(e) => {
                tracing::warn!(
                    cron = %self.schedule.cron,
                    error = %e,
                    fallback = DEFAULT_SCHEDULE,
                    "invalid backup schedule, using default"
                );
                CronSchedule::default()
            }
        };

        ScheduleConfig {
            schedule,
            enabled: self.schedule.enabled,
            max_backups: self.max_backups,
        }
    }

    /// The connection target, or a configuration error if none is set
    pub fn require_database_url(&self) -> Result<&str, VaultError> {
        if self.database_url.trim().is_empty() {
            return Err(VaultError::Config(format!(
                "No database connection configured; set {} or database_url in config.json",
                ENV_DATABASE_URL
            )));
        }
        Ok(&self.database_url)
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
