//! dbvault - Backup and restore lifecycle manager for database-backed services
//!
//! This library dumps a live database to plain SQL artifacts on demand or on a
//! cron schedule, keeps a bounded history of them, verifies their structure,
//! and restores one on explicit confirmation.
//!
//! # Architecture
//!
//! The crate is organized into the following modules:
//!
//! - `config`: Configuration and path management
//! - `error`: Custom error types
//! - `backup`: Artifact store, dump/restore runners, retention and the manager
//! - `scheduler`: Cron schedule and the recurring backup job
//! - `server`: Admin HTTP API
//! - `cli`: Command-line handlers
//! - `display`: Terminal formatting
//!
//! # Example
//!
//! ```rust,ignore
//! use dbvault::backup::BackupManager;
//! use dbvault::config::{paths::VaultPaths, settings::Settings};
//!
//! let paths = VaultPaths::new()?;
//! let settings = Settings::load(&paths)?;
//! let manager = BackupManager::from_settings(&settings, &paths);
//! let outcome = manager.create().await?;
//! ```

pub mod backup;
pub mod cli;
pub mod config;
pub mod display;
pub mod error;
pub mod scheduler;
pub mod server;

pub use error::{VaultError, VaultResult};
