//! Configuration module for dbvault
//!
//! This module provides configuration management including:
//! - Platform path resolution
//! - Settings persistence and environment overrides
//! - The validated schedule configuration

pub mod paths;
pub mod settings;

pub use paths::VaultPaths;
pub use settings::{CommandSettings, ScheduleConfig, Settings};
