//! Display formatting for terminal output
//!
//! Provides utilities for formatting backups, statistics and verification
//! reports for terminal display.

pub mod backup;

pub use backup::{format_backup_list, format_duration, format_report, format_size, format_stats};
