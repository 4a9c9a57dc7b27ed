//! Scheduled backups
//!
//! A typed cron schedule and the service that fires `BackupManager::create`
//! on it.

mod cron;
mod service;

pub use cron::{CronError, CronSchedule};
pub use service::{BackupScheduler, RunOutcome, SchedulerStatus};
