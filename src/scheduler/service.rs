//! Recurring backup job
//!
//! One tokio task sleeps until the next cron firing, calls
//! [`BackupManager::create`], records the outcome and goes back to sleep.
//! A firing that finds another operation running is skipped, not retried.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::cron::CronSchedule;
use crate::backup::BackupManager;
use crate::config::settings::ScheduleConfig;

/// What happened on the most recent firing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    Succeeded { artifact: String, pruned: usize },
    /// Another create or restore held the lock
    Skipped { reason: String },
    Failed { reason: String },
}

/// Snapshot returned by [`BackupScheduler::status`]
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    /// Scheduling is switched on in configuration
    pub enabled: bool,
    /// The recurring task is registered and waiting or firing
    pub active: bool,
    /// A create or restore is running right now
    pub running: bool,
    pub schedule: String,
    pub description: String,
    pub next_run: Option<DateTime<Utc>>,
    pub last_run: Option<DateTime<Utc>>,
    pub last_outcome: Option<RunOutcome>,
}

#[derive(Debug, Default)]
struct History {
    next_run: Option<DateTime<Utc>>,
    last_run: Option<DateTime<Utc>>,
    last_outcome: Option<RunOutcome>,
}

struct Shared {
    manager: Arc<BackupManager>,
    history: Mutex<History>,
}

impl Shared {
    async fn fire(&self) -> RunOutcome {
        let started = Utc::now();

        let outcome = match self.manager.create().await {
            Ok(created) => {
                tracing::info!(
                    name = %created.artifact.name,
                    pruned = created.pruned.len(),
                    duration_ms = created.duration_ms,
                    "scheduled backup complete"
                );
                RunOutcome::Succeeded {
                    artifact: created.artifact.name,
                    pruned: created.pruned.len(),
                }
            }
            Err(e) if e.is_rejected() => {
                tracing::warn!(reason = %e, "scheduled backup skipped until next firing");
                RunOutcome::Skipped {
                    reason: e.to_string(),
                }
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    diagnostics = e.diagnostics().unwrap_or_default(),
                    "scheduled backup failed"
                );
                RunOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        };

        let mut history = self.history.lock();
        history.last_run = Some(started);
        history.last_outcome = Some(outcome.clone());
        outcome
    }
}

struct Registration {
    token: CancellationToken,
    task: JoinHandle<()>,
}

/// Owns the recurring create job
///
/// Constructed once at startup and stopped at shutdown.
pub struct BackupScheduler {
    schedule: CronSchedule,
    enabled: bool,
    shared: Arc<Shared>,
    registration: Mutex<Option<Registration>>,
}

impl BackupScheduler {
    pub fn new(manager: Arc<BackupManager>, config: &ScheduleConfig) -> Self {
        Self {
            schedule: config.schedule.clone(),
            enabled: config.enabled,
            shared: Arc::new(Shared {
                manager,
                history: Mutex::new(History::default()),
            }),
            registration: Mutex::new(None),
        }
    }

    pub fn schedule(&self) -> &CronSchedule {
        &self.schedule
    }

    /// Register the recurring job
    ///
    /// Does nothing when scheduling is disabled or the job is already
    /// registered. Must be called from within a tokio runtime.
    pub fn start(&self) {
        if !self.enabled {
            tracing::info!("scheduled backups disabled");
            return;
        }

        let mut registration = self.registration.lock();
        if registration.as_ref().is_some_and(|r| !r.token.is_cancelled()) {
            return;
        }

        let next_run = self.schedule.next_after(Utc::now());
        self.shared.history.lock().next_run = next_run;

        let token = CancellationToken::new();
        let task = tokio::spawn(run_loop(
            self.schedule.clone(),
            Arc::clone(&self.shared),
            token.clone(),
            next_run,
        ));

        tracing::info!(
            schedule = %self.schedule,
            description = %self.schedule.describe(),
            next_run = ?next_run,
            "scheduled backups started"
        );
        *registration = Some(Registration { token, task });
    }

    /// Deregister the job; idempotent
    ///
    /// A create already in flight runs to completion.
    pub fn stop(&self) {
        if let Some(registration) = self.registration.lock().take() {
            registration.token.cancel();
            self.shared.history.lock().next_run = None;
            tracing::info!("scheduled backups stopped");
        }
    }

    /// Fire once immediately, outside the schedule
    pub async fn run_now(&self) -> RunOutcome {
        self.shared.fire().await
    }

    pub fn status(&self) -> SchedulerStatus {
        let active = self
            .registration
            .lock()
            .as_ref()
            .is_some_and(|r| !r.token.is_cancelled() && !r.task.is_finished());
        let history = self.shared.history.lock();

        SchedulerStatus {
            enabled: self.enabled,
            active,
            running: self.shared.manager.running_operation().is_some(),
            schedule: self.schedule.to_string(),
            description: self.schedule.describe(),
            next_run: if active { history.next_run } else { None },
            last_run: history.last_run,
            last_outcome: history.last_outcome.clone(),
        }
    }
}

impl Drop for BackupScheduler {
    fn drop(&mut self) {
        if let Some(registration) = self.registration.get_mut().take() {
            registration.token.cancel();
        }
    }
}

async fn run_loop(
    schedule: CronSchedule,
    shared: Arc<Shared>,
    token: CancellationToken,
    first: Option<DateTime<Utc>>,
) {
    let mut upcoming = first;

    loop {
        let Some(next) = upcoming else {
            tracing::warn!(schedule = %schedule, "schedule never fires; scheduler idle");
            break;
        };
        shared.history.lock().next_run = Some(next);

        let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(wait) => {}
        }

        shared.fire().await;
        // Never fire twice for the same minute if the clock lags the timer
        upcoming = schedule.next_after(Utc::now().max(next));
    }

    shared.history.lock().next_run = None;
}
