//! Shared handler state

use std::sync::Arc;

use crate::backup::BackupManager;
use crate::scheduler::BackupScheduler;

/// Application state shared by every handler
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<BackupManager>,
    pub scheduler: Arc<BackupScheduler>,
}

impl AppState {
    pub fn new(manager: Arc<BackupManager>, scheduler: Arc<BackupScheduler>) -> Self {
        Self { manager, scheduler }
    }
}
