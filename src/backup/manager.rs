//! Backup manager for dbvault
//!
//! Orchestrates create, list, stats, verify, restore and delete. Create and
//! restore are serialized by the [`OperationLock`]; everything else reads the
//! filesystem directly and does not take the lock.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use super::lock::{Operation, OperationLock};
use super::retention::select_for_deletion;
use super::runner::{DumpRunner, RestoreRunner};
use super::store::{Artifact, ArtifactStore};
use super::verify::{IntegrityVerifier, VerificationReport};
use crate::config::paths::VaultPaths;
use crate::config::settings::Settings;
use crate::error::{VaultError, VaultResult};

/// Result of a successful create
#[derive(Debug, Clone, Serialize)]
pub struct CreateOutcome {
    /// The new artifact
    pub artifact: Artifact,
    /// Artifacts removed by retention
    pub pruned: Vec<String>,
    /// Wall-clock time spent, in milliseconds
    pub duration_ms: u64,
}

/// Result of a successful restore
#[derive(Debug, Clone, Serialize)]
pub struct RestoreOutcome {
    /// Artifact that was replayed
    pub name: String,
    /// Wall-clock time spent, in milliseconds
    pub duration_ms: u64,
    /// Dump taken of the live database just before the restore
    #[serde(skip_serializing_if = "Option::is_none")]
    pub safety_backup: Option<String>,
}

/// Aggregate view of the catalog
#[derive(Debug, Clone, Serialize)]
pub struct BackupStats {
    pub count: usize,
    pub total_bytes: u64,
    pub oldest: Option<ArtifactSummary>,
    pub newest: Option<ArtifactSummary>,
    /// Retention ceiling
    pub max_backups: usize,
}

/// Name, size and creation time of one artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactSummary {
    pub name: String,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
}

impl From<&Artifact> for ArtifactSummary {
    fn from(artifact: &Artifact) -> Self {
        Self {
            name: artifact.name.clone(),
            size_bytes: artifact.size_bytes,
            created_at: artifact.created_at,
        }
    }
}

/// Only a JSON boolean `true` confirms a restore
///
/// `"true"`, `1` and every other value are refused.
pub fn is_explicit_confirmation(value: &serde_json::Value) -> bool {
    matches!(value, serde_json::Value::Bool(true))
}

/// Manages backup creation, retention and restore
pub struct BackupManager {
    store: ArtifactStore,
    dump: DumpRunner,
    restore: RestoreRunner,
    verifier: IntegrityVerifier,
    lock: OperationLock,
    /// Artifact currently being replayed, guarded against manual deletion
    restoring: Mutex<Option<String>>,
    connection_target: String,
    max_backups: usize,
    safety_backup_before_restore: bool,
}

impl BackupManager {
    /// Create a new BackupManager
    pub fn new(
        store: ArtifactStore,
        dump: DumpRunner,
        restore: RestoreRunner,
        connection_target: impl Into<String>,
        max_backups: usize,
    ) -> Self {
        Self {
            store,
            dump,
            restore,
            verifier: IntegrityVerifier::new(),
            lock: OperationLock::new(),
            restoring: Mutex::new(None),
            connection_target: connection_target.into(),
            max_backups,
            safety_backup_before_restore: false,
        }
    }

    /// Build a manager from loaded settings
    pub fn from_settings(settings: &Settings, paths: &VaultPaths) -> Self {
        let store = ArtifactStore::new(settings.backup_dir(paths));
        let dump = DumpRunner::new(store.clone(), &settings.dump)
            .with_max_output_bytes(settings.max_output_bytes);
        let restore = RestoreRunner::new(&settings.restore)
            .with_max_output_bytes(settings.max_output_bytes);

        Self::new(
            store,
            dump,
            restore,
            settings.database_url.clone(),
            settings.max_backups,
        )
        .with_safety_backup(settings.safety_backup_before_restore)
    }

    /// Dump the live database before every restore
    pub fn with_safety_backup(mut self, enabled: bool) -> Self {
        self.safety_backup_before_restore = enabled;
        self
    }

    /// The underlying artifact store
    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Retention ceiling
    pub fn max_backups(&self) -> usize {
        self.max_backups
    }

    /// The create/restore currently holding the lock, if any
    pub fn running_operation(&self) -> Option<Operation> {
        self.lock.current()
    }

    /// Create a backup and then enforce retention
    pub async fn create(&self) -> VaultResult<CreateOutcome> {
        let _guard = self.lock.try_acquire(Operation::Create)?;
        let started = Instant::now();

        let artifact = self.dump.run(&self.connection_target).await?;
        let pruned = self.enforce_retention();

        Ok(CreateOutcome {
            artifact,
            pruned,
            duration_ms: millis(started.elapsed()),
        })
    }

    /// Delete artifacts beyond the retention ceiling
    ///
    /// Called with the lock held. Failures to delete individual artifacts are
    /// logged and skipped.
    fn enforce_retention(&self) -> Vec<String> {
        let artifacts = match self.store.list() {
            Ok(artifacts) => artifacts,
            Err(e) => {
                tracing::warn!(error = %e, "could not list backups for retention");
                return Vec::new();
            }
        };

        // The artifact just created always survives, even with a ceiling of 0
        let keep = self.max_backups.max(1);
        let mut pruned = Vec::new();

        for artifact in select_for_deletion(&artifacts, keep) {
            match self.store.delete(&artifact.name) {
                Ok(()) => {
                    tracing::info!(name = %artifact.name, "pruned old backup");
                    pruned.push(artifact.name);
                }
                Err(e) => {
                    tracing::warn!(name = %artifact.name, error = %e, "failed to prune old backup");
                }
            }
        }

        pruned
    }

    /// Overwrite the live database with an artifact
    ///
    /// `confirmed` must be `true`; the name is validated before the lock is
    /// taken so a bad request never spawns a subprocess.
    pub async fn restore(&self, name: &str, confirmed: bool) -> VaultResult<RestoreOutcome> {
        if !confirmed {
            return Err(VaultError::ConfirmationRequired);
        }

        let path = self.store.resolve_path(name)?;
        let _guard = self.lock.try_acquire(Operation::Restore)?;
        let _marker = RestoreMarker::set(&self.restoring, name);
        let started = Instant::now();

        let safety_backup = if self.safety_backup_before_restore {
            // No retention here: it could prune the artifact being restored
            let artifact = self.dump.run(&self.connection_target).await?;
            tracing::info!(name = %artifact.name, "pre-restore backup saved");
            Some(artifact.name)
        } else {
            None
        };

        self.restore.run(&self.connection_target, &path).await?;

        Ok(RestoreOutcome {
            name: name.to_string(),
            duration_ms: millis(started.elapsed()),
            safety_backup,
        })
    }

    /// List all artifacts, newest first
    pub fn list(&self) -> VaultResult<Vec<Artifact>> {
        self.store.list()
    }

    /// Aggregate counts and sizes
    pub fn stats(&self) -> VaultResult<BackupStats> {
        let artifacts = self.store.list()?;

        Ok(BackupStats {
            count: artifacts.len(),
            total_bytes: artifacts.iter().map(|a| a.size_bytes).sum(),
            oldest: artifacts.last().map(ArtifactSummary::from),
            newest: artifacts.first().map(ArtifactSummary::from),
            max_backups: self.max_backups,
        })
    }

    /// Run the integrity verifier on one artifact
    pub async fn verify(&self, name: &str) -> VaultResult<VerificationReport> {
        let path = self.store.resolve_path(name)?;
        let verifier = self.verifier.clone();

        tokio::task::spawn_blocking(move || verifier.verify(&path))
            .await
            .map_err(|e| VaultError::Io(format!("Verification task failed: {}", e)))?
    }

    /// Delete one artifact on administrator request
    pub fn delete(&self, name: &str) -> VaultResult<()> {
        if self.restoring.lock().as_deref() == Some(name) {
            return Err(VaultError::Rejected(format!("{} is being restored", name)));
        }

        self.store.delete(name)?;
        tracing::info!(name = %name, "deleted backup");
        Ok(())
    }

    /// Resolved path for streaming an artifact to a client
    pub fn download_path(&self, name: &str) -> VaultResult<PathBuf> {
        self.store.resolve_path(name)
    }

    /// Resolve a name or the `latest` keyword to an artifact name
    pub fn resolve_name(&self, name: &str) -> VaultResult<String> {
        if name.eq_ignore_ascii_case("latest") {
            return self
                .store
                .latest()?
                .map(|a| a.name)
                .ok_or_else(|| VaultError::not_found("latest"));
        }
        Ok(name.to_string())
    }
}

struct RestoreMarker<'a> {
    slot: &'a Mutex<Option<String>>,
}

impl<'a> RestoreMarker<'a> {
    fn set(slot: &'a Mutex<Option<String>>, name: &str) -> Self {
        *slot.lock() = Some(name.to_string());
        Self { slot }
    }
}

impl Drop for RestoreMarker<'_> {
    fn drop(&mut self) {
        *self.slot.lock() = None;
    }
}

fn millis(duration: Duration) -> u64 {
    duration.as_millis().min(u64::MAX as u128) as u64
}
